use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;

/// Unstable operator/test front-end for the archive and save-file
/// libraries (§6.6): mounts archives into a virtual tree filesystem to
/// list or extract entries, and inspects or round-trips CSAV save
/// containers.
///
/// This interface is not stable and may change without notice; nothing
/// should depend on its argument surface.
#[derive(Parser)]
pub struct Args {
    /// A global log level to use when printing logs.
    /// It's also possible to set `RUST_LOG` according to
    /// `tracing_subscriber::filter::EnvFilter`, which always has priority.
    #[arg(long, default_value_t = Level::INFO)]
    pub log_level: Level,

    /// Root directory holding the JSON name databases (`CNames.json`,
    /// `TweakDBIDs.json`, `CEnums.json`, `CFacts.json`) used to resolve
    /// hashed names back to strings (§4.L). Omit to run with empty
    /// resolvers; every lookup then falls back to its hash placeholder.
    #[arg(long)]
    pub db_root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List the entries of a directory mounted from one or more archives.
    List(ListArgs),
    /// Extract one file from a mounted tree to a destination path.
    Extract(ExtractArgs),
    /// Print the node tree of a CSAV save file.
    Inspect(InspectArgs),
    /// Load a CSAV save file, re-save it, and report whether the
    /// reloaded tree matches the original.
    Verify(VerifyArgs),
}

#[derive(clap::Args)]
pub struct MountArgs {
    /// Archive files to mount, in priority order. Later archives override
    /// earlier ones for paths they both contain, matching the load order
    /// of the original archive engine.
    #[arg(long = "archive", required = true)]
    pub archives: Vec<PathBuf>,

    /// Optional archive-dependency-database files to load alongside the
    /// mounted archives.
    #[arg(long = "ardb")]
    pub ardbs: Vec<PathBuf>,

    /// Directories to search for a sibling `<archive-stem>.ardb` next to
    /// each mounted archive, generalizing the original's hard-coded
    /// `./ardbs/` convention into a configurable list of candidate roots.
    #[arg(long = "ardb-search-root")]
    pub ardb_search_roots: Vec<PathBuf>,
}

#[derive(clap::Args)]
pub struct ListArgs {
    #[command(flatten)]
    pub mount: MountArgs,

    /// Depot-relative directory path to list. The mount root if omitted.
    #[arg(default_value = "")]
    pub path: String,

    /// Recurse into subdirectories.
    #[arg(long)]
    pub recursive: bool,
}

#[derive(clap::Args)]
pub struct ExtractArgs {
    #[command(flatten)]
    pub mount: MountArgs,

    /// Depot-relative path of the file to extract.
    pub entry: String,

    /// Destination path to write the extracted bytes to.
    pub out: PathBuf,
}

#[derive(clap::Args)]
pub struct InspectArgs {
    /// Path to the CSAV file to inspect.
    pub save: PathBuf,
}

#[derive(clap::Args)]
pub struct VerifyArgs {
    /// Path to the CSAV file to round-trip.
    pub save: PathBuf,
}
