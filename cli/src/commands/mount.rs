use cp_store::TreeFs;

use crate::args::MountArgs;
use crate::error::CliError;

/// Build a `TreeFs` from the archives and ardbs named on the command line,
/// loaded in the order given (later archives take priority, per
/// `TreeFs::load_archive`'s override semantics).
pub fn mount(args: &MountArgs) -> Result<TreeFs, CliError> {
    let mut tfs = TreeFs::new();
    for path in &args.archives {
        tracing::info!(path = %path.display(), "loading archive");
        tfs.load_archive(path)?;

        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            for root in &args.ardb_search_roots {
                let candidate = root.join(format!("{stem}.ardb"));
                if candidate.is_file() {
                    tracing::info!(path = %candidate.display(), "auto-loading sibling ardb");
                    tfs.load_ardb(&candidate)?;
                }
            }
        }
    }
    for path in &args.ardbs {
        tracing::info!(path = %path.display(), "loading ardb");
        tfs.load_ardb(path)?;
    }
    Ok(tfs)
}
