use cp_compat::{Path, PathId};
use cp_store::TreeFs;

use crate::args::ListArgs;
use crate::error::CliError;
use crate::namedbs::NameDbs;

use super::mount::mount;

pub fn run(args: &ListArgs, names: &NameDbs) -> Result<(), CliError> {
    let tfs = mount(&args.mount)?;

    let dir_path = Path::new(&args.path).map_err(|source| CliError::InvalidPath {
        path: args.path.clone(),
        source,
    })?;
    let pid = PathId::new(&dir_path);

    if args.recursive {
        let it = tfs
            .recursive_directory_iterator(pid)
            .ok_or_else(|| CliError::EntryNotFound(args.path.clone()))?;
        for (idx, _name) in it {
            print_entry(&tfs, idx, names);
        }
    } else {
        let it = tfs
            .directory_iterator(pid)
            .ok_or_else(|| CliError::EntryNotFound(args.path.clone()))?;
        for (idx, _name) in it {
            print_entry(&tfs, idx, names);
        }
    }
    Ok(())
}

/// `PathId` and `CName` both hash with FNV-1a-64 over the same kind of
/// string, so a path that never made it into a mounted `.ardb` can still
/// sometimes be named by looking its hash up in the `CNames.json` registry
/// before falling back to the raw hex placeholder (§4.L).
fn print_entry(tfs: &TreeFs, entry_idx: i32, names: &NameDbs) {
    let pid = tfs.pid_of_entry(entry_idx);
    match tfs.get_depot_path(pid) {
        Some(path) => println!("{path}"),
        None => match names.cnames.get(pid.hash()) {
            Some(name) => println!("{name} (resolved from CName database)"),
            None => println!("<unresolved path, hash {:016x}>", pid.hash()),
        },
    }
}
