use std::fs;

use cp_compat::{CName, Path, PathId};

use crate::args::ExtractArgs;
use crate::error::CliError;
use crate::namedbs::NameDbs;

use super::mount::mount;

pub fn run(args: &ExtractArgs, names: &NameDbs) -> Result<(), CliError> {
    let tfs = mount(&args.mount)?;

    let entry_path = Path::new(&args.entry).map_err(|source| CliError::InvalidPath {
        path: args.entry.clone(),
        source,
    })?;
    let pid = PathId::new(&entry_path);

    // Entries that only made it into the tree as hash-named
    // `unidentified_files` leaves are keyed by the *unnormalized* CName
    // hash of their original depot path, not `PathId::new`'s normalized
    // one. If the literal lookup misses, retry against the raw CName hash
    // of the entry string as typed (§4.L).
    let handle = tfs.get_file_handle(pid).or_else(|| {
        let raw_hash = CName::new(&args.entry).hash();
        names
            .cnames
            .get(raw_hash)
            .and_then(|_| tfs.get_file_handle(PathId::from_hash(raw_hash)))
    });
    let handle = handle.ok_or_else(|| CliError::EntryNotFound(args.entry.clone()))?;

    let info = handle.archive().get_file_info(handle.file_index())?;
    let mut buf = vec![0u8; info.size as usize];
    handle.archive().read_file(handle.file_index(), &mut buf)?;

    fs::write(&args.out, &buf)?;
    tracing::info!(bytes = buf.len(), out = %args.out.display(), "extracted file");
    Ok(())
}
