#[derive(thiserror::Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Archive(#[from] cp_store::ArchiveError),
    #[error(transparent)]
    TreeFs(#[from] cp_store::TreeFsError),
    #[error(transparent)]
    Csav(#[from] cp_save::CsavError),
    #[error("invalid path {path}: {source}")]
    InvalidPath {
        path: String,
        #[source]
        source: cp_compat::path::PathError,
    },
    #[error("no such entry: {0}")]
    EntryNotFound(String),
    #[error("reloaded tree does not match the original save")]
    RoundTripMismatch,
}
