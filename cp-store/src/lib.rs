//! Archive engine and virtual tree filesystem for RADR-format content
//! bundles.

pub mod archive;
pub mod file_stream;
pub mod treefs;

pub use archive::{Archive, ArchiveError, FileHandle};
pub use file_stream::ArchiveFileStream;
pub use treefs::{TreeFs, TreeFsError};
