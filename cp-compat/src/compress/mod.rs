//! Compression glue: LZ4 framing for CSAV chunks, Oodle-Kraken for archive
//! segments (§4.E).

pub mod lz4;
pub mod oodle;

pub use lz4::{lz4_compress_bound, lz4_decompress_safe};
pub use oodle::{OodleError, OodleLibrary};
