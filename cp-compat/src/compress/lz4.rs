//! LZ4 block (de)compression for CSAV's `'XLZ4'`-tagged chunks.
//!
//! The teacher's stack has no LZ4 dependency; `lz4_flex` is a genuine
//! addition for this crate (see DESIGN.md), chosen over bindgen-ing the
//! reference `liblz4` because a pure-Rust block codec keeps the whole
//! workspace free of a C toolchain dependency.

use lz4_flex::block::{compress, decompress};

#[derive(thiserror::Error, Debug, Clone)]
pub enum Lz4Error {
    #[error("lz4 decompression failed: {0}")]
    Decompress(String),
}

/// Decompress a raw LZ4 block (no embedded size header) into exactly
/// `expected_size` bytes.
pub fn lz4_decompress_safe(src: &[u8], expected_size: usize) -> Result<Vec<u8>, Lz4Error> {
    decompress(src, expected_size).map_err(|e| Lz4Error::Decompress(e.to_string()))
}

/// Compress `src` as a raw LZ4 block with no embedded size header — CSAV's
/// chunk table already carries the uncompressed size alongside each chunk,
/// matching the original's bare `LZ4_compress_destSize`/`LZ4_decompress_safe`
/// pairing.
pub fn lz4_compress(src: &[u8]) -> Vec<u8> {
    compress(src)
}

/// Worst-case output size for compressing `input_len` bytes.
pub fn lz4_compress_bound(input_len: usize) -> usize {
    lz4_flex::block::get_maximum_output_size(input_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_arbitrary_bytes() {
        let data = b"the quick brown fox jumps over the lazy dog, repeatedly, repeatedly, repeatedly";
        let compressed = lz4_flex::block::compress(data);
        let decompressed = lz4_decompress_safe(&compressed, data.len()).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn compress_bound_is_at_least_input_len() {
        assert!(lz4_compress_bound(1024) >= 1024);
    }
}
