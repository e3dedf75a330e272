//! Dynamic binding to Oodle-Kraken, mirroring the original's own
//! `LoadLibrary`/`GetProcAddress` approach against a co-located
//! `oo2ext_7_win64.dll` (grounded on `redx/oodle/oodle.cpp`).
//!
//! Oodle has no redistributable open implementation and this toolkit does
//! not vendor or fake one: compressed archive segments cannot be decoded
//! without the operator supplying that platform library.

use libloading::{Library, Symbol};

const LIB_NAME: &str = "oo2ext_7_win64.dll";
const ORDER_BLOCK_LEN: usize = 256 * 1024;

const KRAK_MAGIC: u32 = u32::from_be_bytes(*b"KRAK");

#[derive(thiserror::Error, Debug)]
pub enum OodleError {
    #[error("oodle library {0:?} could not be loaded: {1}")]
    LibraryNotFound(String, String),
    #[error("OodleLZ_Decompress symbol is unavailable in the loaded library")]
    DecompressUnavailable,
    #[error("OodleLZ_Compress symbol is unavailable in the loaded library")]
    CompressUnavailable,
    #[error("OodleLZ_GetCompressedBufferSizeNeeded symbol is unavailable in the loaded library")]
    BufferSizeBoundUnavailable,
    #[error("payload is shorter than the {0}-byte Kraken header")]
    PayloadTooShort(usize),
    #[error("bad Kraken header magic")]
    BadMagic,
    #[error("header decompressed size {header} does not match destination buffer size {dst}")]
    SizeMismatch { header: u32, dst: usize },
    #[error("OodleLZ_Decompress reported {actual} bytes written, expected {expected}")]
    ShortDecompress { actual: usize, expected: usize },
}

#[repr(C)]
#[derive(Clone, Copy)]
struct KrakenHeader {
    magic: u32,
    decompressed_size: u32,
}

const HEADER_LEN: usize = std::mem::size_of::<KrakenHeader>();

type OodleLzDecompressFn = unsafe extern "C" fn(
    *const u8,
    isize,
    *mut u8,
    isize,
    i32,
    i32,
    i32,
    *const u8,
    isize,
    *const u8,
    *const u8,
    *mut u8,
    isize,
    i32,
) -> isize;

type OodleLzCompressFn = unsafe extern "C" fn(
    i32,
    *const u8,
    isize,
    *mut u8,
    i32,
    *const u8,
    *const u8,
    *const u8,
    *mut u8,
    isize,
) -> isize;

type OodleLzGetCompressedBufferSizeNeededFn = unsafe extern "C" fn(i32, isize) -> isize;

/// A loaded Oodle library, resolving the three entry points this toolkit
/// needs. Construction never panics; a missing library or symbol is a
/// latched `OodleError`, not a process abort.
pub struct OodleLibrary {
    _lib: Library,
    decompress: OodleLzDecompressFn,
    compress: Option<OodleLzCompressFn>,
    get_compressed_buffer_size_needed: Option<OodleLzGetCompressedBufferSizeNeededFn>,
}

impl OodleLibrary {
    /// Attempt to load `oo2ext_7_win64.dll` from the process's normal
    /// dynamic-library search path, or from an explicit directory if
    /// `game_dir` is given (mirroring the original's fallback to the
    /// game's own executable directory).
    pub fn load(game_dir: Option<&std::path::Path>) -> Result<Self, OodleError> {
        let candidates: Vec<std::path::PathBuf> = match game_dir {
            Some(dir) => vec![dir.join(LIB_NAME), std::path::PathBuf::from(LIB_NAME)],
            None => vec![std::path::PathBuf::from(LIB_NAME)],
        };

        let mut last_err = String::new();
        for candidate in &candidates {
            match unsafe { Library::new(candidate) } {
                Ok(lib) => return Self::from_library(lib),
                Err(e) => last_err = e.to_string(),
            }
        }
        Err(OodleError::LibraryNotFound(LIB_NAME.to_string(), last_err))
    }

    fn from_library(lib: Library) -> Result<Self, OodleError> {
        let decompress = unsafe {
            let sym: Symbol<OodleLzDecompressFn> = lib
                .get(b"OodleLZ_Decompress\0")
                .map_err(|_| OodleError::DecompressUnavailable)?;
            *sym
        };
        let compress = unsafe {
            lib.get::<OodleLzCompressFn>(b"OodleLZ_Compress\0")
                .ok()
                .map(|sym: Symbol<OodleLzCompressFn>| *sym)
        };
        let get_compressed_buffer_size_needed = unsafe {
            lib.get::<OodleLzGetCompressedBufferSizeNeededFn>(
                b"OodleLZ_GetCompressedBufferSizeNeeded\0",
            )
            .ok()
            .map(|sym: Symbol<OodleLzGetCompressedBufferSizeNeededFn>| *sym)
        };
        Ok(Self {
            _lib: lib,
            decompress,
            compress,
            get_compressed_buffer_size_needed,
        })
    }

    /// Decompress a Kraken-compressed segment: `src` begins with an
    /// 8-byte `{magic='KRAK', decompressed_size}` header, `dst` must be
    /// exactly `decompressed_size` bytes.
    pub fn decompress(&self, src: &[u8], dst: &mut [u8], check_crc: bool) -> Result<(), OodleError> {
        if src.len() < HEADER_LEN {
            return Err(OodleError::PayloadTooShort(HEADER_LEN));
        }
        let magic = u32::from_be_bytes(src[0..4].try_into().unwrap());
        let decompressed_size = u32::from_le_bytes(src[4..8].try_into().unwrap());
        if magic != KRAK_MAGIC {
            return Err(OodleError::BadMagic);
        }
        if decompressed_size as usize != dst.len() {
            return Err(OodleError::SizeMismatch {
                header: decompressed_size,
                dst: dst.len(),
            });
        }

        let mut scratch = vec![0u8; ORDER_BLOCK_LEN * 2];
        let payload = &src[HEADER_LEN..];

        let written = unsafe {
            (self.decompress)(
                payload.as_ptr(),
                payload.len() as isize,
                dst.as_mut_ptr(),
                dst.len() as isize,
                1, // OodleLZ_FuzzSafe::Yes
                check_crc as i32,
                0,
                std::ptr::null(),
                0,
                std::ptr::null(),
                std::ptr::null(),
                scratch.as_mut_ptr(),
                scratch.len() as isize,
                3, // OodleLZ_Decode_Thread::Current
            )
        };

        if written < 0 || written as usize != dst.len() {
            return Err(OodleError::ShortDecompress {
                actual: written.max(0) as usize,
                expected: dst.len(),
            });
        }
        Ok(())
    }

    /// Compress `src` at the given Oodle compression level. Refuses to
    /// return a result that is not smaller than the input (a trivial-gain
    /// refusal, matching the spec's note that compression should not be
    /// applied when it doesn't help).
    pub fn compress(&self, src: &[u8], level: i32) -> Result<Vec<u8>, OodleError> {
        let compress_fn = self.compress.ok_or(OodleError::CompressUnavailable)?;
        let bound_fn = self
            .get_compressed_buffer_size_needed
            .ok_or(OodleError::BufferSizeBoundUnavailable)?;
        let bound = unsafe { bound_fn(8, src.len() as isize) };
        if bound <= 0 {
            return Err(OodleError::BufferSizeBoundUnavailable);
        }
        let mut dst = vec![0u8; bound as usize];

        let written = unsafe {
            compress_fn(
                8, // Oodle Kraken compressor id
                src.as_ptr(),
                src.len() as isize,
                dst.as_mut_ptr(),
                level,
                std::ptr::null(),
                std::ptr::null(),
                std::ptr::null(),
                std::ptr::null_mut(),
                0,
            )
        };

        if written <= 0 || written as usize >= src.len() {
            return Err(OodleError::ShortDecompress {
                actual: written.max(0) as usize,
                expected: src.len(),
            });
        }
        dst.truncate(written as usize);
        Ok(dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_library_is_a_latched_error_not_a_panic() {
        let result = OodleLibrary::load(Some(std::path::Path::new("/nonexistent/dir")));
        assert!(matches!(result, Err(OodleError::LibraryNotFound(_, _))));
    }

    #[test]
    fn header_len_is_eight_bytes() {
        assert_eq!(HEADER_LEN, 8);
    }
}
