//! Hash primitives shared by the rest of the toolkit.
//!
//! The CRC-32 implementation below is a nibble-table (16-entry) variant,
//! not the classical 256-entry byte-table one. It processes each byte as
//! two 4-bit lookups. This is the form [`crc32_combine`] is built around:
//! combining two CRCs amounts to shifting a register by a known number of
//! zero bits, for which the nibble engine is reused directly.

use sha1::{Digest, Sha1};

/// Reversed (reflected) CRC-32 polynomial, same constant zlib uses.
const CRC32_POLY: u32 = 0xEDB88320;

const fn build_nibble_table() -> [u32; 16] {
    let mut table = [0u32; 16];
    let mut i = 0;
    while i < 16 {
        let mut c = i as u32;
        let mut j = 0;
        while j < 4 {
            c = if c & 1 != 0 {
                CRC32_POLY ^ (c >> 1)
            } else {
                c >> 1
            };
            j += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

static NIBBLE_TABLE: [u32; 16] = build_nibble_table();

#[inline]
fn nibble_step(crc: u32, nibble: u32) -> u32 {
    NIBBLE_TABLE[((crc ^ nibble) & 0xF) as usize] ^ (crc >> 4)
}

/// CRC-32 (reflected, poly 0xEDB88320), seeded so repeated calls can chain
/// like the original's `crc32(bytes, seed)`.
pub fn crc32(bytes: &[u8], seed: u32) -> u32 {
    let mut crc = seed ^ 0xFFFF_FFFF;
    for &b in bytes {
        let b = b as u32;
        crc = nibble_step(crc, b & 0xF);
        crc = nibble_step(crc, b >> 4);
    }
    crc ^ 0xFFFF_FFFF
}

fn gf2_matrix_times(mat: &[u32; 32], mut vec: u32) -> u32 {
    let mut sum = 0u32;
    let mut i = 0;
    while vec != 0 {
        if vec & 1 != 0 {
            sum ^= mat[i];
        }
        vec >>= 1;
        i += 1;
    }
    sum
}

fn gf2_matrix_square(square: &mut [u32; 32], mat: &[u32; 32]) {
    for (n, slot) in square.iter_mut().enumerate() {
        *slot = gf2_matrix_times(mat, mat[n]);
    }
}

/// Combine two CRC-32 values as if the bytes that produced `crc2` had been
/// appended to the bytes that produced `crc1`, given only `len2` (the byte
/// length of the second run) — no access to either run's bytes is needed.
///
/// Used for `TweakDBID` concatenation (`S3` in the test corpus).
pub fn crc32_combine(crc1: u32, crc2: u32, len2: u64) -> u32 {
    if len2 == 0 {
        return crc1;
    }

    let mut odd = [0u32; 32];
    let mut even = [0u32; 32];

    odd[0] = CRC32_POLY;
    let mut row = 1u32;
    for slot in odd.iter_mut().skip(1) {
        *slot = row;
        row <<= 1;
    }

    gf2_matrix_square(&mut even, &odd);
    gf2_matrix_square(&mut odd, &even);

    let mut crc1 = crc1;
    let mut len2 = len2;
    loop {
        gf2_matrix_square(&mut even, &odd);
        if len2 & 1 != 0 {
            crc1 = gf2_matrix_times(&even, crc1);
        }
        len2 >>= 1;
        if len2 == 0 {
            break;
        }

        gf2_matrix_square(&mut odd, &even);
        if len2 & 1 != 0 {
            crc1 = gf2_matrix_times(&odd, crc1);
        }
        len2 >>= 1;
        if len2 == 0 {
            break;
        }
    }

    crc1 ^ crc2
}

const FNV1A32_BASIS: u32 = 0x811C_9DC5;
const FNV1A32_PRIME: u32 = 0x0100_0193;
const FNV1A64_BASIS: u64 = 0xCBF2_9CE4_8422_2325;
const FNV1A64_PRIME: u64 = 0x0000_0100_0000_01B3;

pub fn fnv1a32(bytes: &[u8]) -> u32 {
    let mut hash = FNV1A32_BASIS;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(FNV1A32_PRIME);
    }
    hash
}

pub fn fnv1a64(bytes: &[u8]) -> u64 {
    fnv1a64_continue(FNV1A64_BASIS, bytes)
}

/// Continue a FNV-1a-64 hash from a previously computed value. This is how
/// `path_id` composition and `CName` pool seeding chain hashes without
/// re-hashing a shared prefix.
pub fn fnv1a64_continue(hash: u64, bytes: &[u8]) -> u64 {
    let mut hash = hash;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV1A64_PRIME);
    }
    hash
}

pub const MURMUR3_SEED: u32 = 0x5EED_BA5E;

pub fn murmur3_32(bytes: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h1 = seed;
    let chunks = bytes.chunks_exact(4);
    let remainder = chunks.remainder();

    for chunk in chunks {
        let mut k1 = u32::from_le_bytes(chunk.try_into().unwrap());
        k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h1 ^= k1;
        h1 = h1.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    if !remainder.is_empty() {
        let mut k1 = 0u32;
        for (i, &b) in remainder.iter().enumerate() {
            k1 ^= (b as u32) << (8 * i);
        }
        k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= bytes.len() as u32;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85eb_ca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2_ae35);
    h1 ^= h1 >> 16;
    h1
}

/// Streaming SHA-1 builder, used for archive file digests (§6.1). A thin
/// wrapper over the `sha1` crate rather than a hand-rolled implementation —
/// SHA-1 has no custom combine requirement the way CRC-32 does here.
#[derive(Default)]
pub struct Sha1Builder(Sha1);

impl Sha1Builder {
    pub fn new() -> Self {
        Self(Sha1::new())
    }

    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        self.0.update(bytes);
        self
    }

    pub fn finalize(self) -> [u8; 20] {
        self.0.finalize().into()
    }
}

pub fn sha1(bytes: &[u8]) -> [u8; 20] {
    let mut b = Sha1Builder::new();
    b.update(bytes);
    b.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case(b"testing", 0xE8F3_5A06; "testing crc32")]
    #[test_case(b"", 0x0000_0000; "empty crc32")]
    fn crc32_vectors(input: &[u8], expected: u32) {
        assert_eq!(crc32(input, 0), expected);
    }

    #[test]
    fn crc32_combine_matches_direct() {
        let a = crc32(b"testing", 0);
        let combined = crc32_combine(a, a, 7);
        assert_eq!(combined, 0x3A69_07F7);
        assert_eq!(combined, crc32(b"testingtesting", 0));
    }

    #[test]
    fn fnv1a_vectors() {
        assert_eq!(fnv1a32(b"testing"), 0xEB5F_499B);
        assert_eq!(fnv1a64(b"testing"), 0xC2FE_2FB7_7AE8_39BB);
    }

    #[test]
    fn fnv1a64_continue_matches_one_shot() {
        let whole = fnv1a64(b"testingtesting");
        let chained = fnv1a64_continue(fnv1a64(b"testing"), b"testing");
        assert_eq!(whole, chained);
    }

    #[test]
    fn murmur3_32_vector() {
        assert_eq!(murmur3_32(b"testing", MURMUR3_SEED), 0xC5FC_3C78);
    }

    #[test]
    fn sha1_is_consistent_with_streaming() {
        let one_shot = sha1(b"testing");
        let mut builder = Sha1Builder::new();
        builder.update(b"test").update(b"ing");
        assert_eq!(one_shot, builder.finalize());
    }

    proptest::proptest! {
        #[test]
        fn crc32_combine_agrees_with_concatenation(a in ".{0,64}", b in ".{0,64}") {
            let concat = format!("{a}{b}");
            let combined = crc32_combine(crc32(a.as_bytes(), 0), crc32(b.as_bytes(), 0), b.len() as u64);
            proptest::prop_assert_eq!(combined, crc32(concat.as_bytes(), 0));
        }
    }
}
