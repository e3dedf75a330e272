//! Resource [`Path`] and its 64-bit fingerprint, [`PathId`] (§3.1, §4.D).
//!
//! Grounded on the original's `normalize_copy_nosep`: a single forward pass
//! over the input bytes, tracking only whether the previously-emitted byte
//! was a separator, with no intermediate allocation beyond the output.

use std::fmt;

use crate::hash::{fnv1a64, fnv1a64_continue};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path contains non-ASCII byte 0x{0:02x}")]
    NonAscii(u8),
    #[error("path contains a ':' character, which is not allowed")]
    ColonNotAllowed,
}

/// A lower-case, `\`-separated, depot-relative resource path.
///
/// Construction always normalizes; there is no "already normalized" fast
/// path exposed publicly (unlike the original's `already_normalized_tag`
/// constructor, which exists purely as an internal micro-optimization for
/// paths the tree filesystem already knows are normalized — callers outside
/// this crate never get to skip validation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path(String);

impl Path {
    pub fn new(s: &str) -> Result<Self, PathError> {
        Ok(Self(normalize(s)?))
    }

    /// Construct from a string already known to be normalized (e.g. an
    /// ARDB record name or a path reconstructed by walking a tree). Still
    /// O(1), no re-validation; callers inside this crate that already
    /// proved the invariant use this instead of re-running `new`.
    pub(crate) fn from_normalized(s: String) -> Self {
        Self(s)
    }

    /// Same as [`Path::from_normalized`], exposed to other crates in this
    /// workspace (e.g. TreeFS, which reconstructs a path from component
    /// names it already normalized on insertion). Skipping validation is
    /// the caller's responsibility; this is not exposed as a public API
    /// for untrusted input.
    pub fn from_normalized_unchecked(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn join(&self, child: &Path) -> Path {
        if self.is_root() {
            return child.clone();
        }
        if child.is_root() {
            return self.clone();
        }
        let mut s = String::with_capacity(self.0.len() + 1 + child.0.len());
        s.push_str(&self.0);
        s.push('\\');
        s.push_str(&child.0);
        Path(s)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Single-pass, in-place-style normalizer: folds `/`→`\`, collapses runs of
/// separators, lower-cases ASCII, strips a trailing separator, and rejects
/// non-ASCII bytes (`> 0x7F`) and literal `:`.
fn normalize(s: &str) -> Result<String, PathError> {
    let mut out = String::with_capacity(s.len());
    let mut prev_is_sep = true; // true so a leading separator is dropped, not doubled
    for b in s.bytes() {
        if b > 0x7F {
            return Err(PathError::NonAscii(b));
        }
        if b == b':' {
            return Err(PathError::ColonNotAllowed);
        }
        let is_sep = b == b'/' || b == b'\\';
        if is_sep {
            if prev_is_sep {
                continue;
            }
            out.push('\\');
            prev_is_sep = true;
        } else {
            out.push((b as char).to_ascii_lowercase());
            prev_is_sep = false;
        }
    }
    if out.ends_with('\\') {
        out.pop();
    }
    Ok(out)
}

/// 64-bit fingerprint of a normalized path: `FNV-1a-64(path)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathId(u64);

impl PathId {
    pub fn new(p: &Path) -> Self {
        Self(fnv1a64(p.as_str().as_bytes()))
    }

    pub const fn from_hash(hash: u64) -> Self {
        Self(hash)
    }

    pub fn root() -> Self {
        Self(fnv1a64(b""))
    }

    pub fn hash(&self) -> u64 {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// `self / p`: the path-id of `self`'s path joined with `p`. If `self`
    /// is root, this is equivalent to `PathId::new(p)` — no leading
    /// separator is hashed in, matching the original's `operator/=`.
    pub fn join(&self, p: &Path) -> PathId {
        if self.0 == 0 {
            return Self(0);
        }
        let mut h = self.0;
        if *self != Self::root() {
            h = fnv1a64_continue(h, b"\\");
        }
        h = fnv1a64_continue(h, p.as_str().as_bytes());
        Self(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rejects_non_ascii_and_colon() {
        assert!(Path::new("café").is_err());
        assert!(Path::new("c:\\foo").is_err());
    }

    #[test]
    fn folds_case_and_separators() {
        let p = Path::new("Base/Sub\\\\x.TXT").unwrap();
        assert_eq!(p.as_str(), "base\\sub\\x.txt");
    }

    #[test]
    fn strips_trailing_separator() {
        assert_eq!(Path::new("a/b/").unwrap().as_str(), "a\\b");
    }

    #[test]
    fn s2_path_composition_hash_agreement() {
        let whole = PathId::new(&Path::new("Base/Sub\\x.txt").unwrap());
        let composed = PathId::new(&Path::new("base").unwrap())
            .join(&Path::new("sub").unwrap())
            .join(&Path::new("x.txt").unwrap());
        assert_eq!(whole, composed);
    }

    #[test]
    fn root_join_has_no_leading_separator() {
        let root = PathId::root();
        let joined = root.join(&Path::new("x").unwrap());
        assert_eq!(joined, PathId::new(&Path::new("x").unwrap()));
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(s in "[ -~]{0,64}") {
            if let Ok(p1) = Path::new(&s) {
                let p2 = Path::new(p1.as_str()).expect("normalized output must re-normalize");
                prop_assert_eq!(p1, p2);
            }
        }
    }
}
