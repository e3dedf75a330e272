//! Append-only, never-relocating interned string pool (§3.1, §4.A).
//!
//! [`StringPool`] is the single-threaded, lock-free variant. [`SharedStringPool`]
//! wraps one in a `parking_lot::RwLock` for the thread-safe variant the spec
//! mandates for any pool shared across threads. Both share the same
//! insert/find/at contract so callers can pick the variant that fits.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::hash::fnv1a64;

/// Minimum block growth size; mirrors the ≥256 KiB block-allocation policy
/// described in the spec. We don't actually sub-allocate fixed blocks here
/// (a `Vec<Arc<str>>` already gives each string a stable heap address), but
/// we reserve in this granularity to avoid frequent small reallocations of
/// the index vector.
pub const MIN_BLOCK_GROWTH: usize = 256 * 1024 / 4;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StringPoolError {
    #[error("hash collision: {new:?} collides with already-interned {existing:?}")]
    HashCollision { existing: String, new: String },
}

/// A single append-only string pool.
#[derive(Default)]
pub struct StringPool {
    entries: Vec<Arc<str>>,
    by_hash: FxHashMap<u64, u32>,
}

impl StringPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&mut self, additional: usize) {
        self.entries.reserve(additional.max(MIN_BLOCK_GROWTH));
        self.by_hash.reserve(additional);
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn find(&self, hash: u64) -> Option<u32> {
        self.by_hash.get(&hash).copied()
    }

    pub fn at(&self, index: u32) -> Option<Arc<str>> {
        self.entries.get(index as usize).cloned()
    }

    /// Insert `s`, computing its hash. If the hash is already present with
    /// different string content, logs an error and returns the *existing*
    /// entry unchanged (the pool never overwrites an entry).
    pub fn insert(&mut self, s: &str) -> (u64, u32) {
        let hash = fnv1a64(s.as_bytes());
        self.insert_with_hash(s, hash)
    }

    pub fn insert_with_hash(&mut self, s: &str, hash: u64) -> (u64, u32) {
        if let Some(&idx) = self.by_hash.get(&hash) {
            let existing = &self.entries[idx as usize];
            if existing.as_ref() != s {
                tracing::error!(
                    existing = %existing,
                    new = %s,
                    hash = format_args!("{hash:016x}"),
                    "string pool hash collision, keeping existing entry"
                );
            }
            return (hash, idx);
        }

        let idx = self.entries.len() as u32;
        self.entries.push(Arc::from(s));
        self.by_hash.insert(hash, idx);
        (hash, idx)
    }

    /// Insert a `&'static str` without taking ownership of a fresh copy.
    /// Mirrors `insert_literal`; since `Arc<str>` always owns its bytes in
    /// this port, this differs from `insert` only in naming intent at the
    /// call site (no borrow-checker shortcut is available without `unsafe`,
    /// which the original's raw-pointer variant relied on and this crate
    /// does not need).
    pub fn insert_static(&mut self, s: &'static str) -> (u64, u32) {
        self.insert(s)
    }
}

/// Thread-safe pool: a shared/exclusive lock around [`StringPool`], per §3.1.
#[derive(Default)]
pub struct SharedStringPool(parking_lot::RwLock<StringPool>);

impl SharedStringPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&self) -> usize {
        self.0.read().size()
    }

    pub fn find(&self, hash: u64) -> Option<u32> {
        self.0.read().find(hash)
    }

    pub fn at(&self, index: u32) -> Option<Arc<str>> {
        self.0.read().at(index)
    }

    pub fn insert(&self, s: &str) -> (u64, u32) {
        self.0.write().insert(s)
    }

    pub fn insert_with_hash(&self, s: &str, hash: u64) -> (u64, u32) {
        self.0.write().insert_with_hash(s, hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_empty_pool_insert_order() {
        let mut pool = StringPool::new();
        let (_, ia) = pool.insert("alpha");
        let (hb, ib) = pool.insert("beta");
        assert_eq!(ia, 0);
        assert_eq!(ib, 1);
        assert_eq!(pool.at(0).unwrap().as_ref(), "alpha");
        assert_eq!(pool.at(1).unwrap().as_ref(), "beta");
        assert_eq!(pool.find(fnv1a64(b"beta")), Some(1));
        assert_eq!(hb, fnv1a64(b"beta"));
    }

    #[test]
    fn reinsert_same_string_returns_same_index() {
        let mut pool = StringPool::new();
        let (_, a) = pool.insert("duplicate");
        let (_, b) = pool.insert("duplicate");
        assert_eq!(a, b);
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn distinct_strings_have_distinct_lookup() {
        let mut pool = StringPool::new();
        let (ha, _) = pool.insert("one");
        let (hb, _) = pool.insert("two");
        assert_ne!(pool.find(ha), pool.find(hb));
    }

    #[test]
    fn shared_pool_matches_single_threaded_semantics() {
        let pool = SharedStringPool::new();
        let (_, a) = pool.insert("alpha");
        let (_, b) = pool.insert("alpha");
        assert_eq!(a, b);
        assert_eq!(pool.at(a).unwrap().as_ref(), "alpha");
    }
}
