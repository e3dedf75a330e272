//! `CName`: a FNV-1a-64 name handle with optional reverse resolution
//! (§3.1, §4.B).

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::hash::fnv1a64;

/// 64-bit hashed name identifier. Two `CName`s are equal iff their hashes
/// are equal; the human-readable string is an optional, separately-tracked
/// annotation recovered through a [`CNameResolver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CName(u64);

impl CName {
    pub fn new(s: &str) -> Self {
        Self(fnv1a64(s.as_bytes()))
    }

    pub const fn from_hash(hash: u64) -> Self {
        Self(hash)
    }

    pub fn hash(&self) -> u64 {
        self.0
    }

    /// Resolve this name against `resolver`, falling back to the
    /// `<cname:HHHHHHHHHHHHHHHH>` placeholder the original renders for
    /// unresolvable hashes.
    pub fn display(&self, resolver: &CNameResolver) -> CNameDisplay {
        CNameDisplay {
            hash: self.0,
            name: resolver.get(self.0),
        }
    }
}

pub struct CNameDisplay {
    hash: u64,
    name: Option<Arc<str>>,
}

impl fmt::Display for CNameDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => f.write_str(name),
            None => write!(f, "<cname:{:016x}>", self.hash),
        }
    }
}

/// Process-wide (or test-scoped) registry mapping `CName` hashes back to
/// their source strings, seeded from `db/CNames.json` (§6.5, §4.L).
///
/// Per the "Global registries" design decision (SPEC_FULL.md §9), this is
/// an explicit, caller-constructed handle — not a hidden static.
#[derive(Default)]
pub struct CNameResolver {
    by_hash: RwLock<FxHashMap<u64, Arc<str>>>,
}

impl CNameResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`, returning the `CName` it hashes to.
    pub fn register(&self, name: &str) -> CName {
        let cname = CName::new(name);
        self.by_hash
            .write()
            .entry(cname.hash())
            .or_insert_with(|| Arc::from(name));
        cname
    }

    pub fn get(&self, hash: u64) -> Option<Arc<str>> {
        self.by_hash.read().get(&hash).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_hash.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_matches_fnv1a64() {
        assert_eq!(CName::new("testing").hash(), fnv1a64(b"testing"));
    }

    #[test]
    fn resolves_registered_name() {
        let resolver = CNameResolver::new();
        let cname = resolver.register("PlayerPuppet");
        assert_eq!(cname.display(&resolver).to_string(), "PlayerPuppet");
    }

    #[test]
    fn unresolved_name_renders_placeholder() {
        let resolver = CNameResolver::new();
        let cname = CName::new("NeverRegistered");
        assert_eq!(
            cname.display(&resolver).to_string(),
            format!("<cname:{:016x}>", cname.hash())
        );
    }
}
