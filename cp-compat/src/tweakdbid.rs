//! `TweakDBID`: CRC-32 + length byte identifier with length-aware
//! concatenation (§3.1, §4.B).

use std::fmt;
use std::ops::Add;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::hash::{crc32, crc32_combine};

/// Prefixes that get `_Rare` / `_Epic` / `_Legendary` suffix variants
/// auto-registered alongside the literal name, mirroring the item-rarity
/// naming convention the game's own TweakDB records use.
const AUTO_SUFFIX_PREFIXES: &[&str] = &["Items.", "AttachmentSlots."];
const AUTO_SUFFIXES: &[&str] = &["_Rare", "_Epic", "_Legendary"];

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TweakDbIdError {
    #[error("name is {0} bytes long, TweakDBID length byte only holds up to 255")]
    NameTooLong(usize),
}

/// `{ crc: u32, slen: u8, offset: [u8; 3] }` packed into a `u64`. The
/// `offset` field tracks nested/child TweakDB records; serialization masks
/// the value to its low 40 bits (CRC + length), per §4.B.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TweakDbId {
    crc: u32,
    slen: u8,
    offset: [u8; 3],
}

impl TweakDbId {
    pub fn new(name: &str) -> Result<Self, TweakDbIdError> {
        if name.len() > u8::MAX as usize {
            return Err(TweakDbIdError::NameTooLong(name.len()));
        }
        Ok(Self {
            crc: crc32(name.as_bytes(), 0),
            slen: name.len() as u8,
            offset: [0; 3],
        })
    }

    /// Reconstruct from the raw 40-bit on-disk value (CRC + length), with
    /// no name available. Used when deserializing a property value that
    /// only carries the packed id, not the string it was hashed from.
    pub fn from_raw_parts(crc: u32, slen: u8) -> Self {
        Self { crc, slen, offset: [0; 3] }
    }

    /// Unpack from the masked 40-bit on-disk `u64` (§4.B).
    pub fn from_disk_u64(v: u64) -> Self {
        Self::from_raw_parts((v & 0xFFFF_FFFF) as u32, ((v >> 32) & 0xFF) as u8)
    }

    pub fn crc(&self) -> u32 {
        self.crc
    }

    pub fn name_len(&self) -> u8 {
        self.slen
    }

    /// The 40 significant bits written to disk: CRC-32 in the low 32 bits,
    /// name length in the next byte.
    pub fn as_u64(&self) -> u64 {
        (self.crc as u64) | ((self.slen as u64) << 32)
    }
}

impl Add for TweakDbId {
    type Output = TweakDbId;

    /// Concatenation: combine CRCs length-aware, sum lengths. Matches the
    /// original's `operator+=`.
    fn add(self, rhs: TweakDbId) -> TweakDbId {
        TweakDbId {
            crc: crc32_combine(self.crc, rhs.crc, rhs.slen as u64),
            slen: self.slen.wrapping_add(rhs.slen),
            offset: rhs.offset,
        }
    }
}

impl fmt::Display for TweakDbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<tdbid:{:010x}>", self.as_u64())
    }
}

/// Reverse-lookup registry for `TweakDBID`s, seeded from
/// `db/TweakDBIDs.json` (§6.5, §4.L).
#[derive(Default)]
pub struct TweakDbIdResolver {
    sorted_names: RwLock<Vec<Arc<str>>>,
    by_hash: RwLock<FxHashMap<u64, Arc<str>>>,
}

impl TweakDbIdResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`, plus any category-suffixed variants its prefix
    /// implies (§4.B) — a resolver-seeding convenience that only affects
    /// what names are *offered* for reverse lookup, never the hash itself.
    pub fn register(&self, name: &str) -> Result<TweakDbId, TweakDbIdError> {
        let id = self.register_one(name)?;

        if let Some(prefix) = AUTO_SUFFIX_PREFIXES.iter().find(|p| name.starts_with(**p)) {
            let _ = prefix;
            for suffix in AUTO_SUFFIXES {
                let variant = format!("{name}{suffix}");
                // Auto-registered variants may exceed the length cap; skip
                // rather than fail the caller's primary registration.
                let _ = self.register_one(&variant);
            }
        }

        Ok(id)
    }

    fn register_one(&self, name: &str) -> Result<TweakDbId, TweakDbIdError> {
        let id = TweakDbId::new(name)?;
        let mut by_hash = self.by_hash.write();
        if !by_hash.contains_key(&id.as_u64()) {
            let arc: Arc<str> = Arc::from(name);
            by_hash.insert(id.as_u64(), arc.clone());
            drop(by_hash);
            let mut sorted = self.sorted_names.write();
            let pos = sorted.partition_point(|n| n.as_ref() < name);
            sorted.insert(pos, arc);
        }
        Ok(id)
    }

    pub fn get(&self, id: &TweakDbId) -> Option<Arc<str>> {
        self.by_hash.read().get(&id.as_u64()).cloned()
    }

    /// Sorted names, suitable for a UI picker list.
    pub fn names(&self) -> Vec<Arc<str>> {
        self.sorted_names.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s3_concat_matches_direct_hash() {
        let a = TweakDbId::new("Items.").unwrap();
        let b = TweakDbId::new("Preset_Q000_Melee").unwrap();
        let direct = TweakDbId::new("Items.Preset_Q000_Melee").unwrap();
        assert_eq!(a + b, direct);
    }

    #[test]
    fn as_u64_is_masked_to_40_bits() {
        let id = TweakDbId::new("some_name").unwrap();
        assert_eq!(id.as_u64() >> 40, 0);
    }

    #[test]
    fn register_auto_suffixes_item_rarities() {
        let resolver = TweakDbIdResolver::new();
        resolver.register("Items.Preset_Basic").unwrap();
        let rare = TweakDbId::new("Items.Preset_Basic_Rare").unwrap();
        assert_eq!(resolver.get(&rare).as_deref(), Some("Items.Preset_Basic_Rare"));
    }

    #[test]
    fn register_without_matching_prefix_adds_no_suffixes() {
        let resolver = TweakDbIdResolver::new();
        resolver.register("Vehicle.basic_car").unwrap();
        let rare = TweakDbId::new("Vehicle.basic_car_Rare").unwrap();
        assert_eq!(resolver.get(&rare), None);
    }

    #[test]
    fn name_too_long_is_rejected() {
        let long = "x".repeat(300);
        assert!(matches!(
            TweakDbId::new(&long),
            Err(TweakDbIdError::NameTooLong(300))
        ));
    }
}
