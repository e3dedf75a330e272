//! Startup loaders for the name databases that seed [`crate::cname`] and
//! [`crate::tweakdbid`] resolvers (§4.L).
//!
//! Each load is independent and non-fatal: a missing or malformed file
//! degrades the corresponding resolver to empty and is logged at `warn`,
//! never aborting startup. Loading is an explicit function call, not a
//! side effect of crate initialization.

use std::path::Path;

use crate::cname::CNameResolver;
use crate::tweakdbid::TweakDbIdResolver;

#[derive(thiserror::Error, Debug)]
pub enum NameDbError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path} as JSON: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// `db/CEnums.json`: a map from enum type name to its ordered value names.
pub type EnumDb = std::collections::BTreeMap<String, Vec<String>>;

/// `db/CFacts.json`: a flat array of known fact names, hashed the same way
/// as `CName`.
pub type FactDb = Vec<String>;

fn load_json_array(path: &Path) -> Result<Vec<String>, NameDbError> {
    let text = std::fs::read_to_string(path).map_err(|source| NameDbError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| NameDbError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Load `db/CNames.json` into `resolver`. Logs and leaves the resolver
/// untouched on any failure.
pub fn load_cnames(root: &Path, resolver: &CNameResolver) {
    let path = root.join("CNames.json");
    match load_json_array(&path) {
        Ok(names) => {
            for name in &names {
                resolver.register(name);
            }
            tracing::info!(count = names.len(), path = %path.display(), "loaded CName database");
        }
        Err(e) => {
            tracing::warn!(error = %e, "CName database unavailable, names will render as hash placeholders");
        }
    }
}

/// Load `db/TweakDBIDs.json` into `resolver`.
pub fn load_tweakdbids(root: &Path, resolver: &TweakDbIdResolver) {
    let path = root.join("TweakDBIDs.json");
    match load_json_array(&path) {
        Ok(names) => {
            let mut loaded = 0usize;
            for name in &names {
                if resolver.register(name).is_ok() {
                    loaded += 1;
                } else {
                    tracing::warn!(name = %name, "skipping TweakDBID name, too long to encode");
                }
            }
            tracing::info!(count = loaded, path = %path.display(), "loaded TweakDBID database");
        }
        Err(e) => {
            tracing::warn!(error = %e, "TweakDBID database unavailable, names will render as hash placeholders");
        }
    }
}

/// Load the optional `db/CEnums.json`. Returns an empty map on failure.
pub fn load_enums(root: &Path) -> EnumDb {
    let path = root.join("CEnums.json");
    match std::fs::read_to_string(&path) {
        Ok(text) => match serde_json::from_str(&text) {
            Ok(db) => db,
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "CEnums database malformed, ignoring");
                EnumDb::new()
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "CEnums database unavailable");
            EnumDb::new()
        }
    }
}

/// Load the optional `db/CFacts.json`. Returns an empty list on failure.
pub fn load_facts(root: &Path) -> FactDb {
    load_json_array(&root.join("CFacts.json")).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "CFacts database unavailable");
        FactDb::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_cnames_degrades_to_empty_resolver() {
        let dir = tempdir().unwrap();
        let resolver = CNameResolver::new();
        load_cnames(dir.path(), &resolver);
        assert!(resolver.is_empty());
    }

    #[test]
    fn loads_well_formed_cnames() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("CNames.json"), r#"["PlayerPuppet", "Fists"]"#).unwrap();
        let resolver = CNameResolver::new();
        load_cnames(dir.path(), &resolver);
        assert_eq!(resolver.len(), 2);
    }

    #[test]
    fn malformed_json_degrades_without_panic() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("CNames.json"), "{ not valid json").unwrap();
        let resolver = CNameResolver::new();
        load_cnames(dir.path(), &resolver);
        assert!(resolver.is_empty());
    }

    #[test]
    fn loads_enum_db() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("CEnums.json"),
            r#"{"gamedataItemType": ["Weapon", "Clothing"]}"#,
        )
        .unwrap();
        let db = load_enums(dir.path());
        assert_eq!(db.get("gamedataItemType").unwrap().len(), 2);
    }

    #[test]
    fn missing_facts_degrades_to_empty() {
        let dir = tempdir().unwrap();
        assert!(load_facts(dir.path()).is_empty());
    }
}
