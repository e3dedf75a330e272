//! Bundles the resolvers and lookup tables `cp_compat::namedb` loads from
//! `--db-root`, so commands that render or accept hashed names don't each
//! have to repeat the load calls (§4.L, §4.N).

use std::path::Path;

use cp_compat::namedb::{self, EnumDb, FactDb};
use cp_compat::{CNameResolver, TweakDbIdResolver};

#[derive(Default)]
pub struct NameDbs {
    pub cnames: CNameResolver,
    pub tweakdbids: TweakDbIdResolver,
    pub enums: EnumDb,
    pub facts: FactDb,
}

impl NameDbs {
    /// Load every database rooted at `db_root`. Each load is independent
    /// and non-fatal (`namedb`'s own `warn`-and-degrade contract); with no
    /// `db_root` at all, every resolver stays empty.
    pub fn load(db_root: Option<&Path>) -> Self {
        let dbs = Self::default();
        if let Some(root) = db_root {
            namedb::load_cnames(root, &dbs.cnames);
            namedb::load_tweakdbids(root, &dbs.tweakdbids);
        }
        Self {
            enums: db_root.map(namedb::load_enums).unwrap_or_default(),
            facts: db_root.map(namedb::load_facts).unwrap_or_default(),
            ..dbs
        }
    }
}
