//! Foundational primitives shared by the archive and save-file crates:
//! hashing, interned strings, name handles, resource paths, the binary
//! stream abstraction, and compression glue.

pub mod cname;
pub mod compress;
pub mod hash;
pub mod namedb;
pub mod path;
pub mod stream;
pub mod string_pool;
pub mod tweakdbid;

pub use cname::{CName, CNameResolver};
pub use path::{Path, PathId};
pub use string_pool::{SharedStringPool, StringPool};
pub use tweakdbid::{TweakDbId, TweakDbIdResolver};
