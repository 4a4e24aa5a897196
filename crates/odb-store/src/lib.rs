//! The odb object database.
//!
//! An [`ObjectDatabase`] is one repository's `objects/` directory seen as a
//! single store: loose objects, every pack under `objects/pack`, and the
//! alternate databases listed in `objects/info/alternates`.
//!
//! # Lookup Order
//!
//! 1. Loose objects
//! 2. Packs, most recently modified first
//! 3. Packs again after one directory rescan, if the pack list changed
//! 4. Alternates, depth first, skipping any database already searched
//!
//! # Design Rules
//!
//! 1. Objects are immutable; writing one that exists is a no-op.
//! 2. The pack list is a snapshot replaced wholesale, never edited.
//! 3. Loaders keep their pack handles, so a repack never invalidates a read
//!    already under way.
//! 4. Corruption is always reported, never skipped.

pub mod alternates;
pub mod config;
pub mod database;
pub mod error;
pub mod inserter;
pub mod loader;
pub mod loose;
pub mod pack_directory;

pub use config::DatabaseConfig;
pub use database::{ObjectDatabase, RepackReport, RESOLVE_LIMIT};
pub use error::{StoreError, StoreResult};
pub use inserter::ObjectInserter;
pub use loader::{ObjectLoader, ObjectSource};
pub use loose::{LooseObjects, LooseStream};
pub use pack_directory::PackList;
