//! Block cache for odb pack files.
//!
//! Pack files are read in fixed-size, block-aligned chunks that are shared
//! by every reader of the process. Readers hold a [`BlockRef`] while they
//! use the bytes; unpinned blocks are evicted in batches once the cache
//! exceeds its capacity.
//!
//! # Key Types
//!
//! - [`BlockCache`]: the shared cache
//! - [`BlockCacheConfig`]: block size, capacity, and purge fraction
//! - [`BlockSource`]: anything the cache can read blocks from
//! - [`PackId`] / [`FileIdentity`]: handle and on-disk identities

pub mod block;
pub mod cache;
pub mod config;
pub mod error;
pub mod source;

pub use block::{Block, BlockRef};
pub use cache::{BlockCache, CacheStats};
pub use config::{BlockCacheConfig, MIN_BLOCK_SIZE};
pub use error::{CacheError, CacheResult};
pub use source::{BlockSource, FileIdentity, PackId};
