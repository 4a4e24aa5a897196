//! Git pack files for odb.
//!
//! Reads and writes the git pack (v2/v3) and pack index (v2) formats, with
//! zlib payloads, OFS/REF deltas, and random access through the shared
//! block cache.
//!
//! # Architecture
//!
//! - **Entry codec** ([`header`]): pack header, entry type and size, OFS
//!   distances
//! - **Pack index** ([`PackIndex`]): fan-out table + sorted ids, memory-mapped
//! - **Deltas** ([`delta`]): applying and computing git delta streams
//! - **DeltaResolver**: walks delta chains to whole objects, with a depth
//!   limit and a per-read memo
//! - **PackFile**: an open pack + index, read through the block cache
//! - **PackWriter**: builds packs with delta compression

pub mod cursor;
pub mod delta;
pub mod error;
pub mod header;
pub mod index;
pub mod pack;
pub mod resolver;
pub mod writer;

#[cfg(test)]
pub(crate) mod test_support;

pub use cursor::PackCursor;
pub use delta::{apply_delta, compute_delta, DeltaEncoder};
pub use error::{PackError, PackResult};
pub use header::{EntryHeader, EntryKind, PackHeader};
pub use index::{IndexEntry, PackIndex};
pub use pack::{PackFile, PackStream, VerifyReport};
pub use resolver::{DeltaResolver, ObjectInfo, PackObject, ResolveMemo, DEFAULT_MAX_DELTA_DEPTH};
pub use writer::{PackWriter, PackWriterConfig, WrittenPack};
