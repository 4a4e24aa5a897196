//! Auxiliary indexes used inside odb.
//!
//! - [`SortedList`]: immutable, name-sorted list rebuilt wholesale
//!   (copy-on-write) rather than mutated in place
//! - [`LongMap`], [`ObjectIdMap`], [`ObjectIdSet`]: maps over keys that are
//!   already uniformly distributed, hashed with `ahash`

pub mod id_map;
pub mod sorted_list;

pub use id_map::{IdBuildHasher, LongMap, ObjectIdMap, ObjectIdSet};
pub use sorted_list::{Named, SortedList, SortedListBuilder};
