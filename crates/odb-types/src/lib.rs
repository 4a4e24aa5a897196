//! Foundation types for odb.
//!
//! Every other odb crate depends on `odb-types`.
//!
//! # Key Types
//!
//! - [`ObjectId`]: content hash naming a stored object (SHA-1 or SHA-256)
//! - [`AbbreviatedObjectId`]: nibble-resolution prefix of an identifier
//! - [`ObjectKind`]: commit, tree, blob, or tag
//! - [`HashAlgorithm`] / [`ObjectHasher`]: object hashing with git framing

pub mod abbrev;
pub mod error;
pub mod hash;
pub mod kind;
pub mod object;

pub use abbrev::AbbreviatedObjectId;
pub use error::TypeError;
pub use hash::{hash_object, object_header, HashAlgorithm, ObjectHasher};
pub use kind::ObjectKind;
pub use object::ObjectId;
