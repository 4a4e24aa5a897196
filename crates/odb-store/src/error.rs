use std::io;

use odb_cache::CacheError;
use odb_pack::PackError;
use odb_types::{ObjectId, ObjectKind, TypeError};
use thiserror::Error;

/// Errors from object database operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Not found in loose storage, any pack, or any alternate.
    #[error("missing object: {0}")]
    MissingObject(ObjectId),

    #[error("object {id} is a {actual}, expected a {expected}")]
    IncorrectObjectType {
        id: ObjectId,
        expected: ObjectKind,
        actual: ObjectKind,
    },

    /// The caller asked for the bytes of an object above the streaming
    /// threshold; it must be streamed instead.
    #[error("object {id} is too large to materialize ({size} bytes, limit {limit})")]
    ObjectTooLarge { id: ObjectId, size: u64, limit: u64 },

    /// A loose object that cannot be decoded or does not hash to its name.
    #[error("corrupt object {id}: {reason}")]
    CorruptObject { id: ObjectId, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Pack(#[from] PackError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    pub(crate) fn corrupt(id: ObjectId, reason: impl Into<String>) -> Self {
        Self::CorruptObject {
            id,
            reason: reason.into(),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
