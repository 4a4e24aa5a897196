use std::io;

use odb_cache::CacheError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PackError {
    /// Malformed pack data: bad header, varint, type tag, delta, or checksum.
    #[error("corrupt pack at offset {offset}: {reason}")]
    CorruptPack { offset: u64, reason: String },

    #[error("corrupt pack index: {0}")]
    CorruptIndex(String),

    /// A delta chain needed more hops than allowed.
    #[error("delta chain starting at offset {offset} exceeds {limit} hops")]
    DeltaChainTooDeep { offset: u64, limit: usize },

    #[error("unsupported pack version: {0}")]
    UnsupportedVersion(u32),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("block cache error: {0}")]
    Cache(#[from] CacheError),
}

impl PackError {
    pub(crate) fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        Self::CorruptPack {
            offset,
            reason: reason.into(),
        }
    }

    /// Attach a pack position to corruption detected in position-less code
    /// such as delta application.
    pub(crate) fn at(self, offset: u64) -> Self {
        match self {
            Self::CorruptPack { offset: 0, reason } => Self::CorruptPack { offset, reason },
            other => other,
        }
    }

    /// Classify an error surfaced through `io::Read` while decoding an entry.
    /// Stream-level failures (bad deflate data, early end) are corruption.
    pub(crate) fn from_read(offset: u64, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::InvalidInput
            | io::ErrorKind::InvalidData
            | io::ErrorKind::UnexpectedEof => Self::corrupt(offset, err.to_string()),
            _ => Self::Io(err),
        }
    }
}

pub type PackResult<T> = Result<T, PackError>;
