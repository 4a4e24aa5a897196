use thiserror::Error;

/// Errors from block cache configuration and loading.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Rejected cache parameters.
    #[error("invalid cache configuration: {0}")]
    InvalidConfiguration(String),

    /// A read past the end of the underlying file.
    #[error("position {position} is beyond the end of the source ({size} bytes)")]
    OutOfRange { position: u64, size: u64 },

    /// I/O error from the block source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
