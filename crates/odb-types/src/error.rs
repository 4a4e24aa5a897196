use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid object identifier: {0}")]
    InvalidIdentifier(String),

    #[error("unknown object kind: {0}")]
    UnknownKind(String),
}
