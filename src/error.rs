//! Error types for the index structures.

use thiserror::Error;

/// Error variants for index operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A serialized structure failed validation during decoding.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// An I/O error occurred during serialization or deserialization.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for index operations.
pub type Result<T> = std::result::Result<T, Error>;
