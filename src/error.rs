//! Error types for cache operations.

use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by cache backends and their configuration.
///
/// Data-path operations (`add`, `load`, `remove`, `test`, `touch`) never
/// return these to the caller; they are logged and folded into a miss.
/// Construction and `clean` do surface them.
#[derive(Debug)]
pub enum Error {
    /// Invalid or unusable configuration (bad hash algorithm, missing directory, ...).
    ConfigError(String),

    /// The storage medium reported a failure.
    BackendError(String),

    /// The backend does not implement the requested operation.
    UnsupportedOperation(String),

    /// Cache key is empty or otherwise unusable.
    InvalidKey(String),

    /// Value could not be encoded for storage.
    SerializationError(String),

    /// Stored bytes could not be decoded back into a value.
    DeserializationError(String),

    /// Stored bytes are not a valid cache envelope.
    InvalidCacheEntry(String),

    /// Envelope was written by an incompatible schema version.
    VersionMismatch { expected: u32, found: u32 },

    /// Filesystem failure.
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::UnsupportedOperation(msg) => write!(f, "Unsupported operation: {}", msg),
            Error::InvalidKey(msg) => write!(f, "Invalid cache key: {}", msg),
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::InvalidCacheEntry(msg) => write!(f, "Invalid cache entry: {}", msg),
            Error::VersionMismatch { expected, found } => write!(
                f,
                "Cache schema version mismatch: expected {}, found {}",
                expected, found
            ),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
