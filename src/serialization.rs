//! Value encoding for cache payloads.
//!
//! Values are encoded with Postcard inside a small versioned envelope:
//!
//! ```text
//! [MAGIC: 4 bytes] [VERSION: 4 bytes, little-endian] [POSTCARD PAYLOAD]
//! ```
//!
//! The envelope lets a reader reject foreign or stale bytes before handing
//! them to Postcard.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Envelope magic.
pub const CACHE_MAGIC: [u8; 4] = *b"NXTC";

/// Bump when the encoding of cached values changes incompatibly.
pub const SCHEMA_VERSION: u32 = 1;

const HEADER_LEN: usize = 8;

/// Encode `value` into an enveloped payload.
pub fn serialize_for_cache<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let body = postcard::to_allocvec(value)
        .map_err(|e| Error::SerializationError(e.to_string()))?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
    bytes.extend_from_slice(&CACHE_MAGIC);
    bytes.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

/// Decode an enveloped payload.
///
/// # Errors
///
/// - `Error::InvalidCacheEntry`: too short or bad magic
/// - `Error::VersionMismatch`: written by another schema version
/// - `Error::DeserializationError`: Postcard rejected the body
pub fn deserialize_from_cache<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::InvalidCacheEntry(format!(
            "payload too short: {} bytes",
            bytes.len()
        )));
    }

    if bytes[..4] != CACHE_MAGIC {
        return Err(Error::InvalidCacheEntry("bad magic header".to_string()));
    }

    let mut version = [0u8; 4];
    version.copy_from_slice(&bytes[4..HEADER_LEN]);
    let found = u32::from_le_bytes(version);
    if found != SCHEMA_VERSION {
        return Err(Error::VersionMismatch {
            expected: SCHEMA_VERSION,
            found,
        });
    }

    postcard::from_bytes(&bytes[HEADER_LEN..])
        .map_err(|e| Error::DeserializationError(e.to_string()))
}
