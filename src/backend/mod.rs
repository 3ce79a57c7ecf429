//! Cache backend contract and implementations.
//!
//! A backend stores each entry as two halves: a payload in its own medium
//! and a [`MetadataRecord`](crate::meta::MetadataRecord) in a
//! [`MetaStore`](crate::meta::MetaStore). The generic protocol (lifetimes,
//! integrity digests, lazy eviction, touch) lives in [`EntryEngine`]; each
//! backend contributes a [`PayloadStore`] and decides which clean modes it
//! supports.

mod engine;
pub mod file;
pub mod memory;

pub use engine::EntryEngine;
pub use file::FileBackend;
pub use memory::SharedMemoryBackend;

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::future::Future;

/// Scope of a [`CacheBackend::clean`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CleanMode {
    /// Every entry in the backend's namespace.
    All,
    /// Only expired entries.
    Old,
    /// Entries owned by the user segment of a shared medium.
    User,
}

impl fmt::Display for CleanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanMode::All => write!(f, "all"),
            CleanMode::Old => write!(f, "old"),
            CleanMode::User => write!(f, "user"),
        }
    }
}

/// Outcome of a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    /// Absent, expired, or failed its integrity check.
    Miss,
    /// Entry is fresh but the medium returned no payload bytes.
    Empty,
    Hit(T),
}

impl<T> Lookup<T> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }

    /// `Some` for hits; misses and empty reads both mean "recompute".
    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Hit(value) => Some(value),
            Lookup::Miss | Lookup::Empty => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Lookup<U> {
        match self {
            Lookup::Hit(value) => Lookup::Hit(f(value)),
            Lookup::Miss => Lookup::Miss,
            Lookup::Empty => Lookup::Empty,
        }
    }
}

/// Physical storage for payload bytes.
///
/// Implementations only move bytes; freshness and integrity are decided by
/// [`EntryEngine`] from the metadata record.
pub trait PayloadStore: Send + Sync {
    /// Read the payload for `key`, `None` if the medium holds nothing.
    fn read(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Store `bytes` for `key`. `expire` is the entry's Unix expiry time, for
    /// media with native expiration.
    fn write(&self, key: &str, bytes: Vec<u8>, expire: u64)
        -> impl Future<Output = Result<()>> + Send;

    /// Delete the payload for `key`. Deleting a missing payload succeeds.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Whether the medium currently holds a payload for `key`.
    fn contains(&self, key: &str) -> impl Future<Output = Result<bool>> + Send;
}

/// Trait for cache backend implementations.
///
/// Data-path operations are best-effort: medium failures are logged and
/// reported as `false` or [`Lookup::Miss`], so callers can always treat a
/// falsy result as "recompute". Only [`clean`](CacheBackend::clean) returns
/// an error, for modes the backend cannot honour.
pub trait CacheBackend: Send + Sync {
    /// Stored payload bytes for `key`, exactly as written to the medium
    /// (compressed if the backend compresses).
    fn load(&self, key: &str) -> impl Future<Output = Lookup<Vec<u8>>> + Send;

    /// Decoded value for `key`.
    fn load_value<T>(&self, key: &str) -> impl Future<Output = Lookup<T>> + Send
    where
        T: DeserializeOwned + Send;

    /// Serialize `value` and store it under `key`, replacing any previous entry.
    ///
    /// A `ttl` of `None` or `Some(0)` uses the configured lifetime.
    fn add<T>(&self, key: &str, value: &T, ttl: Option<u64>) -> impl Future<Output = bool> + Send
    where
        T: Serialize + Sync + ?Sized;

    /// Store already-serialized bytes under `key`.
    fn add_serialized(
        &self,
        key: &str,
        bytes: Vec<u8>,
        ttl: Option<u64>,
    ) -> impl Future<Output = bool> + Send;

    /// Delete both halves of the entry. `true` only if both deletions succeed.
    fn remove(&self, key: &str) -> impl Future<Output = bool> + Send;

    /// Whether `key` holds a fresh entry. Expired entries are evicted.
    fn test(&self, key: &str) -> impl Future<Output = bool> + Send;

    /// Extend the lifetime of a fresh entry by `extra` seconds.
    fn touch(&self, key: &str, extra: i64) -> impl Future<Output = bool> + Send;

    /// Bulk removal.
    ///
    /// # Errors
    /// Returns `Error::UnsupportedOperation` for modes the backend cannot
    /// perform, and medium errors for the ones it can.
    fn clean(&self, mode: CleanMode) -> impl Future<Output = Result<bool>> + Send;
}
