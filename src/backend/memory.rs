//! Shared-memory cache backend.
//!
//! Payloads live in a process-wide concurrent map whose slots carry their own
//! expiry, the way a shared-memory user cache does. The metadata record stays
//! the authority on freshness; a slot's native expiry only hides payloads
//! that outlive their record.

use super::{CacheBackend, CleanMode, EntryEngine, Lookup, PayloadStore};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::meta::MetaStore;
use crate::observability::CacheMetrics;
use crate::options::{BackendOptions, OptionsLayer};
use crate::serialization;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Slot {
    bytes: Vec<u8>,
    expire: u64,
}

/// Concurrent map medium with per-slot expiry.
#[derive(Clone)]
pub struct SharedMemoryStore {
    slots: Arc<DashMap<String, Slot>>,
    clock: Arc<dyn Clock>,
}

impl SharedMemoryStore {
    fn new(clock: Arc<dyn Clock>) -> Self {
        SharedMemoryStore {
            slots: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Drop the slot if its native expiry has passed; `true` if still alive.
    ///
    /// The expiry check and the removal happen under one shard lock, so a
    /// slot rewritten by a concurrent `write` is never dropped.
    fn alive(&self, key: &str) -> bool {
        let now = self.clock.now();
        if self
            .slots
            .remove_if(key, |_, slot| now >= slot.expire)
            .is_some()
        {
            return false;
        }
        self.slots.contains_key(key)
    }

    fn clear(&self) {
        self.slots.clear();
    }

    fn len(&self) -> usize {
        self.slots.len()
    }
}

impl PayloadStore for SharedMemoryStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if !self.alive(key) {
            return Ok(None);
        }
        Ok(self.slots.get(key).map(|slot| slot.bytes.clone()))
    }

    async fn write(&self, key: &str, bytes: Vec<u8>, expire: u64) -> Result<()> {
        self.slots.insert(key.to_string(), Slot { bytes, expire });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.slots.remove(key);
        Ok(())
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.alive(key))
    }
}

/// In-process shared-memory backend.
///
/// Cheap to clone; clones share the same slots and metadata.
///
/// # Example
///
/// ```
/// # use next_cache::backend::{CacheBackend, SharedMemoryBackend};
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let backend = SharedMemoryBackend::new();
/// assert!(backend.add("greeting", "hello", Some(60)).await);
///
/// let value: Option<String> = backend.load_value("greeting").await.into_option();
/// assert_eq!(value.as_deref(), Some("hello"));
/// # }
/// ```
#[derive(Clone)]
pub struct SharedMemoryBackend {
    engine: EntryEngine,
    store: SharedMemoryStore,
}

impl SharedMemoryBackend {
    /// Backend with default options and in-memory metadata.
    pub fn new() -> Self {
        Self::from_parts(BackendOptions::default(), MetaStore::in_memory())
    }

    /// Backend with caller overrides merged over the defaults.
    ///
    /// Metadata is kept in memory unless `metadata.path` is set.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` for invalid options or an unusable
    /// metadata directory.
    pub async fn with_options(caller: &OptionsLayer) -> Result<Self> {
        let options = BackendOptions::merged([caller])?;
        let meta = match &options.metadata.path {
            Some(path) => {
                MetaStore::directory(path.clone(), options.metadata.file_prefix("")).await?
            }
            None => MetaStore::in_memory(),
        };
        Ok(Self::from_parts(options, meta))
    }

    fn from_parts(options: BackendOptions, meta: MetaStore) -> Self {
        let engine = EntryEngine::new(options, meta);
        let store = SharedMemoryStore::new(Arc::new(crate::clock::SystemClock));
        info!("✓ Shared-memory cache backend initialized");
        SharedMemoryBackend { engine, store }
    }

    /// Replace the time source used for metadata and slot expiry.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.store.clock = Arc::clone(&clock);
        self.engine = self.engine.with_clock(clock);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn CacheMetrics>) -> Self {
        self.engine = self.engine.with_metrics(metrics);
        self
    }

    pub fn options(&self) -> &BackendOptions {
        self.engine.options()
    }

    /// Metadata store, for inspection.
    pub fn meta(&self) -> &MetaStore {
        self.engine.meta()
    }

    /// Number of payload slots, including natively expired ones not yet dropped.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payload medium, for inspection.
    pub fn store(&self) -> &SharedMemoryStore {
        &self.store
    }
}

impl Default for SharedMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheBackend for SharedMemoryBackend {
    async fn load(&self, key: &str) -> Lookup<Vec<u8>> {
        self.engine.load(&self.store, key).await
    }

    async fn load_value<T>(&self, key: &str) -> Lookup<T>
    where
        T: DeserializeOwned + Send,
    {
        self.engine.load_value(&self.store, key).await
    }

    async fn add<T>(&self, key: &str, value: &T, ttl: Option<u64>) -> bool
    where
        T: Serialize + Sync + ?Sized,
    {
        match serialization::serialize_for_cache(value) {
            Ok(bytes) => self.engine.add(&self.store, key, bytes, ttl).await,
            Err(e) => {
                warn!("Cannot serialize value for {}: {}", key, e);
                false
            }
        }
    }

    async fn add_serialized(&self, key: &str, bytes: Vec<u8>, ttl: Option<u64>) -> bool {
        self.engine.add(&self.store, key, bytes, ttl).await
    }

    async fn remove(&self, key: &str) -> bool {
        self.engine.remove(&self.store, key).await
    }

    async fn test(&self, key: &str) -> bool {
        self.engine.test(&self.store, key).await
    }

    async fn touch(&self, key: &str, extra: i64) -> bool {
        self.engine.touch(&self.store, key, extra).await
    }

    async fn clean(&self, mode: CleanMode) -> Result<bool> {
        match mode {
            CleanMode::All | CleanMode::User => {
                self.store.clear();
                self.engine.meta().clear().await?;
                warn!("⚠ Shared-memory cache cleared ({})", mode);
                Ok(true)
            }
            CleanMode::Old => Err(Error::UnsupportedOperation(
                "shared-memory backend cannot clean old entries".to_string(),
            )),
        }
    }
}
