//! Backend-independent entry protocol.

use super::{Lookup, PayloadStore};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::key::validate as validate_key;
use crate::meta::{MetaStore, MetadataRecord};
use crate::observability::{CacheMetrics, NoOpMetrics};
use crate::options::BackendOptions;
use crate::serialization;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Instant;

/// Shared entry logic composed into every backend.
///
/// Owns the resolved options, the metadata store, and the clock. All
/// operations are generic over the payload medium.
#[derive(Clone)]
pub struct EntryEngine {
    options: BackendOptions,
    compression: Option<Compression>,
    meta: MetaStore,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn CacheMetrics>,
}

impl EntryEngine {
    pub fn new(options: BackendOptions, meta: MetaStore) -> Self {
        EntryEngine {
            options,
            compression: None,
            meta,
            clock: Arc::new(SystemClock),
            metrics: Arc::new(NoOpMetrics),
        }
    }

    /// Gzip payloads at `level` (0-9) before storing them.
    pub fn with_compression(mut self, level: u32) -> Self {
        self.compression = Some(Compression::new(level));
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn options(&self) -> &BackendOptions {
        &self.options
    }

    pub fn meta(&self) -> &MetaStore {
        &self.meta
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Requested TTL if positive, the configured lifetime otherwise.
    pub fn life_time_for(&self, ttl: Option<u64>) -> u64 {
        match ttl {
            Some(secs) if secs > 0 => secs,
            _ => self.options.life_time,
        }
    }

    /// Build the metadata record for freshly stored bytes.
    pub fn metadata(&self, stored: &[u8], life_time: u64, compressed: bool) -> MetadataRecord {
        let algorithm = self.options.security.hash_algorithm;
        MetadataRecord {
            cache_control: algorithm,
            hash: self
                .options
                .security
                .test_validity
                .then(|| algorithm.digest(stored)),
            compressed,
            m_time: self.now(),
            life_time,
        }
    }

    fn compress(&self, serialized: Vec<u8>) -> Result<(Vec<u8>, bool)> {
        let Some(level) = self.compression else {
            return Ok((serialized, false));
        };
        let mut encoder = GzEncoder::new(Vec::new(), level);
        encoder.write_all(&serialized)?;
        Ok((encoder.finish()?, true))
    }

    /// Stored bytes back to serialized bytes.
    pub fn decompress(&self, record: &MetadataRecord, stored: Vec<u8>) -> Result<Vec<u8>> {
        if !record.compressed {
            return Ok(stored);
        }
        let mut decoder = GzDecoder::new(stored.as_slice());
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).map_err(|e| {
            Error::InvalidCacheEntry(format!("gzip payload could not be inflated: {}", e))
        })?;
        Ok(out)
    }

    /// Write both halves of an entry; `true` only if the payload write succeeds.
    pub async fn add<S: PayloadStore>(
        &self,
        store: &S,
        key: &str,
        serialized: Vec<u8>,
        ttl: Option<u64>,
    ) -> bool {
        if let Err(e) = validate_key(key) {
            warn!("Refusing to store entry: {}", e);
            return false;
        }

        let (stored, compressed) = match self.compress(serialized) {
            Ok(pair) => pair,
            Err(e) => {
                self.metrics.record_error(key, &e.to_string());
                return false;
            }
        };

        let record = self.metadata(&stored, self.life_time_for(ttl), compressed);
        self.write_entry(store, key, stored, &record).await
    }

    async fn write_entry<S: PayloadStore>(
        &self,
        store: &S,
        key: &str,
        stored: Vec<u8>,
        record: &MetadataRecord,
    ) -> bool {
        if let Err(e) = self.meta.write(key, record).await {
            self.metrics.record_error(key, &e.to_string());
            return false;
        }

        let size = stored.len();
        match store.write(key, stored, record.expire()).await {
            Ok(()) => {
                debug!(
                    "✓ Cache ADD {} ({} bytes, lifetime {}s)",
                    key, size, record.life_time
                );
                true
            }
            Err(e) => {
                self.metrics.record_error(key, &e.to_string());
                // Leave no metadata behind for a payload that was never written.
                if let Err(e) = self.meta.delete(key).await {
                    warn!("Metadata rollback failed for {}: {}", key, e);
                    self.metrics.record_error(key, &e.to_string());
                }
                false
            }
        }
    }

    /// Metadata record of a fresh entry, evicting it if expired.
    async fn fresh_record<S: PayloadStore>(&self, store: &S, key: &str) -> Option<MetadataRecord> {
        if validate_key(key).is_err() {
            return None;
        }

        let record = self.meta.load(key).await?;

        if record.is_expired_at(self.now()) {
            debug!("Cache entry {} expired at {}", key, record.expire());
            self.remove(store, key).await;
            self.metrics.record_eviction(key);
            return None;
        }

        match store.contains(key).await {
            Ok(true) => Some(record),
            Ok(false) => None,
            Err(e) => {
                self.metrics.record_error(key, &e.to_string());
                None
            }
        }
    }

    pub async fn test<S: PayloadStore>(&self, store: &S, key: &str) -> bool {
        self.fresh_record(store, key).await.is_some()
    }

    /// Read a fresh entry and check its digest.
    async fn read_verified<S: PayloadStore>(
        &self,
        store: &S,
        key: &str,
    ) -> Lookup<(MetadataRecord, Vec<u8>)> {
        let Some(record) = self.fresh_record(store, key).await else {
            return Lookup::Miss;
        };

        let stored = match store.read(key).await {
            Ok(Some(bytes)) if !bytes.is_empty() => bytes,
            Ok(_) => return Lookup::Empty,
            Err(e) => {
                self.metrics.record_error(key, &e.to_string());
                return Lookup::Empty;
            }
        };

        if self.options.security.test_validity {
            if let Some(expected) = &record.hash {
                if !record.cache_control.verify(&stored, expected) {
                    self.metrics.record_corrupted(key);
                    if self.options.security.remove_corrupted {
                        warn!("Removing corrupted cache entry {}", key);
                        self.remove(store, key).await;
                    } else {
                        warn!("Cache entry {} failed integrity check, left in place", key);
                    }
                    return Lookup::Miss;
                }
            }
        }

        Lookup::Hit((record, stored))
    }

    pub async fn load<S: PayloadStore>(&self, store: &S, key: &str) -> Lookup<Vec<u8>> {
        let timer = Instant::now();
        let result = self.read_verified(store, key).await.map(|(_, stored)| stored);
        self.record_lookup(key, result.is_hit(), timer);
        result
    }

    pub async fn load_value<S, T>(&self, store: &S, key: &str) -> Lookup<T>
    where
        S: PayloadStore,
        T: DeserializeOwned,
    {
        let timer = Instant::now();
        let result = match self.read_verified(store, key).await {
            Lookup::Hit((record, stored)) => match self.decode(&record, stored) {
                Ok(value) => Lookup::Hit(value),
                Err(e) => {
                    warn!("Cache entry {} could not be decoded: {}", key, e);
                    self.metrics.record_corrupted(key);
                    if self.options.security.remove_corrupted {
                        self.remove(store, key).await;
                    }
                    Lookup::Miss
                }
            },
            Lookup::Empty => Lookup::Empty,
            Lookup::Miss => Lookup::Miss,
        };
        self.record_lookup(key, result.is_hit(), timer);
        result
    }

    fn decode<T: DeserializeOwned>(&self, record: &MetadataRecord, stored: Vec<u8>) -> Result<T> {
        let serialized = self.decompress(record, stored)?;
        serialization::deserialize_from_cache(&serialized)
    }

    fn record_lookup(&self, key: &str, hit: bool, timer: Instant) {
        if hit {
            debug!("✓ Cache LOAD {} -> HIT", key);
            self.metrics.record_hit(key, timer.elapsed());
        } else {
            debug!("✓ Cache LOAD {} -> MISS", key);
            self.metrics.record_miss(key, timer.elapsed());
        }
    }

    fn removal_succeeded(&self, key: &str, result: Result<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                self.metrics.record_error(key, &e.to_string());
                false
            }
        }
    }

    /// Delete both halves, attempting each regardless of the other.
    pub async fn remove<S: PayloadStore>(&self, store: &S, key: &str) -> bool {
        if validate_key(key).is_err() {
            return false;
        }

        let (meta_result, payload_result) =
            futures::join!(self.meta.delete(key), store.delete(key));
        let meta_removed = self.removal_succeeded(key, meta_result);
        let payload_removed = self.removal_succeeded(key, payload_result);

        if meta_removed && payload_removed {
            debug!("✓ Cache REMOVE {}", key);
        } else {
            warn!(
                "Partial removal of {} (metadata: {}, payload: {})",
                key, meta_removed, payload_removed
            );
        }
        meta_removed && payload_removed
    }

    /// Rewrite a fresh entry with its lifetime extended by `extra` seconds.
    ///
    /// `m_time` is kept, so the new expiry is the old one plus `extra`.
    pub async fn touch<S: PayloadStore>(&self, store: &S, key: &str, extra: i64) -> bool {
        let Lookup::Hit((record, stored)) = self.read_verified(store, key).await else {
            return false;
        };

        let previous = record.life_time;
        let touched = MetadataRecord {
            life_time: record.extended_life_time(extra),
            ..record
        };
        debug!(
            "Touching {}: lifetime {}s -> {}s",
            key, previous, touched.life_time
        );
        self.write_entry(store, key, stored, &touched).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;
    use crate::hash::HashAlgorithm;
    use crate::options::OptionsLayer;
    use dashmap::DashMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Payload medium whose writes and deletes can be made to fail.
    #[derive(Default)]
    struct FlakyStore {
        slots: DashMap<String, Vec<u8>>,
        fail_write: AtomicBool,
        fail_delete: AtomicBool,
        /// Replaced by a plain file when a write fails, breaking the metadata directory.
        break_on_write_failure: Option<PathBuf>,
    }

    impl PayloadStore for FlakyStore {
        async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
            Ok(self.slots.get(key).map(|v| v.clone()))
        }

        async fn write(&self, key: &str, bytes: Vec<u8>, _expire: u64) -> Result<()> {
            if self.fail_write.load(Ordering::SeqCst) {
                if let Some(dir) = &self.break_on_write_failure {
                    std::fs::remove_dir_all(dir)?;
                    std::fs::write(dir, b"not a directory")?;
                }
                return Err(Error::BackendError("disk full".to_string()));
            }
            self.slots.insert(key.to_string(), bytes);
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<()> {
            if self.fail_delete.load(Ordering::SeqCst) {
                return Err(Error::BackendError("device busy".to_string()));
            }
            self.slots.remove(key);
            Ok(())
        }

        async fn contains(&self, key: &str) -> Result<bool> {
            Ok(self.slots.contains_key(key))
        }
    }

    #[derive(Default)]
    struct ErrorCount(AtomicUsize);

    impl CacheMetrics for ErrorCount {
        fn record_error(&self, _key: &str, _error: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn engine(layer: OptionsLayer) -> EntryEngine {
        let options = BackendOptions::merged([&layer]).unwrap();
        EntryEngine::new(options, MetaStore::in_memory())
            .with_clock(Arc::new(SimulatedClock::new(1_000)))
    }

    #[test]
    fn test_life_time_for() {
        let engine = engine(OptionsLayer::default().life_time(300));
        assert_eq!(engine.life_time_for(Some(10)), 10);
        assert_eq!(engine.life_time_for(Some(0)), 300);
        assert_eq!(engine.life_time_for(None), 300);
    }

    #[test]
    fn test_metadata_record() {
        let engine = engine(OptionsLayer::default().hash_algorithm(HashAlgorithm::Crc32));
        let record = engine.metadata(b"abc", 60, false);

        assert_eq!(record.cache_control, HashAlgorithm::Crc32);
        assert_eq!(record.hash.as_deref(), Some("352441c2"));
        assert_eq!(record.m_time, 1_000);
        assert_eq!(record.expire(), 1_060);
    }

    #[test]
    fn test_metadata_without_validity_has_no_hash() {
        let engine = engine(OptionsLayer::default().test_validity(false));
        assert!(engine.metadata(b"abc", 60, false).hash.is_none());
    }

    #[test]
    fn test_compression_roundtrip() {
        let engine = engine(OptionsLayer::default()).with_compression(9);
        let input = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_vec();

        let (stored, compressed) = engine.compress(input.clone()).unwrap();
        assert!(compressed);
        assert_ne!(stored, input);

        let record = engine.metadata(&stored, 60, compressed);
        assert_eq!(engine.decompress(&record, stored).unwrap(), input);
    }

    #[test]
    fn test_decompress_rejects_garbage() {
        let engine = engine(OptionsLayer::default());
        let record = engine.metadata(b"junk", 60, true);
        let err = engine.decompress(&record, b"junk".to_vec()).unwrap_err();
        assert!(matches!(err, Error::InvalidCacheEntry(_)));
    }

    #[tokio::test]
    async fn test_failed_payload_write_rolls_back_metadata() {
        let errors = Arc::new(ErrorCount::default());
        let engine = engine(OptionsLayer::default()).with_metrics(errors.clone());
        let store = FlakyStore::default();
        store.fail_write.store(true, Ordering::SeqCst);

        assert!(!engine.add(&store, "k", b"value".to_vec(), None).await);
        assert!(engine.meta().load("k").await.is_none());
        assert!(!engine.test(&store, "k").await);
        assert_eq!(errors.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_rollback_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let meta_dir = dir.path().join("meta");
        let meta = MetaStore::directory(&meta_dir, "").await.unwrap();
        let errors = Arc::new(ErrorCount::default());
        let engine = EntryEngine::new(BackendOptions::default(), meta)
            .with_metrics(errors.clone());
        let store = FlakyStore {
            break_on_write_failure: Some(meta_dir),
            ..Default::default()
        };
        store.fail_write.store(true, Ordering::SeqCst);

        assert!(!engine.add(&store, "k", b"value".to_vec(), None).await);
        // payload write plus metadata rollback
        assert_eq!(errors.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_partial_remove_reports_failure_and_can_be_retried() {
        let errors = Arc::new(ErrorCount::default());
        let engine = engine(OptionsLayer::default()).with_metrics(errors.clone());
        let store = FlakyStore::default();
        assert!(engine.add(&store, "k", b"value".to_vec(), None).await);

        store.fail_delete.store(true, Ordering::SeqCst);
        assert!(!engine.remove(&store, "k").await);
        assert!(engine.meta().load("k").await.is_none());
        assert!(store.slots.contains_key("k"));
        assert_eq!(errors.0.load(Ordering::SeqCst), 1);

        store.fail_delete.store(false, Ordering::SeqCst);
        assert!(engine.remove(&store, "k").await);
        assert!(!store.slots.contains_key("k"));
    }
}
