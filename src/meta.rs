//! Metadata side-channel.
//!
//! Each cache entry pairs a payload with a [`MetadataRecord`] stored under the
//! same key but in a separate medium, so freshness and integrity can be
//! decided without reading (or decompressing) the payload itself.

use crate::error::{Error, Result};
use crate::fsio;
use crate::hash::HashAlgorithm;
use crate::key::{file_id, is_file_id};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

const RECORD_EXTENSION: &str = "meta";

/// Per-entry metadata.
///
/// `expire` is derived from `m_time + life_time` and never stored on its own;
/// the persisted form carries it for readers of the raw records only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredRecord", into = "StoredRecord")]
pub struct MetadataRecord {
    /// Algorithm the digest was computed with (`cacheControl`).
    pub cache_control: HashAlgorithm,
    /// Digest of the stored payload bytes, `None` when integrity checks are off.
    pub hash: Option<String>,
    pub compressed: bool,
    /// Unix seconds when the entry was written.
    pub m_time: u64,
    /// Lifetime in seconds.
    pub life_time: u64,
}

impl MetadataRecord {
    pub fn expire(&self) -> u64 {
        self.m_time.saturating_add(self.life_time)
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expire()
    }

    /// Lifetime after a touch by `extra` seconds.
    ///
    /// A result that would not be positive keeps the current lifetime.
    pub fn extended_life_time(&self, extra: i64) -> u64 {
        let extended = i128::from(self.life_time) + i128::from(extra);
        if extended <= 0 {
            self.life_time
        } else {
            u64::try_from(extended).unwrap_or(u64::MAX)
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRecord {
    cache_control: HashAlgorithm,
    hash: Option<String>,
    compressed: bool,
    m_time: u64,
    life_time: u64,
    #[serde(default)]
    expire: u64,
}

impl From<StoredRecord> for MetadataRecord {
    fn from(stored: StoredRecord) -> Self {
        MetadataRecord {
            cache_control: stored.cache_control,
            hash: stored.hash,
            compressed: stored.compressed,
            m_time: stored.m_time,
            life_time: stored.life_time,
        }
    }
}

impl From<MetadataRecord> for StoredRecord {
    fn from(record: MetadataRecord) -> Self {
        StoredRecord {
            expire: record.expire(),
            cache_control: record.cache_control,
            hash: record.hash,
            compressed: record.compressed,
            m_time: record.m_time,
            life_time: record.life_time,
        }
    }
}

#[derive(Clone, Debug)]
enum Medium {
    Directory { dir: PathBuf, prefix: String },
    Memory(Arc<DashMap<String, MetadataRecord>>),
}

/// Store mapping cache keys to metadata records.
///
/// Clones share the same medium.
#[derive(Clone, Debug)]
pub struct MetaStore {
    medium: Medium,
}

impl MetaStore {
    /// Records kept in process memory.
    pub fn in_memory() -> Self {
        MetaStore {
            medium: Medium::Memory(Arc::new(DashMap::new())),
        }
    }

    /// Records kept as JSON files under `path`, created if missing.
    ///
    /// Record files are named `{prefix}{md5(key)}.meta`. Stores with
    /// different prefixes can share a directory; [`MetaStore::clear`] only
    /// touches records carrying its own prefix.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if the directory cannot be created.
    pub async fn directory(path: impl Into<PathBuf>, prefix: impl Into<String>) -> Result<Self> {
        let path = path.into();
        fs::create_dir_all(&path).await.map_err(|e| {
            Error::ConfigError(format!(
                "Cannot create metadata directory {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(MetaStore {
            medium: Medium::Directory {
                dir: path,
                prefix: prefix.into(),
            },
        })
    }

    /// Directory backing this store, if any.
    pub fn path(&self) -> Option<&Path> {
        match &self.medium {
            Medium::Directory { dir, .. } => Some(dir),
            Medium::Memory(_) => None,
        }
    }

    fn record_path(dir: &Path, prefix: &str, key: &str) -> PathBuf {
        dir.join(format!("{}.{}", file_id(prefix, key), RECORD_EXTENSION))
    }

    /// Load the record for `key`.
    ///
    /// Unreadable or malformed records are logged and reported as absent.
    pub async fn load(&self, key: &str) -> Option<MetadataRecord> {
        match &self.medium {
            Medium::Memory(map) => map.get(key).map(|r| r.value().clone()),
            Medium::Directory { dir, prefix } => {
                let path = Self::record_path(dir, prefix, key);
                let bytes = match fsio::read_optional(&path).await {
                    Ok(Some(bytes)) => bytes,
                    Ok(None) => return None,
                    Err(e) => {
                        warn!("Metadata read failed for {}: {}", key, e);
                        return None;
                    }
                };
                match serde_json::from_slice(&bytes) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!("Malformed metadata record for {}: {}", key, e);
                        None
                    }
                }
            }
        }
    }

    /// Persist `record` for `key`, replacing any previous record.
    pub async fn write(&self, key: &str, record: &MetadataRecord) -> Result<()> {
        match &self.medium {
            Medium::Memory(map) => {
                map.insert(key.to_string(), record.clone());
                Ok(())
            }
            Medium::Directory { dir, prefix } => {
                let bytes = serde_json::to_vec(record)
                    .map_err(|e| Error::SerializationError(e.to_string()))?;
                fsio::write_atomic(&Self::record_path(dir, prefix, key), &bytes).await?;
                Ok(())
            }
        }
    }

    /// Delete the record for `key`. Deleting a missing record succeeds.
    pub async fn delete(&self, key: &str) -> Result<()> {
        match &self.medium {
            Medium::Memory(map) => {
                map.remove(key);
                Ok(())
            }
            Medium::Directory { dir, prefix } => {
                fsio::remove_if_exists(&Self::record_path(dir, prefix, key)).await?;
                Ok(())
            }
        }
    }

    /// Delete every record owned by this store.
    pub async fn clear(&self) -> Result<()> {
        match &self.medium {
            Medium::Memory(map) => {
                map.clear();
                Ok(())
            }
            Medium::Directory { dir, prefix } => {
                let removed = fsio::remove_files_where(dir, |name| {
                    name.strip_suffix(RECORD_EXTENSION)
                        .and_then(|stem| stem.strip_suffix('.'))
                        .is_some_and(|id| is_file_id(prefix, id))
                })
                .await?;
                debug!("Cleared {} metadata records from {}", removed, dir.display());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> MetadataRecord {
        MetadataRecord {
            cache_control: HashAlgorithm::Sha1,
            hash: Some("abc".to_string()),
            compressed: true,
            m_time: 1_000,
            life_time: 60,
        }
    }

    #[test]
    fn test_expire_is_derived() {
        let record = record();
        assert_eq!(record.expire(), 1_060);
        assert!(!record.is_expired_at(1_059));
        assert!(record.is_expired_at(1_060));
    }

    #[test]
    fn test_extended_life_time() {
        let record = record();
        assert_eq!(record.extended_life_time(5), 65);
        assert_eq!(record.extended_life_time(-10), 50);
        // would reach zero or below: keep the current lifetime
        assert_eq!(record.extended_life_time(-60), 60);
        assert_eq!(record.extended_life_time(-500), 60);
    }

    #[test]
    fn test_persisted_shape() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["cacheControl"], "sha1");
        assert_eq!(json["hash"], "abc");
        assert_eq!(json["compressed"], true);
        assert_eq!(json["mTime"], 1_000);
        assert_eq!(json["lifeTime"], 60);
        assert_eq!(json["expire"], 1_060);
    }

    #[test]
    fn test_stored_expire_is_ignored_on_read() {
        let json = r#"{"cacheControl":"md5","hash":null,"compressed":false,
                       "mTime":10,"lifeTime":5,"expire":999999}"#;
        let record: MetadataRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.expire(), 15);
        assert!(record.hash.is_none());
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip_and_idempotent_delete() {
        let store = MetaStore::in_memory();
        assert!(store.load("k").await.is_none());

        store.write("k", &record()).await.unwrap();
        assert_eq!(store.load("k").await, Some(record()));

        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert!(store.load("k").await.is_none());
    }

    #[tokio::test]
    async fn test_directory_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetaStore::directory(dir.path().join("meta"), "")
            .await
            .unwrap();

        store.write("a", &record()).await.unwrap();
        store.write("b", &record()).await.unwrap();
        assert_eq!(store.load("a").await, Some(record()));

        store.delete("a").await.unwrap();
        assert!(store.load("a").await.is_none());
        store.delete("a").await.unwrap();

        store.clear().await.unwrap();
        assert!(store.load("b").await.is_none());
        assert!(dir.path().join("meta").is_dir());
    }

    #[tokio::test]
    async fn test_malformed_record_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetaStore::directory(dir.path(), "").await.unwrap();
        store.write("k", &record()).await.unwrap();

        let path = MetaStore::record_path(dir.path(), "", "k");
        std::fs::write(&path, b"{ not json").unwrap();

        assert!(store.load("k").await.is_none());
    }

    #[tokio::test]
    async fn test_prefixed_stores_share_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let a = MetaStore::directory(dir.path(), "a_").await.unwrap();
        let b = MetaStore::directory(dir.path(), "b_").await.unwrap();
        let bare = MetaStore::directory(dir.path(), "").await.unwrap();

        let mut other = record();
        other.life_time = 999;
        a.write("k", &record()).await.unwrap();
        b.write("k", &other).await.unwrap();
        bare.write("k", &record()).await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"keep").unwrap();

        assert_eq!(a.load("k").await, Some(record()));
        assert_eq!(b.load("k").await, Some(other.clone()));

        a.clear().await.unwrap();
        assert!(a.load("k").await.is_none());
        assert_eq!(b.load("k").await, Some(other));
        assert_eq!(bare.load("k").await, Some(record()));
        assert!(dir.path().join("notes.txt").exists());
        assert!(MetaStore::record_path(dir.path(), "b_", "k")
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("b_")));
    }
}
