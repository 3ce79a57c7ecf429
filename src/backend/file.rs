//! Filesystem cache backend.
//!
//! One payload file per key under the output directory, named
//! `{filePrefix}{md5(key)}`, plus a JSON metadata record per key in the
//! metadata directory (`{outputDirectory}/.meta` unless configured), named
//! `{filePrefix}{md5(key)}.meta`. Backends with different prefixes can share
//! both directories, and `clean(All)` only deletes files carrying its own
//! prefix. Files are written to a temporary sibling and renamed into place,
//! so a concurrent reader sees either the previous payload or the new one.
//!
//! Readers and writers in other processes are not otherwise coordinated.
//! Between the metadata rename and the payload rename of an `add`, a reader
//! pairs the new record with the previous payload and fails the integrity
//! check. With `removeCorrupted` off that read is just a miss. With it on
//! (the default) the reader evicts both halves; the writer's payload rename
//! then lands anyway, `add` still returns `true`, and the key is left with a
//! payload but no metadata. That orphan reads as a miss until the next
//! `add` or `remove` of the key.

use super::{CacheBackend, CleanMode, EntryEngine, Lookup, PayloadStore};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::fsio;
use crate::key::{file_id, is_file_id};
use crate::meta::MetaStore;
use crate::observability::CacheMetrics;
use crate::options::{FileOptions, FileOptionsLayer};
use crate::serialization;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

/// Directory of payload files.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
    prefix: String,
}

impl FileStore {
    /// Path of the payload file for `key`.
    pub fn path(&self, key: &str) -> PathBuf {
        self.dir.join(file_id(&self.prefix, key))
    }
}

impl PayloadStore for FileStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(fsio::read_optional(&self.path(key)).await?)
    }

    async fn write(&self, key: &str, bytes: Vec<u8>, _expire: u64) -> Result<()> {
        fsio::write_atomic(&self.path(key), &bytes).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        fsio::remove_if_exists(&self.path(key)).await?;
        Ok(())
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(fs::try_exists(self.path(key)).await?)
    }
}

/// Filesystem backend with optional gzip compression.
///
/// # Example
///
/// ```no_run
/// # use next_cache::backend::{CacheBackend, FileBackend};
/// # use next_cache::options::FileOptionsLayer;
/// # use next_cache::error::Result;
/// # async fn example() -> Result<()> {
/// let layer = FileOptionsLayer::default()
///     .output_directory("/var/cache/app")
///     .compression(true, 6);
///
/// let backend = FileBackend::new(&layer).await?;
/// backend.add("page:/index", "<html></html>", Some(300)).await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct FileBackend {
    engine: EntryEngine,
    store: FileStore,
    options: FileOptions,
}

impl FileBackend {
    /// Create a backend from caller overrides merged over the file defaults.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if the options are invalid or the output
    /// directory does not exist or is not writable.
    pub async fn new(caller: &FileOptionsLayer) -> Result<Self> {
        let options = FileOptions::merged([caller])?;
        check_output_directory(&options.output_directory).await?;

        let meta = MetaStore::directory(
            options.metadata_path(),
            options.backend.metadata.file_prefix(&options.file_prefix),
        )
        .await?;
        let mut engine = EntryEngine::new(options.backend.clone(), meta);
        if options.compression.enabled {
            engine = engine.with_compression(options.compression.level);
        }

        let store = FileStore {
            dir: options.output_directory.clone(),
            prefix: options.file_prefix.clone(),
        };

        info!(
            "✓ File cache backend initialized at {} (compression: {})",
            options.output_directory.display(),
            options.compression.enabled
        );

        Ok(FileBackend {
            engine,
            store,
            options,
        })
    }

    /// Backend writing to `dir` with every other option at its default.
    ///
    /// # Errors
    /// Same as [`FileBackend::new`].
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::new(&FileOptionsLayer::default().output_directory(dir)).await
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.engine = self.engine.with_clock(clock);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn CacheMetrics>) -> Self {
        self.engine = self.engine.with_metrics(metrics);
        self
    }

    pub fn options(&self) -> &FileOptions {
        &self.options
    }

    /// Metadata store, for inspection.
    pub fn meta(&self) -> &MetaStore {
        self.engine.meta()
    }

    /// Payload file for `key`.
    pub fn payload_path(&self, key: &str) -> PathBuf {
        self.store.path(key)
    }
}

/// Fail fast on a missing or read-only output directory.
async fn check_output_directory(dir: &Path) -> Result<()> {
    let metadata = fs::metadata(dir).await.map_err(|e| {
        Error::ConfigError(format!(
            "Output directory {} is not accessible: {}",
            dir.display(),
            e
        ))
    })?;

    if !metadata.is_dir() {
        return Err(Error::ConfigError(format!(
            "Output directory {} is not a directory",
            dir.display()
        )));
    }

    let probe = dir.join(".write-probe");
    fsio::write_atomic(&probe, b"").await.map_err(|e| {
        Error::ConfigError(format!(
            "Output directory {} is not writable: {}",
            dir.display(),
            e
        ))
    })?;
    fsio::remove_if_exists(&probe).await?;
    Ok(())
}

impl CacheBackend for FileBackend {
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
            CleanMode::All => {
                warn!(
                    "⚠ Clearing file cache at {} (prefix {:?})",
                    self.options.output_directory.display(),
                    self.options.file_prefix
                );
                let prefix = &self.options.file_prefix;
                let removed = fsio::remove_files_where(&self.options.output_directory, |name| {
                    is_file_id(prefix, name)
                })
                .await?;
                self.engine.meta().clear().await?;
                debug!("✓ Removed {} payload files with prefix {:?}", removed, prefix);
                Ok(true)
            }
            CleanMode::Old | CleanMode::User => Err(Error::UnsupportedOperation(format!(
                "file backend cannot clean mode '{}'",
                mode
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptionsLayer;

    async fn backend(dir: &Path) -> FileBackend {
        FileBackend::open(dir).await.expect("Failed to open backend")
    }

    #[tokio::test]
    async fn test_missing_directory_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileBackend::open(dir.path().join("missing"))
            .await
            .err()
            .expect("Expected construction to fail");
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_file_instead_of_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();

        let err = FileBackend::open(&file).await.err().expect("Expected failure");
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_payload_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let layer = FileOptionsLayer::default()
            .output_directory(dir.path())
            .file_prefix("page_");
        let backend = FileBackend::new(&layer).await.unwrap();

        assert!(backend.add("home", "<html/>", None).await);

        let path = backend.payload_path("home");
        assert_eq!(path.parent(), Some(dir.path()));
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            file_id("page_", "home")
        );
        assert!(path.exists());
        assert!(dir.path().join(".meta").is_dir());
        assert!(!dir.path().join(".write-probe").exists());
    }

    #[tokio::test]
    async fn test_external_metadata_path() {
        let out = tempfile::tempdir().unwrap();
        let meta = tempfile::tempdir().unwrap();
        let layer = FileOptionsLayer::default()
            .output_directory(out.path())
            .with_backend(OptionsLayer::default().metadata_path(meta.path()));
        let backend = FileBackend::new(&layer).await.unwrap();

        backend.add("k", &42u64, None).await;
        assert_eq!(std::fs::read_dir(meta.path()).unwrap().count(), 1);

        assert!(backend.clean(CleanMode::All).await.unwrap());
        assert_eq!(std::fs::read_dir(meta.path()).unwrap().count(), 0);
        assert!(!backend.test("k").await);
    }

    #[tokio::test]
    async fn test_missing_payload_is_not_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path()).await;

        backend.add("k", "v", None).await;
        std::fs::remove_file(backend.payload_path("k")).unwrap();

        assert!(!backend.test("k").await);
        assert_eq!(backend.load("k").await, Lookup::Miss);
    }

    #[tokio::test]
    async fn test_unsupported_clean_modes() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path()).await;
        backend.add("k", "v", None).await;

        for mode in [CleanMode::Old, CleanMode::User] {
            let err = backend.clean(mode).await.unwrap_err();
            assert!(matches!(err, Error::UnsupportedOperation(_)));
        }
        assert!(backend.test("k").await);
    }

    #[tokio::test]
    async fn test_prefixes_share_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let open = |prefix: &str| {
            let layer = FileOptionsLayer::default()
                .output_directory(dir.path())
                .file_prefix(prefix);
            async move { FileBackend::new(&layer).await.unwrap() }
        };
        let a = open("a_").await;
        let b = open("b_").await;
        std::fs::write(dir.path().join("notes.txt"), b"keep").unwrap();

        assert!(a.add("k", "from-a", None).await);
        assert!(b.add("k", "from-b", None).await);

        assert_eq!(
            a.load_value::<String>("k").await,
            Lookup::Hit("from-a".to_string())
        );
        assert_eq!(
            b.load_value::<String>("k").await,
            Lookup::Hit("from-b".to_string())
        );

        assert!(a.clean(CleanMode::All).await.unwrap());
        assert!(!a.test("k").await);
        assert_eq!(
            b.load_value::<String>("k").await,
            Lookup::Hit("from-b".to_string())
        );
        assert!(dir.path().join("notes.txt").exists());
        assert!(dir.path().join(".meta").is_dir());
    }

    #[tokio::test]
    async fn test_reader_between_renames_leaves_orphaned_payload() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path()).await;
        assert!(backend.add("k", "old", None).await);

        // A concurrent add has renamed its metadata record into place but not
        // yet its payload.
        let stored = serialization::serialize_for_cache("new").unwrap();
        let mut record = backend.meta().load("k").await.unwrap();
        record.hash = Some(record.cache_control.digest(&stored));
        backend.meta().write("k", &record).await.unwrap();

        assert_eq!(backend.load("k").await, Lookup::Miss);
        assert!(backend.meta().load("k").await.is_none());
        assert!(!backend.payload_path("k").exists());

        // The writer's payload rename lands afterwards.
        std::fs::write(backend.payload_path("k"), &stored).unwrap();
        assert!(!backend.test("k").await);
        assert_eq!(backend.load("k").await, Lookup::Miss);
        assert!(backend.payload_path("k").exists());

        assert!(backend.add("k", "new", None).await);
        assert_eq!(
            backend.load_value::<String>("k").await,
            Lookup::Hit("new".to_string())
        );
    }
}
