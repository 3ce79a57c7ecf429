//! Backend configuration.
//!
//! Options are resolved once, at construction, by folding partial layers over
//! the defaults: hard-coded defaults, then backend overrides, then caller
//! overrides. The resolved structs are plain typed values; nothing is looked up
//! by name at runtime.
//!
//! Layers deserialize from JSON using the camelCase key names of the
//! configuration surface:
//!
//! ```
//! use next_cache::options::{BackendOptions, OptionsLayer};
//! use next_cache::hash::HashAlgorithm;
//!
//! let caller = OptionsLayer::from_json(
//!     r#"{ "lifeTime": 600, "security": { "hashAlgorithm": "sha1" } }"#,
//! ).unwrap();
//! let options = BackendOptions::merged([&caller]).unwrap();
//!
//! assert_eq!(options.life_time, 600);
//! assert_eq!(options.security.hash_algorithm, HashAlgorithm::Sha1);
//! assert!(options.security.test_validity);
//! ```

use crate::error::{Error, Result};
use crate::hash::HashAlgorithm;
use serde::Deserialize;
use std::path::PathBuf;

/// Default entry lifetime in seconds (one sidereal day).
pub const DEFAULT_LIFETIME: u64 = 86_164;

/// Default gzip level for the file backend.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Environment variable overriding the default lifetime, see [`OptionsLayer::from_env`].
pub const LIFETIME_ENV: &str = "NEXT_CACHE_LIFETIME";

/// Integrity policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecurityOptions {
    /// Verify the payload digest on every read.
    pub test_validity: bool,
    pub hash_algorithm: HashAlgorithm,
    /// Evict an entry whose digest does not match.
    pub remove_corrupted: bool,
}

impl Default for SecurityOptions {
    fn default() -> Self {
        SecurityOptions {
            test_validity: true,
            hash_algorithm: HashAlgorithm::Md5,
            remove_corrupted: true,
        }
    }
}

/// Where metadata records are persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetadataOptions {
    /// Record directory. `None` keeps records in process memory, except for
    /// the file backend which defaults to `{outputDirectory}/.meta`.
    pub path: Option<PathBuf>,
    /// Record file name prefix. Defaults to the file backend's `filePrefix`
    /// and to no prefix elsewhere.
    pub file: Option<String>,
}

impl MetadataOptions {
    /// Record file name prefix, falling back to `default`.
    pub fn file_prefix<'a>(&'a self, default: &'a str) -> &'a str {
        self.file.as_deref().unwrap_or(default)
    }
}

/// Options shared by every backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendOptions {
    /// Lifetime in seconds applied when `add` receives no positive TTL.
    pub life_time: u64,
    pub metadata: MetadataOptions,
    pub security: SecurityOptions,
}

impl Default for BackendOptions {
    fn default() -> Self {
        BackendOptions {
            life_time: DEFAULT_LIFETIME,
            metadata: MetadataOptions::default(),
            security: SecurityOptions::default(),
        }
    }
}

impl BackendOptions {
    /// Fold `layers` over the defaults, in order, and validate the result.
    pub fn merged<'a, I>(layers: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a OptionsLayer>,
    {
        let mut options = BackendOptions::default();
        for layer in layers {
            layer.apply(&mut options);
        }
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.life_time == 0 {
            return Err(Error::ConfigError(
                "lifeTime must be greater than zero".to_string(),
            ));
        }
        if let Some(file) = &self.metadata.file {
            check_name_prefix("metadata.file", file)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressionOptions {
    pub enabled: bool,
    /// gzip level, 0 (store) to 9 (best).
    pub level: u32,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        CompressionOptions {
            enabled: false,
            level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

/// Options for the filesystem backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileOptions {
    pub backend: BackendOptions,
    pub compression: CompressionOptions,
    /// Prepended to every payload file name.
    pub file_prefix: String,
    pub output_directory: PathBuf,
}

impl Default for FileOptions {
    fn default() -> Self {
        FileOptions {
            backend: BackendOptions::default(),
            compression: CompressionOptions::default(),
            file_prefix: "cache_".to_string(),
            output_directory: std::env::temp_dir().join("next-cache"),
        }
    }
}

impl FileOptions {
    /// Fold `layers` over the defaults, in order, and validate the result.
    pub fn merged<'a, I>(layers: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a FileOptionsLayer>,
    {
        let mut options = FileOptions::default();
        for layer in layers {
            layer.apply(&mut options);
        }
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        self.backend.validate()?;
        if self.compression.level > 9 {
            return Err(Error::ConfigError(format!(
                "compression.level must be between 0 and 9, got {}",
                self.compression.level
            )));
        }
        check_name_prefix("filePrefix", &self.file_prefix)
    }

    /// Metadata directory, defaulting to `.meta` inside the output directory.
    pub fn metadata_path(&self) -> PathBuf {
        self.backend
            .metadata
            .path
            .clone()
            .unwrap_or_else(|| self.output_directory.join(".meta"))
    }
}

/// Prefixes become part of file names in shared directories.
fn check_name_prefix(option: &str, prefix: &str) -> Result<()> {
    if prefix
        .chars()
        .any(|c| std::path::is_separator(c) || c == '.')
    {
        return Err(Error::ConfigError(format!(
            "{} may not contain path separators or dots: {:?}",
            option, prefix
        )));
    }
    Ok(())
}

// ============================================================================
// Partial layers
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct SecurityLayer {
    pub test_validity: Option<bool>,
    pub hash_algorithm: Option<HashAlgorithm>,
    pub remove_corrupted: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct MetadataLayer {
    pub path: Option<PathBuf>,
    pub file: Option<String>,
}

/// Partial [`BackendOptions`]; unset fields leave the lower layer untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OptionsLayer {
    pub life_time: Option<u64>,
    pub metadata: MetadataLayer,
    pub security: SecurityLayer,
}

impl OptionsLayer {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::ConfigError(format!("Invalid cache options: {}", e)))
    }

    /// Layer built from the process environment.
    ///
    /// Only [`LIFETIME_ENV`] is recognised; unparsable values are ignored.
    pub fn from_env() -> Self {
        let life_time = std::env::var(LIFETIME_ENV)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0);

        OptionsLayer {
            life_time,
            ..Default::default()
        }
    }

    pub fn life_time(mut self, secs: u64) -> Self {
        self.life_time = Some(secs);
        self
    }

    pub fn metadata_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.metadata.path = Some(path.into());
        self
    }

    pub fn metadata_file(mut self, prefix: impl Into<String>) -> Self {
        self.metadata.file = Some(prefix.into());
        self
    }

    pub fn test_validity(mut self, enabled: bool) -> Self {
        self.security.test_validity = Some(enabled);
        self
    }

    pub fn hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.security.hash_algorithm = Some(algorithm);
        self
    }

    pub fn remove_corrupted(mut self, enabled: bool) -> Self {
        self.security.remove_corrupted = Some(enabled);
        self
    }

    pub fn apply(&self, options: &mut BackendOptions) {
        if let Some(life_time) = self.life_time {
            options.life_time = life_time;
        }
        if let Some(path) = &self.metadata.path {
            options.metadata.path = Some(path.clone());
        }
        if let Some(file) = &self.metadata.file {
            options.metadata.file = Some(file.clone());
        }
        if let Some(test_validity) = self.security.test_validity {
            options.security.test_validity = test_validity;
        }
        if let Some(algorithm) = self.security.hash_algorithm {
            options.security.hash_algorithm = algorithm;
        }
        if let Some(remove_corrupted) = self.security.remove_corrupted {
            options.security.remove_corrupted = remove_corrupted;
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct CompressionLayer {
    pub enabled: Option<bool>,
    pub level: Option<u32>,
}

/// Partial [`FileOptions`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileOptionsLayer {
    #[serde(flatten)]
    pub backend: OptionsLayer,
    pub compression: CompressionLayer,
    pub file_prefix: Option<String>,
    pub output_directory: Option<PathBuf>,
}

impl FileOptionsLayer {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::ConfigError(format!("Invalid file cache options: {}", e)))
    }

    pub fn output_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_directory = Some(dir.into());
        self
    }

    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = Some(prefix.into());
        self
    }

    pub fn compression(mut self, enabled: bool, level: u32) -> Self {
        self.compression.enabled = Some(enabled);
        self.compression.level = Some(level);
        self
    }

    pub fn with_backend(mut self, backend: OptionsLayer) -> Self {
        self.backend = backend;
        self
    }

    pub fn apply(&self, options: &mut FileOptions) {
        self.backend.apply(&mut options.backend);
        if let Some(enabled) = self.compression.enabled {
            options.compression.enabled = enabled;
        }
        if let Some(level) = self.compression.level {
            options.compression.level = level;
        }
        if let Some(prefix) = &self.file_prefix {
            options.file_prefix = prefix.clone();
        }
        if let Some(dir) = &self.output_directory {
            options.output_directory = dir.clone();
        }
    }
}

impl From<OptionsLayer> for FileOptionsLayer {
    fn from(backend: OptionsLayer) -> Self {
        FileOptionsLayer {
            backend,
            ..Default::default()
        }
    }
}
