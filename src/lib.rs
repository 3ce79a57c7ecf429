//! # next-cache
//!
//! Pluggable cache backends with integrity hashing, lifetimes, and a
//! metadata side-channel.
//!
//! ## Features
//!
//! - **Two halves per entry:** payload in the backend's medium, metadata
//!   record (digest, timestamps, compression flag) stored beside it
//! - **Integrity checks:** MD5, CRC32, SHA-1, SHA-512 or Adler-32 digests
//!   verified on read, with optional eviction of corrupted entries
//! - **Lazy expiry:** expired entries are evicted by the read that finds them
//! - **Backends:** in-process shared memory and filesystem (with gzip)
//! - **Fail open:** data-path operations never error; a falsy result means
//!   "recompute"
//!
//! ## Quick Start
//!
//! ```
//! use next_cache::backend::{CacheBackend, SharedMemoryBackend};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let backend = SharedMemoryBackend::new();
//!
//! backend.add("user:42", &("Ada", 36u8), Some(300)).await;
//! assert!(backend.test("user:42").await);
//!
//! let user: Option<(String, u8)> = backend.load_value("user:42").await.into_option();
//! assert_eq!(user, Some(("Ada".to_string(), 36)));
//!
//! backend.touch("user:42", 60).await;
//! backend.remove("user:42").await;
//! # }
//! ```

#[macro_use]
extern crate log;

pub mod backend;
pub mod clock;
pub mod error;
mod fsio;
pub mod hash;
pub mod key;
pub mod meta;
pub mod observability;
pub mod options;
pub mod serialization;
pub mod service;

// Re-exports for convenience
pub use backend::{CacheBackend, CleanMode, FileBackend, Lookup, SharedMemoryBackend};
pub use error::{Error, Result};
pub use hash::HashAlgorithm;
pub use meta::MetadataRecord;
pub use service::CacheService;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
