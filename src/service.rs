//! Shared cache front for application code.

use crate::backend::{CacheBackend, CleanMode, Lookup};
use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

/// `Arc`-wrapped backend handed to controllers and entity managers.
///
/// Every read treats a miss, an empty payload, and a failed integrity check
/// alike: the value is recomputed.
///
/// # Example
///
/// ```
/// # use next_cache::{CacheService, backend::SharedMemoryBackend};
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> next_cache::Result<()> {
/// let cache = CacheService::new(SharedMemoryBackend::new());
///
/// let total: u64 = cache
///     .get_or_compute("report:total", Some(60), || async { Ok(42) })
///     .await?;
/// assert_eq!(total, 42);
/// # Ok(())
/// # }
/// ```
pub struct CacheService<B: CacheBackend> {
    backend: Arc<B>,
}

impl<B: CacheBackend> Clone for CacheService<B> {
    fn clone(&self) -> Self {
        CacheService {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: CacheBackend> CacheService<B> {
    pub fn new(backend: B) -> Self {
        CacheService {
            backend: Arc::new(backend),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Cached value for `key`, or the result of `compute` which is then stored.
    ///
    /// A failure to store the computed value is logged and otherwise ignored.
    ///
    /// # Errors
    /// Only errors returned by `compute` are propagated.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        ttl: Option<u64>,
        compute: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Lookup::Hit(value) = self.backend.load_value::<T>(key).await {
            return Ok(value);
        }

        debug!("Recomputing {}", key);
        let value = compute().await?;
        if !self.backend.add(key, &value, ttl).await {
            debug!("Computed value for {} was not cached", key);
        }
        Ok(value)
    }

    pub async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned + Send,
    {
        self.backend.load_value(key).await.into_option()
    }

    pub async fn put<T>(&self, key: &str, value: &T, ttl: Option<u64>) -> bool
    where
        T: Serialize + Sync + ?Sized,
    {
        self.backend.add(key, value, ttl).await
    }

    pub async fn forget(&self, key: &str) -> bool {
        self.backend.remove(key).await
    }

    pub async fn extend(&self, key: &str, extra: i64) -> bool {
        self.backend.touch(key, extra).await
    }

    /// # Errors
    /// See [`CacheBackend::clean`].
    pub async fn flush(&self) -> Result<bool> {
        self.backend.clean(CleanMode::All).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SharedMemoryBackend;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_get_or_compute_caches_result() {
        let cache = CacheService::new(SharedMemoryBackend::new());
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: String = cache
                .get_or_compute("k", None, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("computed".to_string())
                })
                .await
                .expect("Failed to compute");
            assert_eq!(value, "computed");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_compute_error_is_propagated_and_not_cached() {
        let cache = CacheService::new(SharedMemoryBackend::new());

        let result: Result<u32> = cache
            .get_or_compute("k", None, || async {
                Err(Error::BackendError("db down".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert!(!cache.backend().test("k").await);
    }

    #[tokio::test]
    async fn test_put_get_forget_flush() {
        let cache = CacheService::new(SharedMemoryBackend::new());
        let shared = cache.clone();

        assert!(cache.put("a", &1u8, None).await);
        assert!(cache.put("b", &2u8, None).await);
        assert_eq!(shared.get::<u8>("a").await, Some(1));

        assert!(cache.extend("a", 10).await);
        assert!(cache.forget("a").await);
        assert_eq!(shared.get::<u8>("a").await, None);

        assert!(cache.flush().await.unwrap());
        assert_eq!(shared.get::<u8>("b").await, None);
    }
}
