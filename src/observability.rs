//! Hooks for observing cache behaviour.

use std::time::Duration;

/// Receiver of cache events.
///
/// All methods default to no-ops so implementors only override what they
/// export.
pub trait CacheMetrics: Send + Sync {
    /// `load` returned a payload.
    fn record_hit(&self, _key: &str, _duration: Duration) {}

    /// `load` found nothing usable.
    fn record_miss(&self, _key: &str, _duration: Duration) {}

    /// Payload digest did not match its metadata record.
    fn record_corrupted(&self, _key: &str) {}

    /// Entry removed because it expired or lost one of its halves.
    fn record_eviction(&self, _key: &str) {}

    /// Medium failure swallowed by a data-path operation.
    fn record_error(&self, _key: &str, _error: &str) {}
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {}

/// Writes every event to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMetrics;

impl CacheMetrics for LogMetrics {
    fn record_hit(&self, key: &str, duration: Duration) {
        debug!("cache hit {} in {:?}", key, duration);
    }

    fn record_miss(&self, key: &str, duration: Duration) {
        debug!("cache miss {} in {:?}", key, duration);
    }

    fn record_corrupted(&self, key: &str) {
        warn!("cache entry {} failed integrity check", key);
    }

    fn record_eviction(&self, key: &str) {
        debug!("cache entry {} evicted", key);
    }

    fn record_error(&self, key: &str, error: &str) {
        warn!("cache error on {}: {}", key, error);
    }
}
