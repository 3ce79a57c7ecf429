//! Injectable time source.
//!
//! Every timestamp written into a metadata record comes from a [`Clock`], so
//! expiry can be driven deterministically in tests with [`SimulatedClock`].

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current Unix time in whole seconds.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> u64;
}

/// Current Unix timestamp in seconds, `0` if the system clock is before the epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> u64 {
        unix_now()
    }
}

/// Manually driven clock for deterministic tests.
///
/// Clones share the same underlying time, so a test can keep one handle and
/// pass another into a backend.
///
/// ```
/// use next_cache::clock::{Clock, SimulatedClock};
///
/// let clock = SimulatedClock::new(1_000);
/// clock.advance(5);
/// assert_eq!(clock.now(), 1_005);
/// ```
#[derive(Debug, Clone)]
pub struct SimulatedClock {
    secs: Arc<AtomicU64>,
}

impl SimulatedClock {
    pub fn new(start_secs: u64) -> Self {
        Self {
            secs: Arc::new(AtomicU64::new(start_secs)),
        }
    }

    /// Move time forward by `delta` seconds.
    pub fn advance(&self, delta: u64) {
        self.secs.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn set(&self, secs: u64) {
        self.secs.store(secs, Ordering::SeqCst);
    }
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::new(unix_now())
    }
}

impl Clock for SimulatedClock {
    #[inline]
    fn now(&self) -> u64 {
        self.secs.load(Ordering::SeqCst)
    }
}
