//! Time source for the engine.
//!
//! Lease expiry, delayed promotion, and backoff arithmetic all read the
//! clock through this handle, so tests can drive time forward without
//! sleeping.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// A cloneable time source reporting epoch milliseconds.
#[derive(Clone)]
pub struct Clock(Source);

#[derive(Clone)]
enum Source {
    System,
    Manual(Arc<AtomicI64>),
}

impl Clock {
    /// Wall-clock time.
    pub fn system() -> Self {
        Clock(Source::System)
    }

    /// A manual clock starting at the given epoch-millisecond timestamp.
    /// Only moves when [`Clock::advance`] is called.
    pub fn manual(start_ms: i64) -> Self {
        Clock(Source::Manual(Arc::new(AtomicI64::new(start_ms))))
    }

    /// Current time in epoch milliseconds.
    pub fn now_ms(&self) -> i64 {
        match &self.0 {
            Source::System => chrono::Utc::now().timestamp_millis(),
            Source::Manual(t) => t.load(Ordering::SeqCst),
        }
    }

    /// Advance a manual clock by `ms`. No-op on the system clock.
    pub fn advance(&self, ms: i64) {
        if let Source::Manual(t) = &self.0 {
            t.fetch_add(ms, Ordering::SeqCst);
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}
