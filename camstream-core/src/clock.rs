//! Millisecond clocks used for frame pacing and timers

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::Instant;

/// Source of monotonic time in milliseconds
pub trait Clock: Send + Sync {
    /// Milliseconds elapsed since the clock's origin
    fn now_ms(&self) -> f64;
}

/// Clock backed by `tokio::time::Instant`
///
/// Follows tokio's paused time, so `tokio::time::advance` moves it too.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock whose origin is now
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    /// Create a clock starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the current time
    pub fn set(&self, now_ms: f64) {
        *self.now.lock() = now_ms;
    }

    /// Move the clock forward
    pub fn advance(&self, delta_ms: f64) {
        *self.now.lock() += delta_ms;
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        *self.now.lock()
    }
}
