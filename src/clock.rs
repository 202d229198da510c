//! Monotonic time source.
//!
//! All protocol timestamps on both ends are fractional milliseconds since an
//! arbitrary per-process epoch, read from `Instant`. Wall-clock time is never
//! used; the epoch only has to be stable for the process lifetime.

use std::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct MonoClock {
    epoch: Instant,
}

impl MonoClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Milliseconds since the epoch, with sub-millisecond resolution.
    pub fn now_ms(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for MonoClock {
    fn default() -> Self {
        Self::new()
    }
}
