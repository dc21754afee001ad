//! Token pacing for remote config loads.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

pub enum Acquire {
    /// Sleep this long, then proceed. Zero means go now.
    Granted(Duration),
    /// The wait would exceed the caller's budget.
    Saturated,
}

/// Spaces permits `1/qps` apart. Callers ask for a permit with a wait budget;
/// if the next free slot is further out than the budget the limiter refuses
/// instead of queueing unboundedly.
pub struct QpsLimiter {
    interval: Duration,
    next_free: Mutex<Instant>,
}

impl QpsLimiter {
    pub fn new(qps: u32) -> Self {
        QpsLimiter {
            interval: Duration::from_secs(1) / qps.max(1),
            next_free: Mutex::new(Instant::now()),
        }
    }

    pub fn acquire_delay(&self, max_wait: Duration) -> Acquire {
        let now = Instant::now();
        let mut next_free = self.next_free.lock();
        let wait = next_free.saturating_duration_since(now);
        if wait > max_wait {
            return Acquire::Saturated;
        }
        *next_free = now.max(*next_free) + self.interval;
        Acquire::Granted(wait)
    }
}
