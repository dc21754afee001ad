//! Retry pacing for remote loads and long polls.

use parking_lot::Mutex;
use std::time::Duration;

/// Decides how long to wait after a failed attempt.
pub trait SchedulePolicy: Send + Sync {
    /// Records a failure and returns the delay before the next attempt.
    fn fail(&self) -> Duration;

    /// Records a success, resetting any accumulated backoff.
    fn success(&self);
}

/// Doubles the delay on each consecutive failure, from `floor` up to
/// `ceiling`, and snaps back to zero state on success.
pub struct ExponentialSchedulePolicy {
    floor: Duration,
    ceiling: Duration,
    current: Mutex<Duration>,
}

impl ExponentialSchedulePolicy {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        ExponentialSchedulePolicy {
            floor,
            ceiling,
            current: Mutex::new(Duration::ZERO),
        }
    }
}

impl SchedulePolicy for ExponentialSchedulePolicy {
    fn fail(&self) -> Duration {
        let mut current = self.current.lock();
        *current = if current.is_zero() {
            self.floor
        } else {
            (*current * 2).min(self.ceiling)
        };
        *current
    }

    fn success(&self) {
        *self.current.lock() = Duration::ZERO;
    }
}
