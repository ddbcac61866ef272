use std::time::Duration;
use tokio::time::Instant;

/// Monotonic stopwatch used for wait deadlines and log timings.
///
/// Backed by the runtime clock so that tests running with a paused clock
/// observe the same elapsed time as the sleeps they drive.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left before `budget` is spent, zero once it has been exceeded.
    pub fn remaining(&self, budget: Duration) -> Duration {
        budget.saturating_sub(self.elapsed())
    }

    pub fn exceeded(&self, budget: Duration) -> bool {
        self.elapsed() >= budget
    }
}

/// Largest number of seconds a `Duration` can hold.
pub fn max_secs() -> f64 {
    Duration::MAX.as_secs_f64()
}

/// Whether `value` is a usable, non-negative number of seconds.
pub fn valid_secs(value: f64) -> bool {
    value.is_finite() && value >= 0.0 && value <= max_secs()
}

/// Seconds to `Duration`, saturating instead of panicking: negative and NaN
/// become zero, anything too large becomes `Duration::MAX`.
pub fn secs_to_duration(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}
