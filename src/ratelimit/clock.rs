//! Time sources for rate limiting.
//!
//! Every limiter reads time as an offset from the Unix epoch, but the
//! offset is advanced by a monotonic source so it never retreats when the
//! wall clock is adjusted.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// A source of non-decreasing timestamps.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time as an offset from the Unix epoch.
    fn now(&self) -> Duration;
}

/// Wall-clock anchored, monotonically advancing clock.
///
/// The Unix time is sampled once at construction; afterwards time only
/// moves forward with [`Instant`].
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    anchor_unix: Duration,
    anchor: Instant,
}

impl MonotonicClock {
    /// Create a clock anchored at the current wall-clock time.
    pub fn new() -> Self {
        Self {
            anchor_unix: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or(Duration::ZERO),
            anchor: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.anchor_unix + self.anchor.elapsed()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying time, so a test can hold one handle
/// while the limiter holds another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Duration>>,
}

impl ManualClock {
    /// Create a manual clock starting at `start`.
    pub fn new(start: Duration) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    /// Move the clock to `at`. Earlier instants are ignored.
    pub fn advance_to(&self, at: Duration) {
        let mut now = self.now.lock();
        if at > *now {
            *now = at;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}

/// The clock used when none is supplied.
pub(crate) fn default_clock() -> Arc<dyn Clock> {
    Arc::new(MonotonicClock::new())
}

/// Convert a non-negative number of seconds into a `Duration`, saturating
/// instead of panicking on overflow or NaN.
pub(crate) fn secs(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

/// A clock that sleeps after sampling time, once per [`arm`] call.
///
/// Lets tests hold a stale reading across a point where another thread
/// moves time forward.
///
/// [`arm`]: StallingClock::arm
#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct StallingClock {
    inner: ManualClock,
    armed: Arc<std::sync::atomic::AtomicBool>,
    stall: Duration,
}

#[cfg(test)]
impl StallingClock {
    pub(crate) fn new(inner: ManualClock, stall: Duration) -> Self {
        Self {
            inner,
            armed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            stall,
        }
    }

    /// Stall the next reading.
    pub(crate) fn arm(&self) {
        self.armed.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for StallingClock {
    fn now(&self) -> Duration {
        let now = self.inner.now();
        if self.armed.swap(false, std::sync::atomic::Ordering::SeqCst) {
            std::thread::sleep(self.stall);
        }
        now
    }
}
