//! Simulation clock
//!
//! Every zone measures window offsets from one origin. [`SimClock`] takes
//! that origin either from its own start or from an injected shared epoch,
//! and can run faster than wall-clock time (`second` is the real length of
//! one simulated second).

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Time source for window decisions
///
/// Elapsed time is simulated time since the shared origin: monotonic and
/// never negative.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Simulated time since the origin
    fn elapsed(&self) -> Duration;

    /// Real duration to wait for `simulated` time to pass
    fn to_real(&self, simulated: Duration) -> Duration;
}

/// Clock backed by the monotonic system clock
#[derive(Debug, Clone, Copy)]
pub struct SimClock {
    origin: Instant,
    second: Duration,
}

impl SimClock {
    /// Shortest accepted length of a simulated second
    pub const MIN_SECOND: Duration = Duration::from_millis(1);

    /// Origin at the moment of the call, real-time rate
    pub fn start_now() -> Self {
        Self::with_second(Duration::from_secs(1))
    }

    /// Origin at the moment of the call, one simulated second per `second`
    pub fn with_second(second: Duration) -> Self {
        Self {
            origin: Instant::now(),
            second: second.max(Self::MIN_SECOND),
        }
    }

    /// Origin at a shared Unix epoch (seconds, fractional allowed)
    ///
    /// An epoch in the future keeps [`elapsed`](Clock::elapsed) at zero until
    /// it arrives.
    pub fn from_epoch(epoch_unix_secs: f64, second: Duration) -> Self {
        let epoch = UNIX_EPOCH + Duration::from_secs_f64(epoch_unix_secs.max(0.0));
        let now = Instant::now();
        let origin = match SystemTime::now().duration_since(epoch) {
            Ok(since) => now.checked_sub(since).unwrap_or(now),
            Err(ahead) => now + ahead.duration(),
        };
        Self {
            origin,
            second: second.max(Self::MIN_SECOND),
        }
    }

    pub fn second(&self) -> Duration {
        self.second
    }
}

impl Clock for SimClock {
    fn elapsed(&self) -> Duration {
        let real = Instant::now().saturating_duration_since(self.origin);
        Duration::from_secs_f64(real.as_secs_f64() / self.second.as_secs_f64())
    }

    fn to_real(&self, simulated: Duration) -> Duration {
        simulated.mul_f64(self.second.as_secs_f64())
    }
}

/// Hand-driven clock for deterministic tests
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(elapsed: Duration) -> Self {
        let clock = Self::new();
        clock.set(elapsed);
        clock
    }

    pub fn set(&self, elapsed: Duration) {
        let mut now = self.now.lock();
        // never move backwards
        if elapsed > *now {
            *now = elapsed;
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn elapsed(&self) -> Duration {
        *self.now.lock()
    }

    fn to_real(&self, simulated: Duration) -> Duration {
        simulated
    }
}
