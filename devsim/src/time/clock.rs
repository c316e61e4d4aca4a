use std::error::Error;
use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use tai_time::MonotonicClock;

use crate::time::MonotonicTime;

/// A wall clock scaled by a fixed acceleration factor.
///
/// Instants returned by an `AcceleratedClock` live on the *accelerated*
/// timeline: once the clock has started, one second of wall-clock time
/// corresponds to `acceleration_factor()` seconds of accelerated time.
///
/// This is the only source of truth for "now" used by the real-time
/// simulator and by controllers.
pub trait AcceleratedClock: Send + Sync {
    /// Blocks until the wall-clock start of the clock.
    fn wait_until_start(&self);

    /// Returns the accelerated instant corresponding to the clock start.
    fn start_instant(&self) -> MonotonicTime;

    /// Returns the current accelerated instant.
    fn current_instant(&self) -> MonotonicTime;

    /// Returns the number of wall-clock nanoseconds until the specified
    /// accelerated instant, or 0 if it has already elapsed.
    fn nano_delay_until_instant(&self, instant: MonotonicTime) -> u64;

    /// Returns the acceleration factor.
    fn acceleration_factor(&self) -> f64;

    /// Returns the wall-clock delay until the specified accelerated instant.
    fn delay_until_instant(&self, instant: MonotonicTime) -> Duration {
        Duration::from_nanos(self.nano_delay_until_instant(instant))
    }

    /// Converts an accelerated duration to a wall-clock duration.
    fn wall_clock_duration(&self, accelerated: Duration) -> Duration {
        accelerated.div_f64(self.acceleration_factor())
    }
}

/// An [`AcceleratedClock`] based on the system's monotonic clock.
///
/// # Examples
///
/// ```
/// use std::time::{Duration, Instant};
///
/// use devsim::time::{AcceleratedClock, MonotonicTime, SystemAcceleratedClock};
///
/// // A clock starting in 100ms which runs 60 times faster than the wall clock.
/// let clock = SystemAcceleratedClock::new(
///     MonotonicTime::EPOCH,
///     Instant::now() + Duration::from_millis(100),
///     60.0,
/// )
/// .unwrap();
///
/// // One accelerated minute after the start lies at most 1.1s ahead.
/// let one_minute = clock.start_instant() + Duration::from_secs(60);
/// assert!(clock.delay_until_instant(one_minute) <= Duration::from_millis(1100));
/// ```
#[derive(Copy, Clone, Debug)]
pub struct SystemAcceleratedClock {
    // Maps the wall clock onto a timeline where the start coincides with
    // `start_instant`.
    wall_clock: MonotonicClock,
    start_instant: MonotonicTime,
    acceleration_factor: f64,
}

impl SystemAcceleratedClock {
    /// Creates a clock which reads `start_instant` when the system's monotonic
    /// clock reaches `wall_clock_start`.
    ///
    /// The wall-clock start may lie in the past or in the future. An error is
    /// returned if the acceleration factor is not a finite, strictly positive
    /// number.
    pub fn new(
        start_instant: MonotonicTime,
        wall_clock_start: Instant,
        acceleration_factor: f64,
    ) -> Result<Self, ClockError> {
        if !(acceleration_factor.is_finite() && acceleration_factor > 0.0) {
            return Err(ClockError::InvalidAccelerationFactor(acceleration_factor));
        }

        Ok(Self {
            wall_clock: MonotonicClock::init_from_instant(start_instant, wall_clock_start),
            start_instant,
            acceleration_factor,
        })
    }

    /// Creates a clock starting at [`MonotonicTime::EPOCH`] after the
    /// specified wall-clock delay.
    pub fn starting_in(delay: Duration, acceleration_factor: f64) -> Result<Self, ClockError> {
        Self::new(
            MonotonicTime::EPOCH,
            Instant::now() + delay,
            acceleration_factor,
        )
    }
}

impl AcceleratedClock for SystemAcceleratedClock {
    fn wait_until_start(&self) {
        let now = self.wall_clock.now();
        if now < self.start_instant {
            thread::sleep(self.start_instant.duration_since(now));
        }
    }

    fn start_instant(&self) -> MonotonicTime {
        self.start_instant
    }

    fn current_instant(&self) -> MonotonicTime {
        let now = self.wall_clock.now();
        if now >= self.start_instant {
            let real_elapsed = now.duration_since(self.start_instant);
            self.start_instant + real_elapsed.mul_f64(self.acceleration_factor)
        } else {
            let real_remaining = self.start_instant.duration_since(now);
            self.start_instant - real_remaining.mul_f64(self.acceleration_factor)
        }
    }

    fn nano_delay_until_instant(&self, instant: MonotonicTime) -> u64 {
        let current = self.current_instant();
        if instant <= current {
            return 0;
        }
        let accelerated = instant.duration_since(current);

        u64::try_from(self.wall_clock_duration(accelerated).as_nanos()).unwrap_or(u64::MAX)
    }

    fn acceleration_factor(&self) -> f64 {
        self.acceleration_factor
    }
}

/// Error returned when an accelerated clock cannot be created.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ClockError {
    /// The acceleration factor is not finite and strictly positive.
    InvalidAccelerationFactor(f64),
}

impl fmt::Display for ClockError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAccelerationFactor(factor) => {
                write!(fmt, "invalid acceleration factor: {factor}")
            }
        }
    }
}

impl Error for ClockError {}
