//! Points and spans on a simulation clock.

use std::cmp::Ordering;
use std::error::Error;
use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Unit in which simulation times and durations are expressed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TimeUnit {
    /// Nanoseconds.
    Nanoseconds,
    /// Microseconds.
    Microseconds,
    /// Milliseconds.
    Milliseconds,
    /// Seconds.
    Seconds,
    /// Minutes.
    Minutes,
    /// Hours.
    Hours,
}

impl TimeUnit {
    /// Returns the number of seconds in one unit.
    pub const fn seconds_per_unit(self) -> f64 {
        match self {
            TimeUnit::Nanoseconds => 1e-9,
            TimeUnit::Microseconds => 1e-6,
            TimeUnit::Milliseconds => 1e-3,
            TimeUnit::Seconds => 1.0,
            TimeUnit::Minutes => 60.0,
            TimeUnit::Hours => 3600.0,
        }
    }

    /// Returns the conventional symbol of the unit.
    pub const fn symbol(self) -> &'static str {
        match self {
            TimeUnit::Nanoseconds => "ns",
            TimeUnit::Microseconds => "us",
            TimeUnit::Milliseconds => "ms",
            TimeUnit::Seconds => "s",
            TimeUnit::Minutes => "min",
            TimeUnit::Hours => "h",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A point on a simulation clock.
///
/// A `SimTime` is a floating-point value tagged with its [`TimeUnit`].
/// Comparisons and arithmetic are only defined between values of the same
/// unit: `partial_cmp` returns `None` across units, the `checked_*` methods
/// return a [`TimeError`] and the operators panic.
///
/// The value returned by [`SimTime::infinity`] compares greater than any
/// finite time of the same unit and cannot be added to.
///
/// # Examples
///
/// ```
/// use devsim::time::{SimDuration, SimTime, TimeUnit};
///
/// let t0 = SimTime::zero(TimeUnit::Seconds);
/// let t1 = t0 + SimDuration::new(2.5, TimeUnit::Seconds);
///
/// assert!(t1 > t0);
/// assert!(SimTime::infinity(TimeUnit::Seconds) > t1);
/// assert_eq!(t1 - t0, SimDuration::new(2.5, TimeUnit::Seconds));
/// ```
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SimTime {
    value: f64,
    unit: TimeUnit,
}

impl SimTime {
    /// Creates a time point.
    ///
    /// # Panics
    ///
    /// Panics if `value` is NaN or negative infinity.
    pub fn new(value: f64, unit: TimeUnit) -> Self {
        assert!(
            !value.is_nan() && value != f64::NEG_INFINITY,
            "invalid simulation time value: {value}"
        );

        Self { value, unit }
    }

    /// The origin of the clock.
    pub const fn zero(unit: TimeUnit) -> Self {
        Self { value: 0.0, unit }
    }

    /// The time point that is never reached.
    pub const fn infinity(unit: TimeUnit) -> Self {
        Self {
            value: f64::INFINITY,
            unit,
        }
    }

    /// Returns the raw value, expressed in [`SimTime::unit`].
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Returns the unit of this time point.
    pub const fn unit(&self) -> TimeUnit {
        self.unit
    }

    /// Returns `true` if this is the infinite time point.
    pub fn is_infinite(&self) -> bool {
        self.value.is_infinite()
    }

    /// Adds a duration.
    ///
    /// Adding an infinite duration to a finite time yields the infinite time;
    /// adding anything to the infinite time is an error.
    pub fn checked_add(self, rhs: SimDuration) -> Result<SimTime, TimeError> {
        check_units(self.unit, rhs.unit)?;
        if self.is_infinite() {
            return Err(TimeError::InfiniteOperand);
        }

        Ok(SimTime {
            value: self.value + rhs.value,
            unit: self.unit,
        })
    }

    /// Returns the duration elapsed from `earlier` to `self`.
    ///
    /// The result is an infinite duration if `self` is infinite and
    /// `earlier` is not. An error is returned if `earlier` lies after `self` or
    /// is infinite.
    pub fn checked_duration_since(self, earlier: SimTime) -> Result<SimDuration, TimeError> {
        check_units(self.unit, earlier.unit)?;
        if earlier.is_infinite() {
            return Err(TimeError::InfiniteOperand);
        }
        if earlier.value > self.value {
            return Err(TimeError::NegativeDuration);
        }

        Ok(SimDuration {
            value: self.value - earlier.value,
            unit: self.unit,
        })
    }

    /// Returns the smallest of two times of the same unit.
    pub(crate) fn min(self, other: SimTime) -> SimTime {
        if other.value < self.value {
            other
        } else {
            self
        }
    }

    /// Returns the largest of two times of the same unit.
    pub(crate) fn max(self, other: SimTime) -> SimTime {
        if other.value > self.value {
            other
        } else {
            self
        }
    }
}

impl PartialOrd for SimTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.unit != other.unit {
            return None;
        }

        self.value.partial_cmp(&other.value)
    }
}

impl Add<SimDuration> for SimTime {
    type Output = SimTime;

    /// Adds a duration.
    ///
    /// # Panics
    ///
    /// Panics if units differ or if `self` is infinite.
    fn add(self, rhs: SimDuration) -> SimTime {
        self.checked_add(rhs)
            .unwrap_or_else(|e| panic!("cannot add {rhs} to {self}: {e}"))
    }
}

impl Sub<SimTime> for SimTime {
    type Output = SimDuration;

    /// Returns the duration elapsed since `rhs`.
    ///
    /// # Panics
    ///
    /// Panics if units differ, if `rhs` is infinite or if `rhs` lies after
    /// `self`.
    fn sub(self, rhs: SimTime) -> SimDuration {
        self.checked_duration_since(rhs)
            .unwrap_or_else(|e| panic!("cannot subtract {rhs} from {self}: {e}"))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() {
            write!(f, "inf {}", self.unit)
        } else {
            write!(f, "{} {}", self.value, self.unit)
        }
    }
}

/// A span on a simulation clock.
///
/// Durations are non-negative and may be infinite, which is how a model
/// signals that it does not forecast any internal event.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SimDuration {
    value: f64,
    unit: TimeUnit,
}

impl SimDuration {
    /// Creates a duration.
    ///
    /// # Panics
    ///
    /// Panics if `value` is NaN or negative.
    pub fn new(value: f64, unit: TimeUnit) -> Self {
        assert!(value >= 0.0, "invalid simulation duration value: {value}");

        Self { value, unit }
    }

    /// The null duration.
    pub const fn zero(unit: TimeUnit) -> Self {
        Self { value: 0.0, unit }
    }

    /// The duration that never elapses.
    pub const fn infinity(unit: TimeUnit) -> Self {
        Self {
            value: f64::INFINITY,
            unit,
        }
    }

    /// Converts a wall-clock duration to a simulation duration of the
    /// specified unit.
    pub fn from_std(duration: Duration, unit: TimeUnit) -> Self {
        Self {
            value: duration.as_secs_f64() / unit.seconds_per_unit(),
            unit,
        }
    }

    /// Returns the raw value, expressed in [`SimDuration::unit`].
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Returns the unit of this duration.
    pub const fn unit(&self) -> TimeUnit {
        self.unit
    }

    /// Returns `true` if the duration is null.
    pub fn is_zero(&self) -> bool {
        self.value == 0.0
    }

    /// Returns `true` if the duration never elapses.
    pub fn is_infinite(&self) -> bool {
        self.value.is_infinite()
    }

    /// Converts the duration to a [`std::time::Duration`], or `None` if it is
    /// infinite or too large to be represented.
    pub fn to_std(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(self.value * self.unit.seconds_per_unit()).ok()
    }

    /// Adds two durations of the same unit.
    pub fn checked_add(self, rhs: SimDuration) -> Result<SimDuration, TimeError> {
        check_units(self.unit, rhs.unit)?;

        Ok(SimDuration {
            value: self.value + rhs.value,
            unit: self.unit,
        })
    }
}

impl PartialOrd for SimDuration {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.unit != other.unit {
            return None;
        }

        self.value.partial_cmp(&other.value)
    }
}

impl Add for SimDuration {
    type Output = SimDuration;

    /// Adds two durations.
    ///
    /// # Panics
    ///
    /// Panics if units differ.
    fn add(self, rhs: SimDuration) -> SimDuration {
        self.checked_add(rhs)
            .unwrap_or_else(|e| panic!("cannot add {rhs} to {self}: {e}"))
    }
}

impl fmt::Display for SimDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() {
            write!(f, "inf {}", self.unit)
        } else {
            write!(f, "{} {}", self.value, self.unit)
        }
    }
}

fn check_units(left: TimeUnit, right: TimeUnit) -> Result<(), TimeError> {
    if left != right {
        return Err(TimeError::UnitMismatch { left, right });
    }

    Ok(())
}

/// Error returned by checked simulation time arithmetic.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TimeError {
    /// The operands are expressed in different units.
    UnitMismatch {
        /// Unit of the left operand.
        left: TimeUnit,
        /// Unit of the right operand.
        right: TimeUnit,
    },
    /// An operand was the infinite time point.
    InfiniteOperand,
    /// The result would be a negative duration.
    NegativeDuration,
}

impl fmt::Display for TimeError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnitMismatch { left, right } => {
                write!(fmt, "mismatched time units '{left}' and '{right}'")
            }
            Self::InfiniteOperand => fmt.write_str("the infinite time cannot be an operand"),
            Self::NegativeDuration => fmt.write_str("the resulting duration would be negative"),
        }
    }
}

impl Error for TimeError {}

#[cfg(test)]
mod tests {
    use super::*;

    const S: TimeUnit = TimeUnit::Seconds;

    #[test]
    fn infinity_dominates_finite_times() {
        let inf = SimTime::infinity(S);

        assert!(inf > SimTime::new(1e300, S));
        assert!(SimTime::zero(S) < inf);
        assert_eq!(inf.checked_add(SimDuration::zero(S)), Err(TimeError::InfiniteOperand));
    }

    #[test]
    fn infinite_duration_yields_infinite_time() {
        let t = SimTime::new(3.0, S) + SimDuration::infinity(S);

        assert!(t.is_infinite());
        assert!((t - SimTime::new(3.0, S)).is_infinite());
    }

    #[test]
    fn mixed_units_do_not_compare() {
        let a = SimTime::new(1.0, S);
        let b = SimTime::new(1.0, TimeUnit::Milliseconds);

        assert_eq!(a.partial_cmp(&b), None);
        assert_ne!(a, b);
        assert_eq!(
            a.checked_add(SimDuration::new(1.0, TimeUnit::Milliseconds)),
            Err(TimeError::UnitMismatch {
                left: S,
                right: TimeUnit::Milliseconds
            })
        );
    }

    #[test]
    fn negative_elapsed_time_is_rejected() {
        let early = SimTime::new(1.0, S);
        let late = SimTime::new(2.0, S);

        assert_eq!(
            early.checked_duration_since(late),
            Err(TimeError::NegativeDuration)
        );
        assert_eq!(late - early, SimDuration::new(1.0, S));
    }

    #[test]
    fn std_conversion() {
        let d = SimDuration::new(1.5, TimeUnit::Minutes);

        assert_eq!(d.to_std(), Some(Duration::from_secs(90)));
        assert_eq!(SimDuration::infinity(S).to_std(), None);
        assert_eq!(
            SimDuration::from_std(Duration::from_millis(250), S),
            SimDuration::new(0.25, S)
        );
    }
}
