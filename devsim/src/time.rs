//! Simulation time, accelerated clocks and wall-clock scheduling.
//!
//! This module provides most notably:
//!
//! * [`SimTime`] and [`SimDuration`]: points and spans on a simulation clock,
//!   tagged with a [`TimeUnit`],
//! * [`AcceleratedClock`]: a trait for wall clocks scaled by a fixed
//!   acceleration factor, implemented for instance by
//!   [`SystemAcceleratedClock`],
//! * [`HostScheduler`]: a timer thread executing cancellable tasks at
//!   wall-clock deadlines, used to pace real-time simulations and controllers.
//!
//! Instants of accelerated clocks are [`MonotonicTime`] timestamps based on
//! the [TAI] time standard.
//!
//! [TAI]: https://en.wikipedia.org/wiki/International_Atomic_Time
//!
//! # Examples
//!
//! Converting a simulated control period to a wall-clock period.
//!
//! ```
//! use std::time::Duration;
//!
//! use devsim::time::{AcceleratedClock, SystemAcceleratedClock};
//!
//! let clock = SystemAcceleratedClock::starting_in(Duration::ZERO, 60.0).unwrap();
//!
//! assert_eq!(
//!     clock.wall_clock_duration(Duration::from_secs(120)),
//!     Duration::from_secs(2)
//! );
//! ```

mod clock;
mod scheduler;
mod sim_time;

pub use tai_time::MonotonicTime;

pub use clock::{AcceleratedClock, ClockError, SystemAcceleratedClock};
pub use scheduler::{HostScheduler, PeriodicTaskKey, TaskKey};
pub use sim_time::{SimDuration, SimTime, TimeError, TimeUnit};
