//! Closed-loop hysteresis control of simulated or real equipment.
//!
//! A [`Controller`] mirrors the state reported by a piece of equipment
//! (off, on but not actuating, actuating) and keeps a measured quantity
//! within a band around a target by starting and stopping actuation. The
//! equipment is reached through the [`Equipment`] trait, which may be backed
//! by a simulation or by the real device.
//!
//! Two scheduling strategies are available:
//!
//! * [`ControlMode::Pull`]: when the equipment is switched on, the controller
//!   polls the measurements every control period until the equipment
//!   reports that it is off,
//! * [`ControlMode::Push`]: when the equipment is switched on, the controller
//!   asks it to push measurements every control period, and performs one
//!   decision step per measurement received through
//!   [`Controller::receive_measurement()`].
//!
//! Control periods are expressed on the accelerated timeline. They are
//! converted to wall-clock periods with the [`AcceleratedClock`] delivered
//! through a [`Deferred`] value, and any attempt to schedule a control task
//! blocks until that clock is available.
//!
//! A push subscription is never cancelled by the controller: measurements
//! received while the recorded state is off are ignored.
mod hysteresis;

pub use hysteresis::{decide, Decision};

use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::time::{AcceleratedClock, HostScheduler, TaskKey};
use crate::util::{Abandoned, Deferred};

/// The state reported by a piece of equipment.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EquipmentState {
    /// Switched off.
    #[default]
    Off,
    /// Switched on, actuator idle.
    OnNotActuating,
    /// Switched on, actuator running.
    Actuating,
}

/// The scheduling strategy of a controller.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ControlMode {
    /// The controller polls the measurements.
    #[default]
    Pull,
    /// The equipment pushes the measurements.
    Push,
}

/// A measured quantity and its set point.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Measurement {
    /// The measured value.
    pub current: f64,
    /// The set point.
    pub target: f64,
}

/// Configuration of a [`Controller`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ControllerConfig {
    /// Half-width of the band around the target.
    pub hysteresis: f64,
    /// Period of the control steps on the accelerated timeline.
    pub control_period: Duration,
    /// Scheduling strategy.
    pub mode: ControlMode,
    /// Optional timeout of the measurement polls.
    pub pull_timeout: Option<Duration>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            hysteresis: 0.5,
            control_period: Duration::from_secs(60),
            mode: ControlMode::Pull,
            pull_timeout: None,
        }
    }
}

/// The operations of a controlled piece of equipment.
///
/// Calls may block, for instance while a remote device answers. Failures are
/// reported to the controller, which logs them and never retries.
pub trait Equipment: Send + Sync {
    /// Returns the current measurement and its target.
    fn measurements(&self, timeout: Option<Duration>) -> Result<Measurement, ChannelError>;

    /// Starts the actuator.
    fn start_actuating(&self) -> Result<(), ChannelError>;

    /// Stops the actuator.
    fn stop_actuating(&self) -> Result<(), ChannelError>;

    /// Requests the equipment to push a measurement every wall-clock
    /// `period`.
    fn start_pushing(&self, period: Duration) -> Result<(), ChannelError>;
}

/// A hysteresis controller.
///
/// The recorded equipment state is only written by
/// [`state_changed()`](Controller::state_changed) and is read once at the
/// top of each decision step. A decision which was already issued since the
/// last state change is not issued again.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

struct Inner {
    config: ControllerConfig,
    equipment: Arc<dyn Equipment>,
    scheduler: HostScheduler,
    clock: Deferred<Arc<dyn AcceleratedClock>>,
    recorded: Mutex<Recorded>,
}

struct Recorded {
    state: EquipmentState,
    // Incremented whenever the equipment is switched on or the controller is
    // stopped; a polling loop only runs for the generation it was started in.
    generation: u64,
    last_command: Option<Decision>,
    pending: Option<TaskKey>,
}

impl Controller {
    /// Creates a controller of an equipment which is initially off.
    pub fn new(
        config: ControllerConfig,
        equipment: Arc<dyn Equipment>,
        scheduler: HostScheduler,
        clock: Deferred<Arc<dyn AcceleratedClock>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                equipment,
                scheduler,
                clock,
                recorded: Mutex::new(Recorded {
                    state: EquipmentState::Off,
                    generation: 0,
                    last_command: None,
                    pending: None,
                }),
            }),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    /// Returns the recorded equipment state.
    pub fn recorded_state(&self) -> EquipmentState {
        self.inner.recorded.lock().unwrap().state
    }

    /// Records a state notification from the equipment.
    ///
    /// When the equipment is switched on, this starts the polling loop or
    /// requests measurement pushes, depending on the mode; this blocks until
    /// the accelerated clock is available.
    pub fn state_changed(&self, state: EquipmentState) -> Result<(), ControllerError> {
        let switched_on = {
            let mut recorded = self.inner.recorded.lock().unwrap();
            let previous = recorded.state;
            if previous == state {
                return Ok(());
            }
            recorded.state = state;
            recorded.last_command = None;
            debug!(from = ?previous, to = ?state, "equipment state changed");

            if previous == EquipmentState::Off {
                recorded.generation += 1;
                Some(recorded.generation)
            } else {
                None
            }
        };

        match (switched_on, self.inner.config.mode) {
            (Some(generation), ControlMode::Pull) => self.inner.schedule_poll(generation),
            (Some(_), ControlMode::Push) => {
                let period = self.accelerated_period()?;
                info!(period = ?period, "requesting measurement pushes");
                self.inner.equipment.start_pushing(period).map_err(|e| {
                    warn!(error = %e, "failed to request measurement pushes");
                    e.into()
                })
            }
            (None, _) => Ok(()),
        }
    }

    /// Polls the equipment and performs one decision step.
    pub fn control_step(&self) -> Result<Decision, ControllerError> {
        self.inner.poll_and_decide()
    }

    /// Performs one decision step on a pushed measurement.
    ///
    /// Measurements received while the equipment is recorded as off are
    /// ignored.
    pub fn receive_measurement(&self, measurement: Measurement) -> Result<Decision, ControllerError> {
        self.inner.decide_and_actuate(measurement)
    }

    /// Returns the wall-clock duration of the control period.
    ///
    /// This blocks until the accelerated clock is available.
    pub fn accelerated_period(&self) -> Result<Duration, ControllerError> {
        self.inner.accelerated_period()
    }

    /// Cancels the polling loop, if any.
    pub fn stop(&self) {
        let mut recorded = self.inner.recorded.lock().unwrap();
        recorded.generation += 1;
        if let Some(key) = recorded.pending.take() {
            key.cancel();
        }
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.inner.config)
            .field("state", &self.recorded_state())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn accelerated_period(&self) -> Result<Duration, ControllerError> {
        let clock = self.clock.wait()?;

        Ok(clock.wall_clock_duration(self.config.control_period))
    }

    fn schedule_poll(self: &Arc<Self>, generation: u64) -> Result<(), ControllerError> {
        let period = self.accelerated_period()?;
        let inner = Arc::downgrade(self);
        let key = self.scheduler.schedule_after(period, move || poll(inner, generation));

        let mut recorded = self.recorded.lock().unwrap();
        if recorded.generation == generation {
            recorded.pending = Some(key);
        } else {
            key.cancel();
        }

        Ok(())
    }

    fn is_current(&self, generation: u64) -> bool {
        let recorded = self.recorded.lock().unwrap();

        recorded.generation == generation && recorded.state != EquipmentState::Off
    }

    fn poll_and_decide(&self) -> Result<Decision, ControllerError> {
        let measurement = self
            .equipment
            .measurements(self.config.pull_timeout)
            .map_err(|e| {
                warn!(error = %e, "failed to poll the measurements");
                ControllerError::from(e)
            })?;

        self.decide_and_actuate(measurement)
    }

    fn decide_and_actuate(&self, measurement: Measurement) -> Result<Decision, ControllerError> {
        let decision = {
            let mut recorded = self.recorded.lock().unwrap();
            if recorded.state == EquipmentState::Off {
                trace!("measurement ignored while the equipment is off");
                return Ok(Decision::Hold);
            }
            let decision = decide(measurement, self.config.hysteresis, recorded.state);
            if decision == Decision::Hold || recorded.last_command == Some(decision) {
                return Ok(Decision::Hold);
            }
            recorded.last_command = Some(decision);

            decision
        };

        debug!(
            current = measurement.current,
            target = measurement.target,
            decision = ?decision,
            "control decision"
        );
        let result = match decision {
            Decision::StartActuating => self.equipment.start_actuating(),
            Decision::StopActuating => self.equipment.stop_actuating(),
            Decision::Hold => Ok(()),
        };
        if let Err(e) = result {
            warn!(error = %e, decision = ?decision, "actuation command failed");
            self.recorded.lock().unwrap().last_command = None;
            return Err(e.into());
        }

        Ok(decision)
    }
}

/// One iteration of the polling loop.
fn poll(inner: Weak<Inner>, generation: u64) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    if !inner.is_current(generation) {
        debug!("polling loop exits");
        return;
    }

    // Failures are logged by the step and do not end the loop.
    let _ = inner.poll_and_decide();

    if inner.is_current(generation) {
        if let Err(e) = inner.schedule_poll(generation) {
            warn!(error = %e, "cannot reschedule the polling loop");
        }
    } else {
        debug!("polling loop exits");
    }
}

/// Error returned by a remote invocation channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelError {
    /// The remote endpoint is not reachable.
    Disconnected,
    /// The remote endpoint did not answer in time.
    Timeout,
    /// The remote operation failed.
    Failed(String),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => fmt.write_str("the remote endpoint is disconnected"),
            Self::Timeout => fmt.write_str("the remote endpoint did not answer in time"),
            Self::Failed(message) => write!(fmt, "the remote operation failed: {message}"),
        }
    }
}

impl Error for ChannelError {}

/// Error returned by a [`Controller`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControllerError {
    /// A call to the equipment failed.
    Channel(ChannelError),
    /// The accelerated clock will never be available.
    ClockUnavailable,
}

impl fmt::Display for ControllerError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channel(e) => write!(fmt, "equipment call failed: {e}"),
            Self::ClockUnavailable => fmt.write_str("the accelerated clock is unavailable"),
        }
    }
}

impl Error for ControllerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Channel(e) => Some(e),
            Self::ClockUnavailable => None,
        }
    }
}

impl From<ChannelError> for ControllerError {
    fn from(e: ChannelError) -> Self {
        Self::Channel(e)
    }
}

impl From<Abandoned> for ControllerError {
    fn from(_: Abandoned) -> Self {
        Self::ClockUnavailable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::time::{MonotonicTime, SystemAcceleratedClock};
    use crate::util::deferred;

    #[derive(Default)]
    struct Thermostat {
        measurement: Mutex<Option<Measurement>>,
        calls: Mutex<Vec<&'static str>>,
        push_periods: Mutex<Vec<Duration>>,
    }

    impl Thermostat {
        fn set(&self, current: f64) {
            *self.measurement.lock().unwrap() = Some(Measurement {
                current,
                target: 19.0,
            });
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Equipment for Thermostat {
        fn measurements(&self, _: Option<Duration>) -> Result<Measurement, ChannelError> {
            self.measurement.lock().unwrap().ok_or(ChannelError::Timeout)
        }
        fn start_actuating(&self) -> Result<(), ChannelError> {
            self.calls.lock().unwrap().push("start");
            Ok(())
        }
        fn stop_actuating(&self) -> Result<(), ChannelError> {
            self.calls.lock().unwrap().push("stop");
            Ok(())
        }
        fn start_pushing(&self, period: Duration) -> Result<(), ChannelError> {
            self.push_periods.lock().unwrap().push(period);
            Ok(())
        }
    }

    fn controller(mode: ControlMode, control_period: Duration) -> (Controller, Arc<Thermostat>) {
        let thermostat = Arc::new(Thermostat::default());
        let (promise, clock) = deferred::<Arc<dyn AcceleratedClock>>();
        promise.fulfil(Arc::new(
            SystemAcceleratedClock::new(MonotonicTime::EPOCH, std::time::Instant::now(), 60.0)
                .unwrap(),
        ));
        let config = ControllerConfig {
            hysteresis: 0.5,
            control_period,
            mode,
            pull_timeout: None,
        };

        (
            Controller::new(config, thermostat.clone(), HostScheduler::new(), clock),
            thermostat,
        )
    }

    #[test]
    fn pull_hysteresis_scenario() {
        // The polling loop is far in the future: steps are driven manually.
        let (controller, thermostat) = controller(ControlMode::Pull, Duration::from_secs(3600));
        controller.state_changed(EquipmentState::OnNotActuating).unwrap();

        thermostat.set(18.0);
        assert_eq!(controller.control_step(), Ok(Decision::StartActuating));
        assert_eq!(thermostat.calls(), ["start"]);
        controller.state_changed(EquipmentState::Actuating).unwrap();

        thermostat.set(19.2);
        assert_eq!(controller.control_step(), Ok(Decision::Hold));
        assert_eq!(thermostat.calls(), ["start"]);

        thermostat.set(19.6);
        assert_eq!(controller.control_step(), Ok(Decision::StopActuating));
        assert_eq!(thermostat.calls(), ["start", "stop"]);

        controller.stop();
    }

    #[test]
    fn decisions_are_not_reissued() {
        let (controller, thermostat) = controller(ControlMode::Pull, Duration::from_secs(3600));
        controller.state_changed(EquipmentState::OnNotActuating).unwrap();

        thermostat.set(18.0);
        for _ in 0..3 {
            controller.control_step().unwrap();
        }
        assert_eq!(thermostat.calls(), ["start"]);

        // A new state notification re-arms the decision.
        controller.state_changed(EquipmentState::Actuating).unwrap();
        controller.state_changed(EquipmentState::OnNotActuating).unwrap();
        controller.control_step().unwrap();
        assert_eq!(thermostat.calls(), ["start", "start"]);

        controller.stop();
    }

    #[test]
    fn push_mode_ignores_measurements_while_off() {
        let (controller, thermostat) = controller(ControlMode::Push, Duration::from_secs(120));
        let cold = Measurement {
            current: 10.0,
            target: 19.0,
        };

        assert_eq!(controller.receive_measurement(cold), Ok(Decision::Hold));
        assert!(thermostat.calls().is_empty());

        controller.state_changed(EquipmentState::OnNotActuating).unwrap();
        assert_eq!(
            *thermostat.push_periods.lock().unwrap(),
            [Duration::from_secs(2)]
        );
        assert_eq!(controller.receive_measurement(cold), Ok(Decision::StartActuating));

        controller.state_changed(EquipmentState::Off).unwrap();
        assert_eq!(controller.receive_measurement(cold), Ok(Decision::Hold));
        assert_eq!(thermostat.calls(), ["start"]);
    }

    #[test]
    fn abandoned_clock_is_reported() {
        let (promise, clock) = deferred::<Arc<dyn AcceleratedClock>>();
        drop(promise);
        let controller = Controller::new(
            ControllerConfig::default(),
            Arc::new(Thermostat::default()),
            HostScheduler::new(),
            clock,
        );

        assert_eq!(
            controller.state_changed(EquipmentState::OnNotActuating),
            Err(ControllerError::ClockUnavailable)
        );
    }
}
