//! A hysteresis controller driving a heater simulated in real time.

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread;
use std::time::Duration;

use devsim::architecture::{ArchitectureBuilder, AtomicDescriptor};
use devsim::controller::{
    ChannelError, ControlMode, Controller, ControllerConfig, Equipment, EquipmentState,
    Measurement,
};
use devsim::event::Event;
use devsim::model::{AtomicModel, ModelError, ReportPayload};
use devsim::simulation::{LocalEndpoint, Simulation, SimulatorEndpoint};
use devsim::time::{
    AcceleratedClock, HostScheduler, PeriodicTaskKey, SimDuration, SimTime, TimeUnit,
};
use devsim::util::deferred;

const S: TimeUnit = TimeUnit::Seconds;
const TARGET: f64 = 19.0;

#[derive(Debug)]
struct HeaterReport {
    commands: Vec<bool>,
}

impl fmt::Display for HeaterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} commands", self.commands.len())
    }
}

// Heats by 1°C per minute while actuating and cools by 0.5°C per minute
// otherwise; reports its temperature every minute and its state on change.
struct Heater {
    temperature: f64,
    state: EquipmentState,
    announce: bool,
    commands: Vec<bool>,
}

impl Heater {
    fn new() -> Self {
        Self {
            temperature: 17.0,
            state: EquipmentState::Off,
            announce: false,
            commands: Vec::new(),
        }
    }
}

impl AtomicModel for Heater {
    fn initialise_state(&mut self, _: SimTime) {
        *self = Self::new();
        self.state = EquipmentState::OnNotActuating;
        self.announce = true;
    }
    fn time_advance(&self) -> SimDuration {
        if self.announce {
            SimDuration::zero(S)
        } else {
            SimDuration::new(60.0, S)
        }
    }
    fn output(&mut self, current: SimTime) -> Result<Vec<Event>, ModelError> {
        let mut events = vec![Event::new(
            "temperature",
            current,
            Measurement {
                current: self.temperature,
                target: TARGET,
            },
        )];
        if self.announce {
            events.push(Event::new("state", current, self.state));
        }

        Ok(events)
    }
    fn internal_transition(&mut self, _: SimTime) -> Result<(), ModelError> {
        if self.announce {
            self.announce = false;
        } else if self.state == EquipmentState::Actuating {
            self.temperature += 1.0;
        } else {
            self.temperature -= 0.5;
        }
        Ok(())
    }
    fn external_transition(
        &mut self,
        _: SimTime,
        _: SimDuration,
        events: Vec<Event>,
    ) -> Result<(), ModelError> {
        for event in events {
            let heating = *event
                .payload::<bool>()
                .ok_or_else(|| ModelError::new("invalid heating command"))?;
            self.commands.push(heating);
            let state = if heating {
                EquipmentState::Actuating
            } else {
                EquipmentState::OnNotActuating
            };
            if state != self.state {
                self.state = state;
                self.announce = true;
            }
        }
        Ok(())
    }
    fn final_report(&self) -> Option<Box<dyn ReportPayload>> {
        Some(Box::new(HeaterReport {
            commands: self.commands.clone(),
        }))
    }
}

// The equipment as seen by the controller.
struct SimulatedHeater {
    endpoint: Arc<LocalEndpoint>,
    latest: Arc<Mutex<Option<Measurement>>>,
    scheduler: HostScheduler,
    controller: Weak<OnceLock<Controller>>,
    pushes: Mutex<Option<PeriodicTaskKey>>,
}

impl SimulatedHeater {
    fn command(&self, heating: bool) -> Result<(), ChannelError> {
        self.endpoint
            .inject_event(Event::new("heating", SimTime::zero(S), heating))
            .map_err(|e| ChannelError::Failed(e.to_string()))
    }

    fn stop_pushing(&self) {
        if let Some(key) = self.pushes.lock().unwrap().take() {
            key.cancel();
        }
    }
}

impl Equipment for SimulatedHeater {
    fn measurements(&self, _: Option<Duration>) -> Result<Measurement, ChannelError> {
        self.latest.lock().unwrap().ok_or(ChannelError::Timeout)
    }
    fn start_actuating(&self) -> Result<(), ChannelError> {
        self.command(true)
    }
    fn stop_actuating(&self) -> Result<(), ChannelError> {
        self.command(false)
    }
    fn start_pushing(&self, period: Duration) -> Result<(), ChannelError> {
        let latest = self.latest.clone();
        let controller = self.controller.clone();
        let key = self.scheduler.schedule_periodic(period, move || {
            let Some(controller) = controller.upgrade() else {
                return false;
            };
            let Some(controller) = controller.get() else {
                return true;
            };
            if controller.recorded_state() == EquipmentState::Off {
                return false;
            }
            if let Some(measurement) = *latest.lock().unwrap() {
                // Failures are logged by the controller.
                let _ = controller.receive_measurement(measurement);
            }
            true
        });
        if let Some(previous) = self.pushes.lock().unwrap().replace(key) {
            previous.cancel();
        }

        Ok(())
    }
}

// Runs the heater for 18 simulated minutes under a controller in the
// specified mode and returns the heating commands it received.
fn run_heater(mode: ControlMode) -> Vec<bool> {
    let architecture = ArchitectureBuilder::new("heater", S)
        .atomic(
            AtomicDescriptor::new("heater", S, Heater::new)
                .imports("heating")
                .exports("temperature")
                .exports("state")
                .with_acceleration_factor(600.0),
        )
        .build()
        .unwrap();
    let scheduler = HostScheduler::new();
    let mut simu = Simulation::builder(architecture)
        .set_scheduler(scheduler.clone())
        .build();
    let clock = simu.clock().unwrap();

    let latest = Arc::new(Mutex::new(None));
    let sink_latest = latest.clone();
    simu.connect_sink("temperature", move |event: &Event| {
        *sink_latest.lock().unwrap() = event.payload::<Measurement>().copied();
    })
    .unwrap();
    let controller: Arc<OnceLock<Controller>> = Arc::new(OnceLock::new());
    let sink_controller = controller.clone();
    simu.connect_sink("state", move |event: &Event| {
        if let (Some(controller), Some(state)) =
            (sink_controller.get(), event.payload::<EquipmentState>())
        {
            controller.state_changed(*state).unwrap();
        }
    })
    .unwrap();

    let endpoint = Arc::new(LocalEndpoint::new(simu));
    let (promise, deferred_clock) = deferred::<Arc<dyn AcceleratedClock>>();
    let config = ControllerConfig {
        hysteresis: 0.5,
        control_period: Duration::from_secs(60),
        mode,
        pull_timeout: None,
    };
    let equipment = Arc::new(SimulatedHeater {
        endpoint: endpoint.clone(),
        latest,
        scheduler: scheduler.clone(),
        controller: Arc::downgrade(&controller),
        pushes: Mutex::new(None),
    });
    assert!(controller
        .set(Controller::new(
            config,
            equipment.clone(),
            scheduler.clone(),
            deferred_clock
        ))
        .is_ok());

    // One simulated minute lasts 100ms.
    endpoint.construct_simulator().unwrap();
    let instant_of_start = clock.current_instant() + Duration::from_secs(30);
    endpoint
        .start_rt_simulation(
            instant_of_start,
            SimTime::zero(S),
            SimDuration::new(3600.0, S),
        )
        .unwrap();
    promise.fulfil(clock);

    thread::sleep(Duration::from_millis(1800));
    endpoint.stop_simulation().unwrap();
    controller.get().unwrap().stop();
    equipment.stop_pushing();

    endpoint.finalise_simulation().unwrap();
    let report = endpoint.get_final_report().unwrap();
    let commands = report.payload_as::<HeaterReport>().unwrap().commands.clone();
    scheduler.shutdown();

    commands
}

#[test]
fn pull_controller_keeps_the_heater_in_band() {
    let commands = run_heater(ControlMode::Pull);

    // Starting below the band, the heater is switched on first and the
    // commands alternate from then on.
    assert!(commands.len() >= 2, "{commands:?}");
    assert!(commands[0]);
    assert!(commands.windows(2).all(|w| w[0] != w[1]), "{commands:?}");
}

#[test]
fn push_controller_keeps_the_heater_in_band() {
    let commands = run_heater(ControlMode::Push);

    assert!(commands.len() >= 2, "{commands:?}");
    assert!(commands[0]);
    assert!(commands.windows(2).all(|w| w[0] != w[1]), "{commands:?}");
}
