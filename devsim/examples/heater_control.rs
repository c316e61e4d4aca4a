//! Example: thermostat controlling a simulated room heater.
//!
//! This example demonstrates in particular:
//!
//! * coupled models with peer-to-peer routes and re-exported events,
//! * real-time simulation paced by an accelerated clock,
//! * a hysteresis controller closing the loop through a simulator endpoint,
//! * pull and push control modes.
//!
//! ```text
//!                    ┌────────────────────────────────────┐
//!                    │ House                              │
//!          heating   │  ┌────────┐ power  ┌──────┐        │ temperature
//!      ┌────────────►├─►│ Heater ├───────►│ Room ├────────┼────────┐
//!      │   (bool)    │  │        │  (W)   └──────┘        │        │
//!      │             │  │        ├────────────────────────┼───┐    │
//!      │             │  └────────┘                        │   │    │
//!      │             └────────────────────────────────────┘   │    │
//!      │                                              state   │    │
//!      │   ┌────────────┐◄───────────────────────────────────┘    │
//!      └───┤ Controller │◄────────────────────────────────────────┘
//!          └────────────┘                          measurement
//! ```
//!
//! Run with `cargo run --example heater_control [push]`; set `RUST_LOG=debug`
//! to follow the control decisions.

use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use devsim::architecture::{ArchitectureBuilder, AtomicDescriptor, CoupledDescriptor, Sink};
use devsim::controller::{
    ChannelError, ControlMode, Controller, ControllerConfig, Equipment, EquipmentState,
    Measurement,
};
use devsim::event::Event;
use devsim::model::{AtomicModel, ModelError, ReportPayload};
use devsim::simulation::{EndpointRegistry, LocalEndpoint, Simulation, SimulatorEndpoint};
use devsim::time::{
    AcceleratedClock, HostScheduler, PeriodicTaskKey, SimDuration, SimTime, TimeUnit,
};
use devsim::util::deferred;

const S: TimeUnit = TimeUnit::Seconds;

/// Room temperature set point [°C].
const TARGET: f64 = 19.0;

/// Electric heater.
pub struct Heater {
    /// Nominal power [W] -- constant.
    nominal_power: f64,
    state: EquipmentState,
    announce: bool,
    switchings: usize,
}

impl Heater {
    /// Creates a heater with the specified nominal power [W].
    pub fn new(nominal_power: f64) -> Self {
        Self {
            nominal_power,
            state: EquipmentState::Off,
            announce: false,
            switchings: 0,
        }
    }

    fn power(&self) -> f64 {
        if self.state == EquipmentState::Actuating {
            self.nominal_power
        } else {
            0.0
        }
    }
}

impl AtomicModel for Heater {
    fn initialise_state(&mut self, _: SimTime) {
        // The heater is switched on when the simulation starts.
        self.state = EquipmentState::OnNotActuating;
        self.announce = true;
        self.switchings = 0;
    }

    fn time_advance(&self) -> SimDuration {
        if self.announce {
            SimDuration::zero(S)
        } else {
            SimDuration::infinity(S)
        }
    }

    fn output(&mut self, current: SimTime) -> Result<Vec<Event>, ModelError> {
        Ok(vec![
            Event::new("power", current, self.power()),
            Event::new("state", current, self.state),
        ])
    }

    fn internal_transition(&mut self, _: SimTime) -> Result<(), ModelError> {
        self.announce = false;

        Ok(())
    }

    fn external_transition(
        &mut self,
        _: SimTime,
        _: SimDuration,
        events: Vec<Event>,
    ) -> Result<(), ModelError> {
        for event in events {
            event
                .execute_on(self, |heater, heating: &bool| {
                    let state = if *heating {
                        EquipmentState::Actuating
                    } else {
                        EquipmentState::OnNotActuating
                    };
                    if state != heater.state {
                        heater.state = state;
                        heater.switchings += 1;
                        heater.announce = true;
                    }
                })
                .map_err(|e| ModelError::with_source("invalid heating command", e))?;
        }

        Ok(())
    }

    fn final_report(&self) -> Option<Box<dyn ReportPayload>> {
        Some(Box::new(HeaterReport {
            switchings: self.switchings,
        }))
    }

    fn show_state_content(&self) -> String {
        format!("state = {:?}\npower = {} W", self.state, self.power())
    }
}

#[derive(Debug)]
struct HeaterReport {
    switchings: usize,
}

impl fmt::Display for HeaterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} switchings", self.switchings)
    }
}

/// First-order thermal model of a room.
pub struct Room {
    /// Heat capacity [J·K⁻¹] -- constant.
    capacity: f64,
    /// Thermal time constant of the losses [s] -- constant.
    time_constant: f64,
    /// Outdoor temperature [°C] -- constant.
    outdoor: f64,
    /// Sampling period of the temperature [s] -- constant.
    period: f64,
    temperature: f64,
    power: f64,
    range: (f64, f64),
}

impl Room {
    /// Creates a room at the specified initial temperature [°C].
    pub fn new(temperature: f64) -> Self {
        Self {
            capacity: 2.4e5,
            time_constant: 3600.0,
            outdoor: 5.0,
            period: 60.0,
            temperature,
            power: 0.0,
            range: (temperature, temperature),
        }
    }

    /// Returns the temperature after `duration` [s] at constant power.
    fn predict(&self, duration: f64) -> f64 {
        let derivative =
            self.power / self.capacity - (self.temperature - self.outdoor) / self.time_constant;

        self.temperature + derivative * duration
    }

    fn integrate(&mut self, duration: f64) {
        self.temperature = self.predict(duration);
        self.range = (
            self.range.0.min(self.temperature),
            self.range.1.max(self.temperature),
        );
    }
}

impl AtomicModel for Room {
    fn time_advance(&self) -> SimDuration {
        SimDuration::new(self.period, S)
    }

    fn output(&mut self, current: SimTime) -> Result<Vec<Event>, ModelError> {
        Ok(vec![Event::new(
            "temperature",
            current,
            Measurement {
                current: self.predict(self.period),
                target: TARGET,
            },
        )])
    }

    fn internal_transition(&mut self, _: SimTime) -> Result<(), ModelError> {
        self.integrate(self.period);

        Ok(())
    }

    fn external_transition(
        &mut self,
        _: SimTime,
        elapsed: SimDuration,
        events: Vec<Event>,
    ) -> Result<(), ModelError> {
        self.integrate(elapsed.value());
        for event in events {
            event
                .execute_on(self, |room, power: &f64| room.power = *power)
                .map_err(|e| ModelError::with_source("invalid heating power", e))?;
        }

        Ok(())
    }

    fn final_report(&self) -> Option<Box<dyn ReportPayload>> {
        Some(Box::new(format!(
            "temperature between {:.2} and {:.2} °C",
            self.range.0, self.range.1
        )))
    }

    fn show_state_content(&self) -> String {
        format!("temperature = {:.2} °C", self.temperature)
    }
}

/// The heater as seen by the controller, backed by a simulator endpoint.
struct SimulatedHeater {
    endpoint: Arc<dyn SimulatorEndpoint>,
    scheduler: HostScheduler,
    controller: Arc<OnceLock<Controller>>,
    latest: Arc<Mutex<Option<Measurement>>>,
    pushes: Mutex<Option<PeriodicTaskKey>>,
}

impl SimulatedHeater {
    fn command(&self, heating: bool) -> Result<(), ChannelError> {
        // The event is stamped by the real-time simulator.
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
        let controller = self.controller.clone();
        let latest = self.latest.clone();
        let key = self.scheduler.schedule_periodic(period, move || {
            let measurement = *latest.lock().unwrap();
            if let (Some(controller), Some(measurement)) = (controller.get(), measurement) {
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

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mode = match std::env::args().nth(1).as_deref() {
        Some("push") => ControlMode::Push,
        _ => ControlMode::Pull,
    };

    // ---------------
    // Bench assembly.
    // ---------------

    // One simulated minute lasts 50ms.
    let architecture = ArchitectureBuilder::new("house", S)
        .atomic(
            AtomicDescriptor::new("heater", S, || Heater::new(2000.0))
                .imports("heating")
                .exports("power")
                .exports("state")
                .with_acceleration_factor(1200.0),
        )
        .atomic(
            AtomicDescriptor::new("room", S, || Room::new(17.0))
                .imports("power")
                .exports("temperature"),
        )
        .coupled(
            CoupledDescriptor::new("house")
                .submodel("heater")
                .submodel("room")
                .imports("heating", Sink::new("heater", "heating"))
                .route("heater", "power", Sink::new("room", "power"))
                .reexport("heater", "state", "state")
                .reexport("room", "temperature", "temperature"),
        )
        .build()?;

    let scheduler = HostScheduler::new();
    let mut simu = Simulation::builder(architecture)
        .set_scheduler(scheduler.clone())
        .build();
    let clock = simu.clock().ok_or("no accelerated clock")?;

    // Measurements and state notifications.
    let latest = Arc::new(Mutex::new(None));
    let sink_latest = latest.clone();
    simu.connect_sink("temperature", move |event: &Event| {
        if let Some(measurement) = event.payload::<Measurement>() {
            *sink_latest.lock().unwrap() = Some(*measurement);
        }
    })?;
    let controller = Arc::new(OnceLock::<Controller>::new());
    let sink_controller = controller.clone();
    simu.connect_sink("state", move |event: &Event| {
        if let (Some(controller), Some(state)) =
            (sink_controller.get(), event.payload::<EquipmentState>())
        {
            // Failures are logged by the controller.
            let _ = controller.state_changed(*state);
        }
    })?;

    let mut registry = EndpointRegistry::new();
    registry
        .add(Arc::new(LocalEndpoint::new(simu)), "house")
        .map_err(|_| "duplicate endpoint")?;
    let endpoint = registry.get("house")?;

    // Controller.
    let (promise, deferred_clock) = deferred::<Arc<dyn AcceleratedClock>>();
    let heater = Arc::new(SimulatedHeater {
        endpoint: endpoint.clone(),
        scheduler: scheduler.clone(),
        controller: controller.clone(),
        latest,
        pushes: Mutex::new(None),
    });
    let config = ControllerConfig {
        mode,
        ..ControllerConfig::default()
    };
    controller
        .set(Controller::new(config, heater.clone(), scheduler, deferred_clock))
        .map_err(|_| "controller already set")?;

    // ----------
    // Simulation.
    // ----------

    // A run of two simulated hours starting 100ms from now, stopped after
    // about 100 simulated minutes.
    endpoint.construct_simulator()?;
    endpoint.start_rt_simulation(
        clock.current_instant() + Duration::from_secs(120),
        SimTime::zero(S),
        SimDuration::new(7200.0, S),
    )?;
    promise.fulfil(clock);

    std::thread::sleep(Duration::from_secs(5));
    endpoint.stop_simulation()?;
    if let Some(controller) = controller.get() {
        controller.stop();
    }
    heater.stop_pushing();

    endpoint.finalise_simulation()?;
    println!("{}", endpoint.get_final_report()?);

    Ok(())
}
