//! Real-time runs paced against an accelerated clock.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use devsim::architecture::{ArchitectureBuilder, AtomicDescriptor, ConfigurationError};
use devsim::event::Event;
use devsim::model::{AtomicModel, ModelError};
use devsim::simulation::{EventBuffer, ProtocolError, Simulation, SimulationError};
use devsim::time::{
    AcceleratedClock, MonotonicTime, SimDuration, SimTime, SystemAcceleratedClock, TimeUnit,
};

const S: TimeUnit = TimeUnit::Seconds;

fn t(value: f64) -> SimTime {
    SimTime::new(value, S)
}

fn d(value: f64) -> SimDuration {
    SimDuration::new(value, S)
}

// Beats every minute.
struct Beacon;

impl AtomicModel for Beacon {
    fn time_advance(&self) -> SimDuration {
        d(60.0)
    }
    fn output(&mut self, current: SimTime) -> Result<Vec<Event>, ModelError> {
        Ok(vec![Event::signal("beat", current)])
    }
    fn internal_transition(&mut self, _: SimTime) -> Result<(), ModelError> {
        Ok(())
    }
    fn external_transition(&mut self, _: SimTime, _: SimDuration, _: Vec<Event>) -> Result<(), ModelError> {
        Ok(())
    }
}

// Acknowledges each command right away.
#[derive(Default)]
struct Relay {
    pending: bool,
}

impl AtomicModel for Relay {
    fn time_advance(&self) -> SimDuration {
        if self.pending {
            SimDuration::zero(S)
        } else {
            SimDuration::infinity(S)
        }
    }
    fn output(&mut self, current: SimTime) -> Result<Vec<Event>, ModelError> {
        Ok(vec![Event::signal("ack", current)])
    }
    fn internal_transition(&mut self, _: SimTime) -> Result<(), ModelError> {
        self.pending = false;
        Ok(())
    }
    fn external_transition(&mut self, _: SimTime, _: SimDuration, _: Vec<Event>) -> Result<(), ModelError> {
        self.pending = true;
        Ok(())
    }
}

// Fails on its first output, either by panicking or with an error.
struct Faulty {
    panics: bool,
}

impl AtomicModel for Faulty {
    fn time_advance(&self) -> SimDuration {
        d(6.0)
    }
    fn output(&mut self, _: SimTime) -> Result<Vec<Event>, ModelError> {
        if self.panics {
            panic!("thermocouple open circuit");
        }
        Err(ModelError::new("thermocouple out of range"))
    }
    fn internal_transition(&mut self, _: SimTime) -> Result<(), ModelError> {
        Ok(())
    }
    fn external_transition(&mut self, _: SimTime, _: SimDuration, _: Vec<Event>) -> Result<(), ModelError> {
        Ok(())
    }
}

fn faulty_run_is_ended(panics: bool, message: &str) {
    let architecture = ArchitectureBuilder::new("thermometer", S)
        .atomic(AtomicDescriptor::new("thermometer", S, move || Faulty { panics }))
        .build()
        .unwrap();
    let clock = SystemAcceleratedClock::starting_in(Duration::ZERO, 60.0).unwrap();
    let mut simu = Simulation::builder(architecture).set_clock(clock).build();
    simu.construct_simulator().unwrap();

    // The failure is due 100ms after the start.
    let instant_of_start = clock.current_instant() + Duration::from_secs(1);
    simu.start_rt_simulation(instant_of_start, t(0.0), d(60.0))
        .unwrap();
    assert!(simu.wait_rt_simulation(Duration::from_secs(2)));
    assert!(!simu.is_rt_simulation_running());

    match simu.join_rt_simulation() {
        Err(SimulationError::Model { uri, source }) => {
            assert_eq!(uri.as_str(), "thermometer");
            assert!(source.to_string().contains(message), "{source}");
        }
        other => panic!("unexpected result: {other:?}"),
    }

    // The run was ended at the time of the last transition.
    let state = simu.root_state().unwrap();
    assert!(!state.running);
    assert_eq!(state.time_of_last_event, t(0.0));
    simu.finalise_simulation().unwrap();
    simu.construct_simulator().unwrap();
}

#[test]
fn failing_model_ends_the_run() {
    faulty_run_is_ended(false, "thermocouple out of range");
}

#[test]
fn panicking_model_ends_the_run() {
    faulty_run_is_ended(true, "thermocouple open circuit");
}

fn relay_simulation(clock: SystemAcceleratedClock) -> Simulation {
    let architecture = ArchitectureBuilder::new("relay", S)
        .atomic(
            AtomicDescriptor::new("relay", S, Relay::default)
                .imports("command")
                .exports("ack"),
        )
        .build()
        .unwrap();

    Simulation::builder(architecture).set_clock(clock).build()
}

#[test]
fn forecast_events_follow_the_accelerated_clock() {
    let architecture = ArchitectureBuilder::new("beacon", S)
        .atomic(
            AtomicDescriptor::new("beacon", S, || Beacon)
                .exports("beat")
                .with_acceleration_factor(60.0),
        )
        .build()
        .unwrap();
    let mut simu = Simulation::new(architecture);
    let clock = simu.clock().unwrap();
    assert_eq!(clock.acceleration_factor(), 60.0);

    let beats = Arc::new(Mutex::new(Vec::new()));
    let sink_beats = beats.clone();
    simu.connect_sink("beat", move |event: &Event| {
        sink_beats.lock().unwrap().push((event.time(), Instant::now()));
    })
    .unwrap();

    // The run starts 100ms from now (6s at 60x) and lasts 90s (1.5s).
    simu.construct_simulator().unwrap();
    let wall_start = Instant::now() + Duration::from_millis(100);
    let instant_of_start = clock.current_instant() + Duration::from_secs(6);
    simu.start_rt_simulation(instant_of_start, t(0.0), d(90.0))
        .unwrap();
    assert!(simu.is_rt_simulation_running());

    simu.join_rt_simulation().unwrap();
    assert!(!simu.is_rt_simulation_running());

    let beats = beats.lock().unwrap();
    assert_eq!(beats.len(), 1);
    let (time, wall_time) = beats[0];
    assert_eq!(time, t(60.0));
    let delay = wall_time.saturating_duration_since(wall_start);
    assert!(delay >= Duration::from_millis(950), "{delay:?}");
    assert!(delay <= Duration::from_millis(1300), "{delay:?}");

    simu.finalise_simulation().unwrap();
    assert!(simu.get_final_report().is_ok());
}

#[test]
fn injected_events_are_stamped_with_the_clock() {
    let clock = SystemAcceleratedClock::starting_in(Duration::ZERO, 60.0).unwrap();
    let mut simu = relay_simulation(clock);
    let acks = EventBuffer::new();
    simu.connect_sink("ack", acks.clone()).unwrap();

    simu.construct_simulator().unwrap();
    let instant_of_start = clock.current_instant() + Duration::from_secs(6);
    simu.start_rt_simulation(instant_of_start, t(0.0), d(3600.0))
        .unwrap();

    // About 300ms, i.e. 18s, after the start.
    thread::sleep(Duration::from_millis(400));
    simu.inject_event(Event::signal("command", t(0.0))).unwrap();
    let now = simu.rt_current_time().unwrap();
    assert!(now > t(0.0));

    // The acknowledgement is emitted by the next timer task.
    let deadline = Instant::now() + Duration::from_secs(1);
    while acks.is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    let acks: Vec<SimTime> = acks.map(|e| e.time()).collect();
    assert_eq!(acks.len(), 1);
    assert!(acks[0] >= t(12.0) && acks[0] <= now, "{:?}", acks[0]);

    // Reconfiguration is not allowed while the run is in progress.
    assert!(matches!(
        simu.construct_simulator(),
        Err(SimulationError::Protocol(ProtocolError::RunInProgress))
    ));
    assert!(matches!(
        simu.do_standalone_simulation(t(0.0), d(10.0)),
        Err(SimulationError::Protocol(ProtocolError::RunInProgress))
    ));

    simu.stop_simulation().unwrap();
    assert!(simu.wait_rt_simulation(Duration::from_secs(1)));
    simu.join_rt_simulation().unwrap();

    let state = simu.root_state().unwrap();
    assert!(!state.running);
    assert!(state.time_of_last_event >= acks[0]);
    simu.finalise_simulation().unwrap();
}

#[test]
fn stopping_an_idle_run_ends_it_at_the_clock_time() {
    let clock = SystemAcceleratedClock::starting_in(Duration::ZERO, 60.0).unwrap();
    let mut simu = relay_simulation(clock);
    simu.construct_simulator().unwrap();

    let instant_of_start = clock.current_instant() + Duration::from_secs(3);
    simu.start_rt_simulation(instant_of_start, t(0.0), d(3600.0))
        .unwrap();
    thread::sleep(Duration::from_millis(200));
    simu.stop_simulation().unwrap();
    simu.join_rt_simulation().unwrap();

    // Nothing to do once the run has ended.
    simu.stop_simulation().unwrap();
    assert!(matches!(
        simu.inject_event(Event::signal("unknown", t(0.0))),
        Err(SimulationError::Protocol(ProtocolError::UndeclaredInput { .. }))
    ));
    simu.finalise_simulation().unwrap();
}

#[test]
fn run_must_start_in_the_future() {
    let clock = SystemAcceleratedClock::starting_in(Duration::ZERO, 60.0).unwrap();
    let mut simu = relay_simulation(clock);
    simu.construct_simulator().unwrap();

    assert!(matches!(
        simu.start_rt_simulation(clock.current_instant(), t(0.0), d(60.0)),
        Err(SimulationError::Protocol(ProtocolError::StartNotInFuture))
    ));
    assert!(matches!(
        simu.stop_simulation(),
        Err(SimulationError::Protocol(ProtocolError::NoRunInProgress))
    ));
}

#[test]
fn run_requires_an_acceleration_factor() {
    let architecture = ArchitectureBuilder::new("beacon", S)
        .atomic(AtomicDescriptor::new("beacon", S, || Beacon).exports("beat"))
        .build()
        .unwrap();
    let mut simu = Simulation::new(architecture);
    assert!(simu.clock().is_none());
    simu.construct_simulator().unwrap();

    assert!(matches!(
        simu.start_rt_simulation(MonotonicTime::EPOCH, t(0.0), d(60.0)),
        Err(SimulationError::Configuration(
            ConfigurationError::MissingAccelerationFactor
        ))
    ));
}
