//! Standalone runs of model trees.

use std::fmt;
use std::sync::{Arc, Mutex};

use devsim::architecture::{
    ArchitectureBuilder, AtomicDescriptor, ConfigurationError, CoupledDescriptor, Sink,
};
use devsim::event::{Event, EventPriority};
use devsim::model::{
    AtomicModel, ExportedVariable, FixpointProgress, ModelError, ModelUri, ReportPayload,
    VariableKey, Variables,
};
use devsim::simulation::{EventBuffer, ProtocolError, Simulation, SimulationError};
use devsim::time::{SimDuration, SimTime, TimeUnit};

const S: TimeUnit = TimeUnit::Seconds;

fn t(value: f64) -> SimTime {
    SimTime::new(value, S)
}

fn d(value: f64) -> SimDuration {
    SimDuration::new(value, S)
}

// Emits a single command after 5s.
#[derive(Default)]
struct OneShot {
    fired: bool,
}

impl AtomicModel for OneShot {
    fn time_advance(&self) -> SimDuration {
        if self.fired {
            SimDuration::infinity(S)
        } else {
            d(5.0)
        }
    }
    fn output(&mut self, current: SimTime) -> Result<Vec<Event>, ModelError> {
        Ok(vec![Event::signal("command", current)])
    }
    fn internal_transition(&mut self, _: SimTime) -> Result<(), ModelError> {
        self.fired = true;
        Ok(())
    }
    fn external_transition(&mut self, _: SimTime, _: SimDuration, _: Vec<Event>) -> Result<(), ModelError> {
        Ok(())
    }
}

#[derive(Debug, PartialEq)]
struct SwitchReport {
    internal_transitions: usize,
    changed: bool,
}

impl fmt::Display for SwitchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} internal transitions", self.internal_transitions)
    }
}

// Reports immediately after each received command.
#[derive(Default)]
struct Switch {
    changed: bool,
    internal_transitions: usize,
}

impl AtomicModel for Switch {
    fn time_advance(&self) -> SimDuration {
        if self.changed {
            SimDuration::zero(S)
        } else {
            SimDuration::infinity(S)
        }
    }
    fn output(&mut self, current: SimTime) -> Result<Vec<Event>, ModelError> {
        Ok(vec![Event::signal("changed", current)])
    }
    fn internal_transition(&mut self, _: SimTime) -> Result<(), ModelError> {
        self.changed = false;
        self.internal_transitions += 1;
        Ok(())
    }
    fn external_transition(&mut self, _: SimTime, _: SimDuration, _: Vec<Event>) -> Result<(), ModelError> {
        self.changed = true;
        Ok(())
    }
    fn final_report(&self) -> Option<Box<dyn ReportPayload>> {
        Some(Box::new(SwitchReport {
            internal_transitions: self.internal_transitions,
            changed: self.changed,
        }))
    }
}

fn switch_bench() -> Simulation {
    let architecture = ArchitectureBuilder::new("bench", S)
        .atomic(AtomicDescriptor::new("source", S, OneShot::default).exports("command"))
        .atomic(
            AtomicDescriptor::new("switch", S, Switch::default)
                .imports("command")
                .exports("changed"),
        )
        .coupled(
            CoupledDescriptor::new("bench")
                .submodel("source")
                .submodel("switch")
                .route("source", "command", Sink::new("switch", "command"))
                .reexport("switch", "changed", "changed"),
        )
        .build()
        .unwrap();

    Simulation::new(architecture)
}

#[test]
fn zero_time_advance_fires_once() {
    let mut simu = switch_bench();
    let changed = EventBuffer::new();
    simu.connect_sink("changed", changed.clone()).unwrap();

    simu.construct_simulator().unwrap();
    simu.do_standalone_simulation(t(0.0), d(60.0)).unwrap();

    let times: Vec<SimTime> = changed.map(|e| e.time()).collect();
    assert_eq!(times, [t(5.0)]);

    simu.finalise_simulation().unwrap();
    let report = simu.get_final_report().unwrap();
    assert_eq!(
        report.find("switch").unwrap().payload_as::<SwitchReport>(),
        Some(&SwitchReport {
            internal_transitions: 1,
            changed: false
        })
    );
    assert!(report.find("source").unwrap().payload().is_none());
}

#[test]
fn final_report_is_taken_once() {
    let mut simu = switch_bench();
    simu.construct_simulator().unwrap();

    assert!(matches!(
        simu.finalise_simulation(),
        Err(SimulationError::Protocol(ProtocolError::NotInitialised))
    ));
    assert!(matches!(
        simu.get_final_report(),
        Err(SimulationError::Protocol(ProtocolError::ReportUnavailable))
    ));

    simu.do_standalone_simulation(t(0.0), d(10.0)).unwrap();
    simu.finalise_simulation().unwrap();
    assert_eq!(simu.get_final_report().unwrap().uri().as_str(), "bench");
    assert!(matches!(
        simu.get_final_report(),
        Err(SimulationError::Protocol(ProtocolError::ReportUnavailable))
    ));

    // A fresh engine tree is needed for another run.
    assert!(matches!(
        simu.do_standalone_simulation(t(0.0), d(10.0)),
        Err(SimulationError::Protocol(ProtocolError::AlreadyInitialised))
    ));
    simu.construct_simulator().unwrap();
    simu.do_standalone_simulation(t(0.0), d(10.0)).unwrap();
}

// Emits readings 1.0, 2.0, 3.0... every 10s.
#[derive(Default)]
struct Sensor {
    reading: f64,
}

impl AtomicModel for Sensor {
    fn time_advance(&self) -> SimDuration {
        d(10.0)
    }
    fn output(&mut self, current: SimTime) -> Result<Vec<Event>, ModelError> {
        Ok(vec![Event::new("reading", current, self.reading + 1.0)])
    }
    fn internal_transition(&mut self, _: SimTime) -> Result<(), ModelError> {
        self.reading += 1.0;
        Ok(())
    }
    fn external_transition(&mut self, _: SimTime, _: SimDuration, _: Vec<Event>) -> Result<(), ModelError> {
        Ok(())
    }
}

// Shows each received value right away.
struct Panel {
    shown: Vec<f64>,
    priorities: Arc<Mutex<Vec<EventPriority>>>,
}

impl AtomicModel for Panel {
    fn time_advance(&self) -> SimDuration {
        if self.shown.is_empty() {
            SimDuration::infinity(S)
        } else {
            SimDuration::zero(S)
        }
    }
    fn output(&mut self, current: SimTime) -> Result<Vec<Event>, ModelError> {
        Ok(self
            .shown
            .iter()
            .map(|value| Event::new("shown", current, *value))
            .collect())
    }
    fn internal_transition(&mut self, _: SimTime) -> Result<(), ModelError> {
        self.shown.clear();
        Ok(())
    }
    fn external_transition(
        &mut self,
        _: SimTime,
        _: SimDuration,
        events: Vec<Event>,
    ) -> Result<(), ModelError> {
        for event in events {
            self.priorities.lock().unwrap().push(event.priority());
            event
                .execute_on(self, |panel, value: &f64| panel.shown.push(*value))
                .map_err(|e| ModelError::with_source("invalid value", e))?;
        }
        Ok(())
    }
}

#[test]
fn routes_cross_coupled_boundaries() {
    let priorities = Arc::new(Mutex::new(Vec::new()));
    let display_priorities = priorities.clone();

    let architecture = ArchitectureBuilder::new("plant", S)
        .atomic(AtomicDescriptor::new("sensor", S, Sensor::default).exports("reading"))
        .atomic(
            AtomicDescriptor::new("display", S, move || Panel {
                shown: Vec::new(),
                priorities: display_priorities.clone(),
            })
            .imports("show")
            .exports("shown"),
        )
        .coupled(
            CoupledDescriptor::new("cell")
                .submodel("display")
                .imports("value", Sink::new("display", "show"))
                .reexport_with("display", "shown", "label", |event| {
                    let value = *event.payload::<f64>().unwrap();
                    event.with_payload(format!("{value:.1}"))
                }),
        )
        .coupled(
            CoupledDescriptor::new("plant")
                .submodel("sensor")
                .submodel("cell")
                .route("sensor", "reading", Sink::new("cell", "value"))
                .reexport("cell", "label", "label"),
        )
        .build()
        .unwrap();

    let mut simu = Simulation::new(architecture);
    let labels = EventBuffer::new();
    simu.connect_sink("label", labels.clone()).unwrap();
    simu.construct_simulator().unwrap();
    simu.do_standalone_simulation(t(0.0), d(35.0)).unwrap();

    let labels: Vec<(SimTime, String)> = labels
        .map(|e| (e.time(), e.payload::<String>().unwrap().clone()))
        .collect();
    assert_eq!(
        labels,
        [
            (t(10.0), "1.0".to_string()),
            (t(20.0), "2.0".to_string()),
            (t(30.0), "3.0".to_string()),
        ]
    );
    assert_eq!(*priorities.lock().unwrap(), [EventPriority::External; 3]);
}

#[test]
fn identical_runs_are_identical() {
    fn run() -> Vec<(SimTime, u32)> {
        let architecture = ArchitectureBuilder::new("shop", S)
            .atomic(AtomicDescriptor::new("a", S, Sensor::default).exports("reading"))
            .atomic(AtomicDescriptor::new("b", S, Sensor::default).exports("reading"))
            .atomic(
                AtomicDescriptor::new("counter", S, Tally::default)
                    .imports("reading")
                    .exports("count"),
            )
            .coupled(
                CoupledDescriptor::new("shop")
                    .submodel("a")
                    .submodel("b")
                    .submodel("counter")
                    .route("a", "reading", Sink::new("counter", "reading"))
                    .route("b", "reading", Sink::new("counter", "reading"))
                    .reexport("counter", "count", "count"),
            )
            .build()
            .unwrap();

        let mut simu = Simulation::new(architecture);
        let counts = EventBuffer::new();
        simu.connect_sink("count", counts.clone()).unwrap();
        simu.construct_simulator().unwrap();
        simu.do_standalone_simulation(t(0.0), d(45.0)).unwrap();

        counts.map(|e| (e.time(), *e.payload::<u32>().unwrap())).collect()
    }

    let first = run();
    assert_eq!(first, [(t(10.0), 2), (t(20.0), 4), (t(30.0), 6), (t(40.0), 8)]);
    assert_eq!(run(), first);
}

// Counts the received events and announces the total.
#[derive(Default)]
struct Tally {
    count: u32,
    announce: bool,
}

impl AtomicModel for Tally {
    fn time_advance(&self) -> SimDuration {
        if self.announce {
            SimDuration::zero(S)
        } else {
            SimDuration::infinity(S)
        }
    }
    fn output(&mut self, current: SimTime) -> Result<Vec<Event>, ModelError> {
        Ok(vec![Event::new("count", current, self.count)])
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
        self.count += events.len() as u32;
        self.announce = true;
        Ok(())
    }
}

// Ticks every 10s and records its transitions in a shared trace.
struct Recorder {
    trace: Arc<Mutex<Vec<String>>>,
}

impl AtomicModel for Recorder {
    fn time_advance(&self) -> SimDuration {
        d(10.0)
    }
    fn output(&mut self, _: SimTime) -> Result<Vec<Event>, ModelError> {
        Ok(Vec::new())
    }
    fn internal_transition(&mut self, current: SimTime) -> Result<(), ModelError> {
        self.trace.lock().unwrap().push(format!("internal@{}", current.value()));
        Ok(())
    }
    fn external_transition(
        &mut self,
        current: SimTime,
        elapsed: SimDuration,
        _: Vec<Event>,
    ) -> Result<(), ModelError> {
        self.trace
            .lock()
            .unwrap()
            .push(format!("external@{}+{}", current.value(), elapsed.value()));
        Ok(())
    }
}

#[test]
fn internal_transition_precedes_simultaneous_input() {
    let trace = Arc::new(Mutex::new(Vec::new()));
    let recorder_trace = trace.clone();
    let architecture = ArchitectureBuilder::new("recorder", S)
        .atomic(
            AtomicDescriptor::new("recorder", S, move || Recorder {
                trace: recorder_trace.clone(),
            })
            .imports("poke"),
        )
        .build()
        .unwrap();

    let mut simu = Simulation::new(architecture);
    simu.construct_simulator().unwrap();
    simu.schedule_input(Event::signal("poke", t(10.0))).unwrap();
    simu.schedule_input(Event::signal("poke", t(15.0))).unwrap();
    simu.do_standalone_simulation(t(0.0), d(30.0)).unwrap();

    // The input at 15s resets the forecast to 25s.
    assert_eq!(
        *trace.lock().unwrap(),
        ["internal@10", "external@10+0", "external@15+5", "internal@25"]
    );
}

#[test]
fn scheduled_inputs_are_validated() {
    let mut simu = switch_bench();
    simu.construct_simulator().unwrap();

    assert!(matches!(
        simu.schedule_input(Event::signal("unknown", t(1.0))),
        Err(SimulationError::Protocol(ProtocolError::UndeclaredInput { .. }))
    ));

    let architecture = ArchitectureBuilder::new("switch", S)
        .atomic(
            AtomicDescriptor::new("switch", S, Switch::default)
                .imports("command")
                .exports("changed"),
        )
        .build()
        .unwrap();
    let mut simu = Simulation::new(architecture);
    simu.construct_simulator().unwrap();
    simu.schedule_input(Event::signal("command", t(2.0))).unwrap();
    assert!(matches!(
        simu.do_standalone_simulation(t(5.0), d(10.0)),
        Err(SimulationError::Protocol(ProtocolError::InputOutOfRange { .. }))
    ));
}

#[test]
fn manual_stepping() {
    let architecture = ArchitectureBuilder::new("switch", S)
        .atomic(
            AtomicDescriptor::new("switch", S, Switch::default)
                .imports("command")
                .exports("changed"),
        )
        .build()
        .unwrap();
    let mut simu = Simulation::new(architecture);
    let changed = EventBuffer::new();
    simu.connect_sink("changed", changed.clone()).unwrap();

    assert!(matches!(
        simu.produce_output(t(0.0)),
        Err(SimulationError::Protocol(ProtocolError::NotConstructed))
    ));
    simu.construct_simulator().unwrap();
    simu.initialise_simulation(t(0.0), d(100.0)).unwrap();
    assert!(simu.root_state().unwrap().time_of_next_event.is_infinite());

    simu.inject_event(Event::signal("command", t(3.0))).unwrap();
    simu.external_event_step(d(3.0)).unwrap();
    let state = simu.root_state().unwrap();
    assert_eq!(state.time_of_last_event, t(3.0));
    assert_eq!(state.time_of_next_event, t(3.0));

    // The internal step requires the output of the same time first.
    assert!(matches!(
        simu.internal_event_step(),
        Err(SimulationError::Protocol(ProtocolError::OutputNotProduced { .. }))
    ));
    simu.produce_output(t(3.0)).unwrap();
    simu.internal_event_step().unwrap();
    assert_eq!(changed.len(), 1);
    assert!(simu.root_state().unwrap().time_of_next_event.is_infinite());

    simu.end_simulation(t(100.0)).unwrap();
    assert!(!simu.root_state().unwrap().running);
    assert!(simu.show_current_state().unwrap().contains("switch"));
}

#[test]
fn debug_level_is_reported_at_the_root() {
    let architecture = ArchitectureBuilder::new("source", S)
        .atomic(AtomicDescriptor::new("source", S, OneShot::default).exports("command"))
        .build()
        .unwrap();
    let mut simu = Simulation::new(architecture);
    simu.construct_simulator().unwrap();
    assert_eq!(simu.root_state().unwrap().debug_level, 0);

    simu.set_debug_level(7).unwrap();
    assert_eq!(simu.root_state().unwrap().debug_level, 7);
    simu.set_debug_level(u32::MAX).unwrap();
    assert_eq!(simu.root_state().unwrap().debug_level, u32::MAX);

    simu.toggle_debug_mode().unwrap();
    assert_eq!(simu.root_state().unwrap().debug_level, 0);
    simu.toggle_debug_mode().unwrap();
    assert_eq!(simu.root_state().unwrap().debug_level, 1);
}

// Exports variables computed from variables of other models.
struct Room {
    variables: Vec<ExportedVariable>,
    make: fn() -> Vec<ExportedVariable>,
}

impl Room {
    fn new(make: fn() -> Vec<ExportedVariable>) -> Self {
        Self {
            variables: make(),
            make,
        }
    }
}

impl AtomicModel for Room {
    fn initialise_state(&mut self, _: SimTime) {
        self.variables = (self.make)();
    }
    fn time_advance(&self) -> SimDuration {
        SimDuration::infinity(S)
    }
    fn output(&mut self, _: SimTime) -> Result<Vec<Event>, ModelError> {
        Ok(Vec::new())
    }
    fn internal_transition(&mut self, _: SimTime) -> Result<(), ModelError> {
        Ok(())
    }
    fn external_transition(&mut self, _: SimTime, _: SimDuration, _: Vec<Event>) -> Result<(), ModelError> {
        Ok(())
    }
    fn final_report(&self) -> Option<Box<dyn ReportPayload>> {
        let values: Vec<String> = self
            .variables
            .iter()
            .map(|v| format!("{}={:?}", v.name(), v.value()))
            .collect();
        Some(Box::new(values.join(",")))
    }
    fn use_fixpoint_initialise_variables(&self) -> bool {
        true
    }
    fn fixpoint_initialise_variables(
        &mut self,
        uri: &ModelUri,
        variables: &mut Variables,
    ) -> FixpointProgress {
        ExportedVariable::initialise_all(&mut self.variables, uri, variables)
    }
}

fn rooms(kitchen: fn() -> Vec<ExportedVariable>, hall: fn() -> Vec<ExportedVariable>) -> Simulation {
    let architecture = ArchitectureBuilder::new("house", S)
        .atomic(AtomicDescriptor::new("kitchen", S, move || Room::new(kitchen)))
        .atomic(AtomicDescriptor::new("hall", S, move || Room::new(hall)))
        .coupled(CoupledDescriptor::new("house").submodel("kitchen").submodel("hall"))
        .build()
        .unwrap();

    Simulation::new(architecture)
}

#[test]
fn variables_resolve_across_models() {
    // kitchen.setpoint <- hall.target <- kitchen.base
    let mut simu = rooms(
        || {
            vec![
                ExportedVariable::new(
                    "setpoint",
                    vec![VariableKey::new("hall", "target")],
                    |deps| deps[0] - 1.0,
                ),
                ExportedVariable::constant("base", 20.0),
            ]
        },
        || {
            vec![ExportedVariable::new(
                "target",
                vec![VariableKey::new("kitchen", "base")],
                |deps| deps[0] * 0.5,
            )]
        },
    );
    simu.construct_simulator().unwrap();
    simu.do_standalone_simulation(t(0.0), d(10.0)).unwrap();
    simu.finalise_simulation().unwrap();

    let report = simu.get_final_report().unwrap();
    assert_eq!(
        report.find("kitchen").unwrap().payload_as::<String>().unwrap(),
        "setpoint=Some(9.0),base=Some(20.0)"
    );
    assert_eq!(
        report.find("hall").unwrap().payload_as::<String>().unwrap(),
        "target=Some(10.0)"
    );
}

#[test]
fn cyclic_variables_are_rejected() {
    let mut simu = rooms(
        || {
            vec![ExportedVariable::new(
                "x",
                vec![VariableKey::new("hall", "y")],
                |deps| deps[0],
            )]
        },
        || {
            vec![ExportedVariable::new(
                "y",
                vec![VariableKey::new("kitchen", "x")],
                |deps| deps[0],
            )]
        },
    );
    simu.construct_simulator().unwrap();

    assert!(matches!(
        simu.do_standalone_simulation(t(0.0), d(10.0)),
        Err(SimulationError::Configuration(
            ConfigurationError::CyclicVariableDependency { pending: 2 }
        ))
    ));
}

// Fires once, after a delay given by an exported variable.
struct Gated {
    delay: Vec<ExportedVariable>,
    fired: bool,
}

impl Gated {
    fn new() -> Self {
        Self {
            delay: vec![ExportedVariable::new(
                "delay",
                vec![VariableKey::new("hall", "pace")],
                |deps| deps[0] * 2.0,
            )],
            fired: false,
        }
    }
}

impl AtomicModel for Gated {
    fn time_advance(&self) -> SimDuration {
        match self.delay[0].value() {
            Some(delay) if !self.fired => d(delay),
            _ => SimDuration::infinity(S),
        }
    }
    fn output(&mut self, current: SimTime) -> Result<Vec<Event>, ModelError> {
        Ok(vec![Event::signal("done", current)])
    }
    fn internal_transition(&mut self, _: SimTime) -> Result<(), ModelError> {
        self.fired = true;
        Ok(())
    }
    fn external_transition(&mut self, _: SimTime, _: SimDuration, _: Vec<Event>) -> Result<(), ModelError> {
        Ok(())
    }
    fn use_fixpoint_initialise_variables(&self) -> bool {
        true
    }
    fn fixpoint_initialise_variables(
        &mut self,
        uri: &ModelUri,
        variables: &mut Variables,
    ) -> FixpointProgress {
        ExportedVariable::initialise_all(&mut self.delay, uri, variables)
    }
}

#[test]
fn forecasts_follow_initialised_variables() {
    let architecture = ArchitectureBuilder::new("bench", S)
        .atomic(AtomicDescriptor::new("gated", S, Gated::new).exports("done"))
        .atomic(AtomicDescriptor::new("hall", S, || {
            Room::new(|| vec![ExportedVariable::constant("pace", 2.5)])
        }))
        .coupled(
            CoupledDescriptor::new("bench")
                .submodel("gated")
                .submodel("hall")
                .reexport("gated", "done", "done"),
        )
        .build()
        .unwrap();
    let mut simu = Simulation::new(architecture);
    let done = EventBuffer::new();
    simu.connect_sink("done", done.clone()).unwrap();
    simu.construct_simulator().unwrap();

    simu.initialise_simulation(t(0.0), d(10.0)).unwrap();
    let state = simu.root_state().unwrap();
    assert_eq!(state.time_of_next_event, t(5.0));
    assert_eq!(state.next_time_advance, d(5.0));
    let variables = simu.variables().unwrap();
    assert_eq!(variables.get(&VariableKey::new("gated", "delay")), Some(5.0));
    assert_eq!(variables.get(&VariableKey::new("hall", "pace")), Some(2.5));

    // The same holds for a full run on a fresh tree.
    simu.construct_simulator().unwrap();
    simu.do_standalone_simulation(t(0.0), d(10.0)).unwrap();
    let done: Vec<SimTime> = done.map(|e| e.time()).collect();
    assert_eq!(done, vec![t(5.0)]);
}
