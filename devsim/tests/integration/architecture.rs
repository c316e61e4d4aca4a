//! Validation of model trees before any simulation step.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use devsim::architecture::{
    ArchitectureBuilder, AtomicDescriptor, ConfigurationError, CoupledDescriptor, Sink,
};
use devsim::event::Event;
use devsim::model::{AtomicModel, ModelError, ModelUri};
use devsim::simulation::{Simulation, SimulationError};
use devsim::time::{SimDuration, SimTime, TimeUnit};

const S: TimeUnit = TimeUnit::Seconds;

struct Idle;

impl AtomicModel for Idle {
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
}

/// A descriptor whose factory counts the instantiated models.
fn counted(uri: &str, unit: TimeUnit, instances: &Arc<AtomicUsize>) -> AtomicDescriptor {
    let instances = instances.clone();

    AtomicDescriptor::new(uri, unit, move || {
        instances.fetch_add(1, Ordering::Relaxed);
        Idle
    })
}

#[test]
fn route_to_a_sink_which_does_not_import_the_kind() {
    let instances = Arc::new(AtomicUsize::new(0));

    let result = ArchitectureBuilder::new("room", S)
        .atomic(counted("thermometer", S, &instances).exports("temperature"))
        .atomic(counted("heater", S, &instances).imports("switch"))
        .coupled(
            CoupledDescriptor::new("room")
                .submodel("thermometer")
                .submodel("heater")
                .route("thermometer", "temperature", Sink::new("heater", "temperature")),
        )
        .build();

    assert_eq!(
        result.unwrap_err(),
        ConfigurationError::NotImported {
            uri: ModelUri::new("heater"),
            kind: "temperature".into(),
        }
    );
    assert_eq!(instances.load(Ordering::Relaxed), 0);
}

#[test]
fn units_must_match_the_global_unit() {
    let instances = Arc::new(AtomicUsize::new(0));

    let result = ArchitectureBuilder::new("room", S)
        .atomic(counted("lamp", TimeUnit::Milliseconds, &instances))
        .coupled(CoupledDescriptor::new("room").submodel("lamp"))
        .build();

    assert_eq!(
        result.unwrap_err(),
        ConfigurationError::UnitMismatch {
            uri: ModelUri::new("lamp"),
            expected: S,
            found: TimeUnit::Milliseconds,
        }
    );
    assert_eq!(instances.load(Ordering::Relaxed), 0);
}

#[test]
fn models_are_instantiated_with_the_engine_tree() {
    let instances = Arc::new(AtomicUsize::new(0));

    let architecture = ArchitectureBuilder::new("room", S)
        .atomic(counted("lamp", S, &instances).imports("switch"))
        .atomic(counted("fridge", S, &instances).exports("door"))
        .coupled(
            CoupledDescriptor::new("room")
                .submodel("lamp")
                .submodel("fridge")
                .imports("switch", Sink::new("lamp", "switch"))
                .reexport("fridge", "door", "door"),
        )
        .build()
        .unwrap();
    assert_eq!(architecture.len(), 3);
    assert_eq!(architecture.parent("lamp").map(ModelUri::as_str), Some("room"));
    assert_eq!(instances.load(Ordering::Relaxed), 0);

    let mut simu = Simulation::new(architecture);
    assert!(matches!(
        simu.connect_sink("switch", |_: &Event| {}),
        Err(SimulationError::Configuration(
            ConfigurationError::NotExported { .. }
        ))
    ));
    simu.connect_sink("door", |_: &Event| {}).unwrap();

    simu.construct_simulator().unwrap();
    assert_eq!(instances.load(Ordering::Relaxed), 2);
}

#[test]
fn conflicting_acceleration_factors() {
    let result = ArchitectureBuilder::new("room", S)
        .atomic(AtomicDescriptor::new("lamp", S, || Idle).with_acceleration_factor(60.0))
        .atomic(AtomicDescriptor::new("fridge", S, || Idle).with_acceleration_factor(10.0))
        .coupled(CoupledDescriptor::new("room").submodel("lamp").submodel("fridge"))
        .build();

    assert!(matches!(
        result,
        Err(ConfigurationError::ConflictingAccelerationFactors { .. })
    ));
}
