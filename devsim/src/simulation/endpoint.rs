//! Remote invocation of simulation operations.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::error;

use crate::event::Event;
use crate::model::SimulationReport;
use crate::time::{MonotonicTime, SimDuration, SimTime};
use crate::util::panic_message;

use super::{Simulation, SimulationError};

/// A named channel through which the operations of a simulation are invoked.
///
/// Implementors never panic: failures, including a panic of a model during a
/// step, are returned as an [`EndpointError`].
pub trait SimulatorEndpoint: Send + Sync {
    /// See [`Simulation::construct_simulator()`].
    fn construct_simulator(&self) -> Result<(), EndpointError>;

    /// See [`Simulation::do_standalone_simulation()`].
    fn do_standalone_simulation(
        &self,
        start: SimTime,
        duration: SimDuration,
    ) -> Result<(), EndpointError>;

    /// See [`Simulation::start_rt_simulation()`].
    fn start_rt_simulation(
        &self,
        instant_of_start: MonotonicTime,
        start: SimTime,
        duration: SimDuration,
    ) -> Result<(), EndpointError>;

    /// See [`Simulation::inject_event()`].
    fn inject_event(&self, event: Event) -> Result<(), EndpointError>;

    /// See [`Simulation::stop_simulation()`].
    fn stop_simulation(&self) -> Result<(), EndpointError>;

    /// See [`Simulation::finalise_simulation()`].
    fn finalise_simulation(&self) -> Result<(), EndpointError>;

    /// See [`Simulation::get_final_report()`].
    fn get_final_report(&self) -> Result<SimulationReport, EndpointError>;

    /// See [`Simulation::initialise_simulation()`].
    fn initialise_simulation(
        &self,
        start: SimTime,
        duration: SimDuration,
    ) -> Result<(), EndpointError>;

    /// See [`Simulation::produce_output()`].
    fn produce_output(&self, current: SimTime) -> Result<(), EndpointError>;

    /// See [`Simulation::internal_event_step()`].
    fn internal_event_step(&self) -> Result<(), EndpointError>;

    /// See [`Simulation::external_event_step()`].
    fn external_event_step(&self, elapsed: SimDuration) -> Result<(), EndpointError>;

    /// See [`Simulation::end_simulation()`].
    fn end_simulation(&self, end: SimTime) -> Result<(), EndpointError>;
}

/// An in-process [`SimulatorEndpoint`] wrapping a [`Simulation`].
///
/// Operations are serialized by a lock. A real-time run keeps executing on
/// the host scheduler after `start_rt_simulation` has returned, so sinks
/// invoked during such a run may call back into the endpoint.
pub struct LocalEndpoint {
    simulation: Mutex<Simulation>,
}

impl LocalEndpoint {
    /// Creates an endpoint for the specified simulation.
    pub fn new(simulation: Simulation) -> Self {
        Self {
            simulation: Mutex::new(simulation),
        }
    }

    /// Returns a guard to the wrapped simulation.
    pub fn lock(&self) -> Result<MutexGuard<'_, Simulation>, EndpointError> {
        self.simulation.lock().map_err(|_| EndpointError::Poisoned)
    }

    fn call<R>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut Simulation) -> Result<R, SimulationError>,
    ) -> Result<R, EndpointError> {
        let mut simulation = self.lock()?;
        match panic::catch_unwind(AssertUnwindSafe(|| f(&mut simulation))) {
            Ok(result) => result.map_err(EndpointError::Simulation),
            Err(payload) => {
                let message = panic_message(&*payload);
                error!(operation, panic = %message, "simulation operation panicked");

                Err(EndpointError::Panicked(message))
            }
        }
    }
}

impl SimulatorEndpoint for LocalEndpoint {
    fn construct_simulator(&self) -> Result<(), EndpointError> {
        self.call("construct_simulator", |s| s.construct_simulator())
    }

    fn do_standalone_simulation(
        &self,
        start: SimTime,
        duration: SimDuration,
    ) -> Result<(), EndpointError> {
        self.call("do_standalone_simulation", |s| {
            s.do_standalone_simulation(start, duration)
        })
    }

    fn start_rt_simulation(
        &self,
        instant_of_start: MonotonicTime,
        start: SimTime,
        duration: SimDuration,
    ) -> Result<(), EndpointError> {
        self.call("start_rt_simulation", |s| {
            s.start_rt_simulation(instant_of_start, start, duration)
        })
    }

    fn inject_event(&self, event: Event) -> Result<(), EndpointError> {
        self.call("inject_event", |s| s.inject_event(event))
    }

    fn stop_simulation(&self) -> Result<(), EndpointError> {
        self.call("stop_simulation", |s| s.stop_simulation())
    }

    fn finalise_simulation(&self) -> Result<(), EndpointError> {
        self.call("finalise_simulation", |s| s.finalise_simulation())
    }

    fn get_final_report(&self) -> Result<SimulationReport, EndpointError> {
        self.call("get_final_report", |s| s.get_final_report())
    }

    fn initialise_simulation(
        &self,
        start: SimTime,
        duration: SimDuration,
    ) -> Result<(), EndpointError> {
        self.call("initialise_simulation", |s| {
            s.initialise_simulation(start, duration)
        })
    }

    fn produce_output(&self, current: SimTime) -> Result<(), EndpointError> {
        self.call("produce_output", |s| s.produce_output(current))
    }

    fn internal_event_step(&self) -> Result<(), EndpointError> {
        self.call("internal_event_step", |s| s.internal_event_step())
    }

    fn external_event_step(&self, elapsed: SimDuration) -> Result<(), EndpointError> {
        self.call("external_event_step", |s| s.external_event_step(elapsed))
    }

    fn end_simulation(&self, end: SimTime) -> Result<(), EndpointError> {
        self.call("end_simulation", |s| s.end_simulation(end))
    }
}

impl fmt::Debug for LocalEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalEndpoint").finish_non_exhaustive()
    }
}

/// A registry of named simulation endpoints.
#[derive(Default)]
pub struct EndpointRegistry {
    endpoints: HashMap<String, Arc<dyn SimulatorEndpoint>>,
}

impl EndpointRegistry {
    /// Creates an empty `EndpointRegistry`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an endpoint to the registry.
    ///
    /// If the specified name is already in use, the endpoint provided as
    /// argument is returned in the error.
    pub fn add(
        &mut self,
        endpoint: Arc<dyn SimulatorEndpoint>,
        name: impl Into<String>,
    ) -> Result<(), Arc<dyn SimulatorEndpoint>> {
        match self.endpoints.entry(name.into()) {
            Entry::Vacant(s) => {
                s.insert(endpoint);

                Ok(())
            }
            Entry::Occupied(_) => Err(endpoint),
        }
    }

    /// Returns the endpoint registered under the specified name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn SimulatorEndpoint>, EndpointError> {
        self.endpoints
            .get(name)
            .cloned()
            .ok_or_else(|| EndpointError::UnknownEndpoint(name.to_string()))
    }

    /// Removes the endpoint registered under the specified name.
    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn SimulatorEndpoint>> {
        self.endpoints.remove(name)
    }

    /// Returns the registered names in lexicographic order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.endpoints.keys().map(String::as_str).collect();
        names.sort_unstable();

        names
    }
}

impl fmt::Debug for EndpointRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "EndpointRegistry ({} endpoints)", self.endpoints.len())
    }
}

/// Error returned by a [`SimulatorEndpoint`].
#[derive(Debug)]
pub enum EndpointError {
    /// The operation failed.
    Simulation(SimulationError),
    /// A model panicked during the operation.
    Panicked(String),
    /// No endpoint is registered under this name.
    UnknownEndpoint(String),
    /// A previous operation panicked while holding the simulation.
    Poisoned,
}

impl fmt::Display for EndpointError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simulation(e) => e.fmt(fmt),
            Self::Panicked(message) => write!(fmt, "the simulation panicked: {message}"),
            Self::UnknownEndpoint(name) => write!(fmt, "no endpoint is registered as '{name}'"),
            Self::Poisoned => fmt.write_str("the simulation is poisoned by an earlier panic"),
        }
    }
}

impl Error for EndpointError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Simulation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SimulationError> for EndpointError {
    fn from(e: SimulationError) -> Self {
        Self::Simulation(e)
    }
}
