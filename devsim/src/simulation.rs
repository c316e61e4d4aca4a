//! Discrete-event simulation management.
//!
//! This module contains the engines which drive the DEVS step protocol, the
//! [`Simulator`] of atomic models and the [`Coordinator`] of coupled models,
//! as well as the [`Simulation`] environment which instantiates the engine
//! tree of an [`Architecture`] and runs it either as fast as possible or
//! paced against an accelerated clock.
//!
//! # Simulation lifecycle
//!
//! The lifecycle of a simulation typically comprises the following stages:
//!
//! 1. description and validation of the model tree with an
//!    [`ArchitectureBuilder`](crate::architecture::ArchitectureBuilder),
//! 2. instantiation of a [`Simulation`] with [`Simulation::new()`] or
//!    [`Simulation::builder()`] and connection of [`EventSink`]s to the
//!    kinds exported by the root model,
//! 3. construction of the engine tree with
//!    [`Simulation::construct_simulator()`],
//! 4. one or several runs, each made of:
//!    - a standalone run with [`Simulation::do_standalone_simulation()`], or
//!      a real-time run started with [`Simulation::start_rt_simulation()`],
//!      fed with [`Simulation::inject_event()`] and ended by the clock or
//!      by [`Simulation::stop_simulation()`],
//!    - collection of the [`SimulationReport`] with
//!      [`Simulation::finalise_simulation()`] and
//!      [`Simulation::get_final_report()`],
//!    - reconstruction of the engine tree.
//!
//! # Step protocol
//!
//! Each engine follows the DEVS step order: output production at the
//! forecast time of the next internal event, then internal transition, and
//! an external transition whenever buffered input is pending. After every
//! step, the time of next event equals the time of last event plus the next
//! time advance. A forecast cancelled by an external transition is never
//! executed.
//!
//! Events emitted by a model are delivered directly to the atomic models
//! that import them, along routes resolved when the architecture is built.
//! Events reaching the boundary of the root model are forwarded to the
//! connected sinks once the engine tree has been released.
//!
//! # Examples
//!
//! A generator feeding a counter, run standalone for 10s.
//!
//! ```
//! use devsim::architecture::{ArchitectureBuilder, AtomicDescriptor, CoupledDescriptor, Sink};
//! use devsim::event::Event;
//! use devsim::model::{AtomicModel, ModelError};
//! use devsim::simulation::{EventBuffer, Simulation};
//! use devsim::time::{SimDuration, SimTime, TimeUnit};
//!
//! const S: TimeUnit = TimeUnit::Seconds;
//!
//! struct Generator;
//!
//! impl AtomicModel for Generator {
//!     fn time_advance(&self) -> SimDuration {
//!         SimDuration::new(3.0, S)
//!     }
//!     fn output(&mut self, current: SimTime) -> Result<Vec<Event>, ModelError> {
//!         Ok(vec![Event::signal("job", current)])
//!     }
//!     fn internal_transition(&mut self, _: SimTime) -> Result<(), ModelError> {
//!         Ok(())
//!     }
//!     fn external_transition(
//!         &mut self,
//!         _: SimTime,
//!         _: SimDuration,
//!         _: Vec<Event>,
//!     ) -> Result<(), ModelError> {
//!         Ok(())
//!     }
//! }
//!
//! #[derive(Default)]
//! struct Counter {
//!     count: u32,
//!     announce: bool,
//! }
//!
//! impl AtomicModel for Counter {
//!     fn time_advance(&self) -> SimDuration {
//!         if self.announce {
//!             SimDuration::zero(S)
//!         } else {
//!             SimDuration::infinity(S)
//!         }
//!     }
//!     fn output(&mut self, current: SimTime) -> Result<Vec<Event>, ModelError> {
//!         Ok(vec![Event::new("count", current, self.count)])
//!     }
//!     fn internal_transition(&mut self, _: SimTime) -> Result<(), ModelError> {
//!         self.announce = false;
//!         Ok(())
//!     }
//!     fn external_transition(
//!         &mut self,
//!         _: SimTime,
//!         _: SimDuration,
//!         events: Vec<Event>,
//!     ) -> Result<(), ModelError> {
//!         self.count += events.len() as u32;
//!         self.announce = true;
//!         Ok(())
//!     }
//! }
//!
//! let architecture = ArchitectureBuilder::new("shop", S)
//!     .atomic(AtomicDescriptor::new("generator", S, || Generator).exports("job"))
//!     .atomic(
//!         AtomicDescriptor::new("counter", S, Counter::default)
//!             .imports("job")
//!             .exports("count"),
//!     )
//!     .coupled(
//!         CoupledDescriptor::new("shop")
//!             .submodel("generator")
//!             .submodel("counter")
//!             .route("generator", "job", Sink::new("counter", "job"))
//!             .reexport("counter", "count", "count"),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let mut simulation = Simulation::new(architecture);
//! let counts = EventBuffer::new();
//! simulation.connect_sink("count", counts.clone()).unwrap();
//! simulation.construct_simulator().unwrap();
//! simulation
//!     .do_standalone_simulation(SimTime::zero(S), SimDuration::new(10.0, S))
//!     .unwrap();
//!
//! let counts: Vec<u32> = counts.map(|e| *e.payload::<u32>().unwrap()).collect();
//! assert_eq!(counts, [1, 2, 3]);
//! ```
mod activity;
mod assembly;
mod coordinator;
mod endpoint;
mod real_time;
mod simulator;
mod sink;

pub use coordinator::Coordinator;
pub use endpoint::{EndpointError, EndpointRegistry, LocalEndpoint, SimulatorEndpoint};
pub use simulator::Simulator;
pub use sink::{EventBuffer, EventSink};

use std::error::Error;
use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::architecture::{Architecture, ConfigurationError};
use crate::event::{Event, EventKind};
use crate::model::{FixpointProgress, ModelError, ModelUri, SimulationReport, Variables};
use crate::time::{
    AcceleratedClock, HostScheduler, MonotonicTime, SimDuration, SimTime, SystemAcceleratedClock,
    TimeError, TimeUnit,
};
use crate::util::lock;

use assembly::EngineTree;
use real_time::RealTimeSimulator;
use sink::SinkSet;

/// The protocol state of an engine.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SimulatorState {
    /// Time of the last transition.
    pub time_of_last_event: SimTime,
    /// Forecast time of the next internal transition.
    pub time_of_next_event: SimTime,
    /// Duration from the last transition to the forecast.
    pub next_time_advance: SimDuration,
    /// Whether the engine has been initialised.
    pub initialised: bool,
    /// Whether the engine is between initialisation and the end of the run.
    pub running: bool,
    /// Verbosity of the debug traces, 0 meaning disabled.
    pub debug_level: u32,
}

impl SimulatorState {
    pub(crate) fn new(unit: TimeUnit) -> Self {
        Self {
            time_of_last_event: SimTime::zero(unit),
            time_of_next_event: SimTime::infinity(unit),
            next_time_advance: SimDuration::infinity(unit),
            initialised: false,
            running: false,
            debug_level: 0,
        }
    }
}

/// The DEVS step protocol shared by simulators and coordinators.
///
/// All times are expressed in the time unit of the engine; a time of another
/// unit is rejected with a [`TimeError::UnitMismatch`] error.
pub trait DevsEngine: Send {
    /// Returns the URI of the model driven by this engine.
    fn uri(&self) -> &ModelUri;

    /// Returns the time unit of the engine.
    fn time_unit(&self) -> TimeUnit;

    /// Initialises the engine for a run starting at `start` and lasting
    /// `duration`.
    ///
    /// The duration must be strictly positive and may be infinite.
    fn initialise_simulation(
        &mut self,
        start: SimTime,
        duration: SimDuration,
    ) -> Result<(), SimulationError>;

    /// Initialises the engine for a run starting at time zero.
    fn initialise_simulation_for(&mut self, duration: SimDuration) -> Result<(), SimulationError> {
        self.initialise_simulation(SimTime::zero(duration.unit()), duration)
    }

    /// Returns `true` once the engine has been initialised.
    fn is_simulation_initialised(&self) -> bool;

    /// Returns `true` between initialisation and the end of the run.
    fn is_running(&self) -> bool;

    /// Returns the time of the last transition.
    fn time_of_last_event(&self) -> SimTime;

    /// Returns the forecast time of the next internal transition.
    fn time_of_next_event(&self) -> SimTime;

    /// Returns the duration from the last transition to the forecast.
    fn next_time_advance(&self) -> SimDuration;

    /// Returns the earliest time stamp of the input buffered in the subtree,
    /// if any.
    fn time_of_pending_input(&self) -> Option<SimTime>;

    /// Produces the output of the imminent models at the forecast time.
    fn produce_output(&mut self, current: SimTime) -> Result<(), SimulationError>;

    /// Performs the internal transition following [`produce_output()`].
    ///
    /// [`produce_output()`]: DevsEngine::produce_output
    fn internal_event_step(&mut self) -> Result<(), SimulationError>;

    /// Performs an external transition on the buffered input, `elapsed`
    /// after the last transition.
    fn external_event_step(&mut self, elapsed: SimDuration) -> Result<(), SimulationError>;

    /// Recomputes the forecast of the subtree from the time of the last
    /// event.
    ///
    /// This is needed when the time advance of a model depends on state
    /// that changed without a transition, such as the exported variables
    /// resolved after initialisation. It must not be called between
    /// [`produce_output()`] and [`internal_event_step()`].
    ///
    /// [`produce_output()`]: DevsEngine::produce_output
    /// [`internal_event_step()`]: DevsEngine::internal_event_step
    fn refresh_forecast(&mut self) -> Result<(), SimulationError>;

    /// Ends the run.
    fn end_simulation(&mut self, end: SimTime) -> Result<(), SimulationError>;

    /// Returns the engine to its constructed state, discarding the models'
    /// state and any buffered input.
    fn reinitialise(&mut self);

    /// Returns the report of the subtree.
    fn final_report(&self) -> SimulationReport;

    /// Returns `true` if a model of the subtree exports variables.
    fn use_fixpoint_initialise_variables(&self) -> bool;

    /// Performs one variable initialisation pass over the subtree.
    fn fixpoint_initialise_variables(&mut self, variables: &mut Variables) -> FixpointProgress;

    /// Toggles the debug traces between disabled and level 1.
    fn toggle_debug_mode(&mut self);

    /// Sets the verbosity of the debug traces.
    fn set_debug_level(&mut self, level: u32);

    /// Returns the verbosity of the debug traces, 0 meaning disabled.
    fn debug_level(&self) -> u32;

    /// Returns `true` if the debug traces are enabled at `level` or above.
    fn has_debug_level(&self, level: u32) -> bool {
        let debug_level = self.debug_level();

        debug_level > 0 && debug_level >= level
    }

    /// Returns a human-readable rendering of the protocol state of the
    /// subtree.
    fn show_current_state(&self, indent: &str, elapsed: SimDuration) -> String;

    /// Returns a human-readable rendering of the models' state.
    fn show_current_state_content(&self, indent: &str) -> String;
}

/// Checks that a time quantity is expressed in the expected unit.
pub(crate) fn check_unit(expected: TimeUnit, found: TimeUnit) -> Result<(), SimulationError> {
    if expected != found {
        return Err(TimeError::UnitMismatch {
            left: expected,
            right: found,
        }
        .into());
    }

    Ok(())
}

/// Simulation environment.
///
/// A `Simulation` owns the engine tree of an [`Architecture`] and the sinks
/// connected to the root model. It is created with [`Simulation::new()`] or
/// with a [`SimulationBuilder`] when a specific clock or host scheduler is
/// needed.
///
/// Runs are either standalone, in which case
/// [`do_standalone_simulation()`](Simulation::do_standalone_simulation)
/// jumps from one event to the next as fast as possible, or real-time, in
/// which case [`start_rt_simulation()`](Simulation::start_rt_simulation)
/// returns immediately and the steps are executed by the host scheduler at
/// the wall-clock times dictated by the accelerated clock.
///
/// The step methods ([`initialise_simulation()`](Simulation::initialise_simulation),
/// [`produce_output()`](Simulation::produce_output), etc.) expose the
/// protocol of the root engine for manual stepping.
pub struct Simulation {
    architecture: Architecture,
    clock: Option<Arc<dyn AcceleratedClock>>,
    scheduler: Option<HostScheduler>,
    min_resolution: Duration,
    sinks: Arc<Mutex<SinkSet>>,
    tree: Option<Arc<Mutex<EngineTree>>>,
    scheduled_inputs: Vec<Event>,
    real_time: Option<RealTimeSimulator>,
    report: ReportState,
}

enum ReportState {
    Unavailable,
    Ready(SimulationReport),
    Taken,
}

impl Simulation {
    /// Creates a simulation with the default clock and host scheduler.
    pub fn new(architecture: Architecture) -> Self {
        Self::builder(architecture).build()
    }

    /// Returns a builder for a simulation of the specified architecture.
    pub fn builder(architecture: Architecture) -> SimulationBuilder {
        SimulationBuilder {
            architecture,
            clock: None,
            scheduler: None,
            min_resolution: HostScheduler::DEFAULT_MIN_RESOLUTION,
        }
    }

    /// Returns the simulated architecture.
    pub fn architecture(&self) -> &Architecture {
        &self.architecture
    }

    /// Returns the accelerated clock used for real-time runs, if any.
    pub fn clock(&self) -> Option<Arc<dyn AcceleratedClock>> {
        self.clock.clone()
    }

    /// Connects a sink to the events of the specified kind exported by the
    /// root model.
    pub fn connect_sink(
        &mut self,
        kind: impl Into<EventKind>,
        sink: impl EventSink,
    ) -> Result<(), SimulationError> {
        let kind = kind.into();
        let root = self.architecture.root();
        let exported = self
            .architecture
            .descriptor(root.as_str())
            .is_some_and(|d| d.exported.contains(&kind));
        if !exported {
            return Err(ConfigurationError::NotExported {
                uri: root.clone(),
                kind,
            }
            .into());
        }
        lock(&self.sinks).add(kind, Box::new(sink));

        Ok(())
    }

    /// Instantiates a fresh engine tree, discarding the previous one and its
    /// report.
    pub fn construct_simulator(&mut self) -> Result<(), SimulationError> {
        self.check_no_rt_run()?;

        self.real_time = None;
        self.tree = Some(Arc::new(Mutex::new(EngineTree::assemble(
            &self.architecture,
        ))));
        self.report = ReportState::Unavailable;
        info!(root = %self.architecture.root(), models = self.architecture.len(), "simulator constructed");

        Ok(())
    }

    /// Schedules an input of the root model for the next standalone run.
    pub fn schedule_input(&mut self, event: Event) -> Result<(), SimulationError> {
        self.check_root_imports(event.kind())?;
        self.scheduled_inputs.push(event);

        Ok(())
    }

    /// Runs the simulation as fast as possible from `start` for `duration`.
    ///
    /// The inputs scheduled with [`schedule_input()`](Simulation::schedule_input)
    /// are consumed by the run. Only events occurring strictly before the end
    /// of the run are executed; a run of infinite duration ends when no event
    /// remains.
    pub fn do_standalone_simulation(
        &mut self,
        start: SimTime,
        duration: SimDuration,
    ) -> Result<(), SimulationError> {
        self.check_no_rt_run()?;
        let tree = self.tree()?;
        let end = start.checked_add(duration)?;

        let mut inputs = mem::take(&mut self.scheduled_inputs);
        if let Some(early) = inputs.iter().find(|e| !(e.time() >= start)) {
            return Err(ProtocolError::InputOutOfRange {
                time: early.time(),
                start,
            }
            .into());
        }
        // Stable sort: simultaneous inputs keep their scheduling order.
        inputs.sort_by(|a, b| {
            a.time()
                .partial_cmp(&b.time())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut inputs = inputs.into_iter().peekable();

        info!(start = %start, end = %end, "standalone simulation started");
        self.with_tree(&tree, |tree| tree.initialise(start, duration))?;
        loop {
            let step = self.with_tree(&tree, |tree| {
                let forecast = tree.root.time_of_next_event();
                let next_input = inputs
                    .peek()
                    .map(|e| e.time())
                    .unwrap_or(SimTime::infinity(start.unit()));
                let current = forecast.min(next_input);
                if !(current < end) {
                    return Ok(false);
                }

                while let Some(event) = inputs.next_if(|e| e.time() == current) {
                    tree.inject(&event)?;
                }
                if forecast == current {
                    tree.step_internal()?;
                } else {
                    tree.step_external(current)?;
                }

                Ok(true)
            })?;
            if !step {
                break;
            }
        }
        self.with_tree(&tree, |tree| {
            let end = if end.is_infinite() {
                tree.root.time_of_last_event()
            } else {
                end
            };
            info!(end = %end, "standalone simulation ended");
            tree.root.end_simulation(end)
        })
    }

    /// Starts a real-time run and returns immediately.
    ///
    /// `instant_of_start` is the instant of the accelerated clock at which the
    /// run starts, at simulation time `start`; it must lie in the future.
    pub fn start_rt_simulation(
        &mut self,
        instant_of_start: MonotonicTime,
        start: SimTime,
        duration: SimDuration,
    ) -> Result<(), SimulationError> {
        self.check_no_rt_run()?;
        let clock = self
            .clock
            .clone()
            .ok_or(ConfigurationError::MissingAccelerationFactor)?;
        if instant_of_start <= clock.current_instant() {
            return Err(ProtocolError::StartNotInFuture.into());
        }
        let tree = self.tree()?;
        let end = start.checked_add(duration)?;
        lock(&tree).initialise(start, duration)?;

        let min_resolution = self.min_resolution;
        let scheduler = self
            .scheduler
            .get_or_insert_with(|| HostScheduler::with_min_resolution(min_resolution))
            .clone();
        self.real_time = Some(RealTimeSimulator::start(
            tree,
            self.sinks.clone(),
            clock,
            scheduler,
            instant_of_start,
            start,
            end,
        ));

        Ok(())
    }

    /// Injects an input of the root model.
    ///
    /// During a real-time run, the event is re-stamped with the simulation
    /// time derived from the clock and an external step is performed right
    /// away. Otherwise, the event is buffered at the root for the next
    /// manual [`external_event_step()`](Simulation::external_event_step).
    pub fn inject_event(&mut self, event: Event) -> Result<(), SimulationError> {
        if let Some(rt) = self.active_rt_run() {
            return rt.inject_event(event);
        }

        self.with_root_tree(|tree| Ok(tree.inject(&event)?))
    }

    /// Ends the ongoing real-time run at the simulation time derived from the
    /// clock.
    pub fn stop_simulation(&mut self) -> Result<(), SimulationError> {
        match &self.real_time {
            Some(rt) => rt.stop(),
            None => Err(ProtocolError::NoRunInProgress.into()),
        }
    }

    /// Returns `true` while a real-time run is in progress.
    pub fn is_rt_simulation_running(&self) -> bool {
        self.active_rt_run().is_some()
    }

    /// Returns the simulation time derived from the clock during a real-time
    /// run.
    pub fn rt_current_time(&self) -> Option<SimTime> {
        self.active_rt_run().map(|rt| rt.current_time())
    }

    /// Blocks until the real-time run has ended and returns the error which
    /// ended it prematurely, if any.
    pub fn join_rt_simulation(&mut self) -> Result<(), SimulationError> {
        match &self.real_time {
            Some(rt) => rt.join(),
            None => Err(ProtocolError::NoRunInProgress.into()),
        }
    }

    /// Blocks until the real-time run has ended or the timeout has elapsed,
    /// and returns `true` if no run is in progress anymore.
    pub fn wait_rt_simulation(&self, timeout: Duration) -> bool {
        match &self.real_time {
            Some(rt) => rt.wait_timeout(timeout),
            None => true,
        }
    }

    /// Collects the report of the last run.
    pub fn finalise_simulation(&mut self) -> Result<(), SimulationError> {
        self.check_no_rt_run()?;
        let tree = self.tree()?;
        let tree = lock(&tree);
        if !tree.root.is_simulation_initialised() {
            return Err(ProtocolError::NotInitialised.into());
        }
        if tree.root.is_running() {
            return Err(ProtocolError::RunInProgress.into());
        }
        self.report = ReportState::Ready(tree.root.final_report());

        Ok(())
    }

    /// Takes the report collected by
    /// [`finalise_simulation()`](Simulation::finalise_simulation).
    ///
    /// The report can only be taken once.
    pub fn get_final_report(&mut self) -> Result<SimulationReport, SimulationError> {
        match mem::replace(&mut self.report, ReportState::Taken) {
            ReportState::Ready(report) => Ok(report),
            state => {
                self.report = state;
                Err(ProtocolError::ReportUnavailable.into())
            }
        }
    }

    /// Initialises the root engine for manual stepping.
    pub fn initialise_simulation(
        &mut self,
        start: SimTime,
        duration: SimDuration,
    ) -> Result<(), SimulationError> {
        self.with_root_tree(|tree| tree.initialise(start, duration))
    }

    /// Produces the output of the root engine at its forecast time.
    pub fn produce_output(&mut self, current: SimTime) -> Result<(), SimulationError> {
        self.with_root_tree(|tree| tree.root.produce_output(current))
    }

    /// Performs the internal step of the root engine.
    pub fn internal_event_step(&mut self) -> Result<(), SimulationError> {
        self.with_root_tree(|tree| tree.root.internal_event_step())
    }

    /// Performs an external step of the root engine on the injected input.
    pub fn external_event_step(&mut self, elapsed: SimDuration) -> Result<(), SimulationError> {
        self.with_root_tree(|tree| tree.root.external_event_step(elapsed))
    }

    /// Ends the run of the root engine.
    pub fn end_simulation(&mut self, end: SimTime) -> Result<(), SimulationError> {
        self.with_root_tree(|tree| tree.root.end_simulation(end))
    }

    /// Returns the protocol state of the root engine.
    pub fn root_state(&self) -> Result<SimulatorState, SimulationError> {
        let tree = self.tree()?;
        let tree = lock(&tree);
        let root = &tree.root;

        Ok(SimulatorState {
            time_of_last_event: root.time_of_last_event(),
            time_of_next_event: root.time_of_next_event(),
            next_time_advance: root.next_time_advance(),
            initialised: root.is_simulation_initialised(),
            running: root.is_running(),
            debug_level: root.debug_level(),
        })
    }

    /// Returns the exported variables resolved by the last initialisation.
    pub fn variables(&self) -> Result<Variables, SimulationError> {
        let tree = self.tree()?;
        let tree = lock(&tree);

        Ok(tree.variables().clone())
    }

    /// Sets the verbosity of the debug traces of the whole tree.
    pub fn set_debug_level(&mut self, level: u32) -> Result<(), SimulationError> {
        let tree = self.tree()?;
        lock(&tree).root.set_debug_level(level);

        Ok(())
    }

    /// Toggles the debug traces of the whole tree.
    pub fn toggle_debug_mode(&mut self) -> Result<(), SimulationError> {
        let tree = self.tree()?;
        lock(&tree).root.toggle_debug_mode();

        Ok(())
    }

    /// Returns a human-readable rendering of the state of the whole tree.
    pub fn show_current_state(&self) -> Result<String, SimulationError> {
        let tree = self.tree()?;
        let tree = lock(&tree);
        let root = &tree.root;
        let elapsed = SimDuration::zero(root.time_unit());

        Ok(format!(
            "{}{}",
            root.show_current_state("", elapsed),
            root.show_current_state_content("")
        ))
    }

    fn tree(&self) -> Result<Arc<Mutex<EngineTree>>, SimulationError> {
        self.tree
            .clone()
            .ok_or_else(|| ProtocolError::NotConstructed.into())
    }

    fn active_rt_run(&self) -> Option<&RealTimeSimulator> {
        self.real_time.as_ref().filter(|rt| rt.is_running())
    }

    fn check_no_rt_run(&self) -> Result<(), SimulationError> {
        if self.active_rt_run().is_some() {
            return Err(ProtocolError::RunInProgress.into());
        }

        Ok(())
    }

    fn check_root_imports(&self, kind: &EventKind) -> Result<(), SimulationError> {
        let root = self.architecture.root();
        let imported = self
            .architecture
            .descriptor(root.as_str())
            .is_some_and(|d| d.imported.contains(kind));
        if !imported {
            return Err(ProtocolError::UndeclaredInput { kind: kind.clone() }.into());
        }

        Ok(())
    }

    /// Runs `f` on the engine tree outside of real-time runs.
    fn with_root_tree<R>(
        &mut self,
        f: impl FnOnce(&mut EngineTree) -> Result<R, SimulationError>,
    ) -> Result<R, SimulationError> {
        self.check_no_rt_run()?;
        let tree = self.tree()?;

        self.with_tree(&tree, f)
    }

    /// Runs `f` on the locked engine tree, then forwards the exported events
    /// to the sinks once the lock is released.
    fn with_tree<R>(
        &self,
        tree: &Mutex<EngineTree>,
        f: impl FnOnce(&mut EngineTree) -> Result<R, SimulationError>,
    ) -> Result<R, SimulationError> {
        let (result, outputs) = {
            let mut tree = lock(&tree);
            let result = f(&mut tree);

            (result, tree.take_outputs())
        };
        if !outputs.is_empty() {
            lock(&self.sinks).dispatch(&outputs);
        }

        result
    }
}

impl fmt::Debug for Simulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulation")
            .field("root", self.architecture.root())
            .field("constructed", &self.tree.is_some())
            .field("rt_running", &self.is_rt_simulation_running())
            .finish_non_exhaustive()
    }
}

/// Builder for a [`Simulation`].
///
/// If no clock is provided, real-time runs use a [`SystemAcceleratedClock`]
/// with the acceleration factor declared by the architecture, if any.
pub struct SimulationBuilder {
    architecture: Architecture,
    clock: Option<Arc<dyn AcceleratedClock>>,
    scheduler: Option<HostScheduler>,
    min_resolution: Duration,
}

impl SimulationBuilder {
    /// Sets the accelerated clock of real-time runs.
    ///
    /// This clock takes precedence over the acceleration factor declared by
    /// the architecture.
    pub fn set_clock(mut self, clock: impl AcceleratedClock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));

        self
    }

    /// Sets the minimum wall-clock resolution of the host scheduler created
    /// for real-time runs.
    ///
    /// This setting is ignored if a host scheduler is provided with
    /// [`set_scheduler()`](SimulationBuilder::set_scheduler).
    pub fn set_min_resolution(mut self, min_resolution: Duration) -> Self {
        self.min_resolution = min_resolution;

        self
    }

    /// Sets the host scheduler of real-time runs, which may be shared with
    /// controllers.
    pub fn set_scheduler(mut self, scheduler: HostScheduler) -> Self {
        self.scheduler = Some(scheduler);

        self
    }

    /// Builds the simulation.
    pub fn build(self) -> Simulation {
        let declared_factor = self.architecture.acceleration_factor();
        let clock = match (self.clock, declared_factor) {
            (Some(clock), Some(factor)) => {
                if clock.acceleration_factor() != factor {
                    warn!(
                        clock = clock.acceleration_factor(),
                        architecture = factor,
                        "the acceleration factor of the clock overrides the one of the architecture"
                    );
                }
                Some(clock)
            }
            (Some(clock), None) => Some(clock),
            (None, Some(factor)) => {
                SystemAcceleratedClock::new(MonotonicTime::EPOCH, Instant::now(), factor)
                    .ok()
                    .map(|clock| Arc::new(clock) as Arc<dyn AcceleratedClock>)
            }
            (None, None) => None,
        };

        Simulation {
            architecture: self.architecture,
            clock,
            scheduler: self.scheduler,
            min_resolution: self.min_resolution,
            sinks: Arc::new(Mutex::new(SinkSet::default())),
            tree: None,
            scheduled_inputs: Vec::new(),
            real_time: None,
            report: ReportState::Unavailable,
        }
    }
}

impl fmt::Debug for SimulationBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationBuilder")
            .field("root", self.architecture.root())
            .field("min_resolution", &self.min_resolution)
            .finish_non_exhaustive()
    }
}

/// Error returned when a step of the simulation protocol is invalid.
#[derive(Clone, Debug, PartialEq)]
pub enum ProtocolError {
    /// The engine has not been initialised.
    NotInitialised,
    /// The engine has already been initialised.
    AlreadyInitialised,
    /// The run has ended.
    SimulationEnded,
    /// The duration of a run is not strictly positive.
    NonPositiveDuration(SimDuration),
    /// An internal step was requested before the output was produced.
    OutputNotProduced {
        /// The forecast time of the step.
        expected: SimTime,
    },
    /// The output has already been produced at this time.
    OutputAlreadyProduced {
        /// The time of the step.
        current: SimTime,
    },
    /// The time of next event differs from the time of last event plus the
    /// next time advance.
    TimeAdvanceInvariant {
        /// Time of the last transition.
        time_of_last_event: SimTime,
        /// Forecast time of the next internal transition.
        time_of_next_event: SimTime,
        /// Recorded time advance.
        next_time_advance: SimDuration,
    },
    /// Output was requested at a time other than the forecast.
    NotImminent {
        /// The requested time.
        current: SimTime,
        /// The forecast time of the next internal transition.
        forecast: SimTime,
    },
    /// No internal transition is forecast.
    NoForecast,
    /// A model emitted an event of a kind it does not export.
    UndeclaredOutput {
        /// The emitting model.
        uri: ModelUri,
        /// The undeclared kind.
        kind: EventKind,
    },
    /// An event was injected with a kind the receiver does not import.
    UndeclaredInput {
        /// The undeclared kind.
        kind: EventKind,
    },
    /// An external step was requested after the forecast time.
    ElapsedBeyondForecast {
        /// The elapsed time since the last transition.
        elapsed: SimDuration,
        /// The recorded time advance.
        next_time_advance: SimDuration,
    },
    /// An external step was requested while no input is buffered.
    NoPendingInput,
    /// The start of a real-time run does not lie in the future.
    StartNotInFuture,
    /// A scheduled input precedes the start of the run.
    InputOutOfRange {
        /// Time stamp of the input.
        time: SimTime,
        /// Start of the run.
        start: SimTime,
    },
    /// The engine tree has not been constructed.
    NotConstructed,
    /// The operation is not allowed while a run is in progress.
    RunInProgress,
    /// The operation requires a real-time run in progress.
    NoRunInProgress,
    /// No report is available, either because the simulation was not
    /// finalised or because the report was already taken.
    ReportUnavailable,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialised => fmt.write_str("the simulation has not been initialised"),
            Self::AlreadyInitialised => fmt.write_str("the simulation has already been initialised"),
            Self::SimulationEnded => fmt.write_str("the simulation has ended"),
            Self::NonPositiveDuration(d) => {
                write!(fmt, "the simulation duration must be strictly positive, got {d}")
            }
            Self::OutputNotProduced { expected } => write!(
                fmt,
                "the output must be produced at {expected} before the internal transition"
            ),
            Self::OutputAlreadyProduced { current } => {
                write!(fmt, "the output has already been produced at {current}")
            }
            Self::TimeAdvanceInvariant {
                time_of_last_event,
                time_of_next_event,
                next_time_advance,
            } => write!(
                fmt,
                "inconsistent time advance: tl = {time_of_last_event}, tn = {time_of_next_event}, ta = {next_time_advance}"
            ),
            Self::NotImminent { current, forecast } => write!(
                fmt,
                "output requested at {current} while the next internal event is forecast at {forecast}"
            ),
            Self::NoForecast => fmt.write_str("no internal event is forecast"),
            Self::UndeclaredOutput { uri, kind } => write!(
                fmt,
                "model '{uri}' emitted an event of kind '{kind}', which it does not export"
            ),
            Self::UndeclaredInput { kind } => {
                write!(fmt, "events of kind '{kind}' are not imported")
            }
            Self::ElapsedBeyondForecast {
                elapsed,
                next_time_advance,
            } => write!(
                fmt,
                "elapsed time {elapsed} exceeds the time advance {next_time_advance}"
            ),
            Self::NoPendingInput => fmt.write_str("no input is pending"),
            Self::StartNotInFuture => {
                fmt.write_str("the start of a real-time simulation must lie in the future")
            }
            Self::InputOutOfRange { time, start } => write!(
                fmt,
                "an input scheduled at {time} precedes the start of the simulation at {start}"
            ),
            Self::NotConstructed => fmt.write_str("the simulator has not been constructed"),
            Self::RunInProgress => fmt.write_str("a simulation run is in progress"),
            Self::NoRunInProgress => fmt.write_str("no real-time simulation is in progress"),
            Self::ReportUnavailable => fmt.write_str("no simulation report is available"),
        }
    }
}

impl Error for ProtocolError {}

/// Error returned by simulation operations.
#[derive(Debug)]
pub enum SimulationError {
    /// The architecture or the simulation is misconfigured.
    Configuration(ConfigurationError),
    /// A step of the simulation protocol is invalid.
    Protocol(ProtocolError),
    /// A model failed during a transition.
    Model {
        /// The failing model.
        uri: ModelUri,
        /// The error reported by the model.
        source: ModelError,
    },
    /// A time computation failed.
    Time(TimeError),
}

impl fmt::Display for SimulationError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(e) => write!(fmt, "configuration error: {e}"),
            Self::Protocol(e) => write!(fmt, "protocol error: {e}"),
            Self::Model { uri, source } => write!(fmt, "model '{uri}' failed: {source}"),
            Self::Time(e) => write!(fmt, "time error: {e}"),
        }
    }
}

impl Error for SimulationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Configuration(e) => Some(e),
            Self::Protocol(e) => Some(e),
            Self::Model { source, .. } => Some(source),
            Self::Time(e) => Some(e),
        }
    }
}

impl From<ConfigurationError> for SimulationError {
    fn from(e: ConfigurationError) -> Self {
        Self::Configuration(e)
    }
}

impl From<ProtocolError> for SimulationError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl From<TimeError> for SimulationError {
    fn from(e: TimeError) -> Self {
        Self::Time(e)
    }
}
