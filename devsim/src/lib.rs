//! A discrete-event simulator for cyber-physical equipment.
//!
//! Devsim implements the DEVS formalism: each piece of equipment (a heater, a
//! fridge, a lamp...) is an *atomic model* with an explicit state which
//! evolves through internal transitions, scheduled by the model itself, and
//! external transitions, triggered by incoming events. Atomic models are
//! composed into *coupled models* which route events among their submodels,
//! forming a model tree described by an [`Architecture`](architecture::Architecture).
//!
//! A simulation can be run as fast as possible, jumping from one event to the
//! next, or paced against the wall clock scaled by an acceleration factor.
//! The latter makes it possible to test a closed-loop
//! [`Controller`](controller::Controller) against a simulated plant before
//! deploying it against the real equipment.
//!
//! # A practical overview
//!
//! Simulating a system typically involves three distinct activities:
//!
//! 1. the design of simulation models for each piece of equipment,
//! 2. the description of the model tree and of the routes of the events,
//! 3. the execution of the simulation, either standalone or in real time,
//!    while observing the events exported by the root model.
//!
//! ## Authoring models
//!
//! Models implement the [`AtomicModel`](model::AtomicModel) trait, which
//! specifies:
//!
//! * a time advance, i.e. the delay until the next internal transition if no
//!   event is received in the meantime, possibly infinite,
//! * an output function, called right before each internal transition, which
//!   returns the events emitted by the model,
//! * an internal and an external transition function.
//!
//! Events are identified by an [`EventKind`](event::EventKind) and carry an
//! arbitrary payload.
//!
//! Let us consider for illustration a heater which reports its temperature
//! every minute and can be switched on and off:
//!
//! ```
//! use devsim::event::Event;
//! use devsim::model::{AtomicModel, ModelError};
//! use devsim::time::{SimDuration, SimTime, TimeUnit};
//!
//! pub struct Heater {
//!     temperature: f64,
//!     heating: bool,
//! }
//!
//! impl AtomicModel for Heater {
//!     fn time_advance(&self) -> SimDuration {
//!         SimDuration::new(60.0, TimeUnit::Seconds)
//!     }
//!     fn output(&mut self, current: SimTime) -> Result<Vec<Event>, ModelError> {
//!         Ok(vec![Event::new("temperature", current, self.temperature)])
//!     }
//!     fn internal_transition(&mut self, _: SimTime) -> Result<(), ModelError> {
//!         self.temperature += if self.heating { 0.5 } else { -0.1 };
//!         Ok(())
//!     }
//!     fn external_transition(
//!         &mut self,
//!         _: SimTime,
//!         _: SimDuration,
//!         events: Vec<Event>,
//!     ) -> Result<(), ModelError> {
//!         for event in events {
//!             event
//!                 .execute_on(self, |heater, on: &bool| heater.heating = *on)
//!                 .map_err(|e| ModelError::with_source("invalid switch command", e))?;
//!         }
//!         Ok(())
//!     }
//! }
//! ```
//!
//! ## Describing the model tree
//!
//! Models are declared in an
//! [`ArchitectureBuilder`](architecture::ArchitectureBuilder) with the kinds
//! of events they import and export, and a factory which instantiates them.
//! Coupled models list their submodels, the routes between them and the
//! events they import from or re-export to their own parent. The
//! architecture is validated as a whole when it is built, so a malformed
//! tree never reaches the simulation.
//!
//! ## Running simulations
//!
//! A [`Simulation`](simulation::Simulation) instantiates the engine tree of
//! an architecture. Events exported by the root model are observed by
//! connecting [`EventSink`](simulation::EventSink)s such as an
//! [`EventBuffer`](simulation::EventBuffer):
//!
//! ```
//! # use devsim::event::Event;
//! # use devsim::model::{AtomicModel, ModelError};
//! # use devsim::time::{SimDuration, SimTime, TimeUnit};
//! # pub struct Heater {
//! #     temperature: f64,
//! #     heating: bool,
//! # }
//! # impl AtomicModel for Heater {
//! #     fn time_advance(&self) -> SimDuration {
//! #         SimDuration::new(60.0, TimeUnit::Seconds)
//! #     }
//! #     fn output(&mut self, current: SimTime) -> Result<Vec<Event>, ModelError> {
//! #         Ok(vec![Event::new("temperature", current, self.temperature)])
//! #     }
//! #     fn internal_transition(&mut self, _: SimTime) -> Result<(), ModelError> {
//! #         self.temperature += if self.heating { 0.5 } else { -0.1 };
//! #         Ok(())
//! #     }
//! #     fn external_transition(
//! #         &mut self,
//! #         _: SimTime,
//! #         _: SimDuration,
//! #         events: Vec<Event>,
//! #     ) -> Result<(), ModelError> {
//! #         for event in events {
//! #             event
//! #                 .execute_on(self, |heater, on: &bool| heater.heating = *on)
//! #                 .map_err(|e| ModelError::with_source("invalid switch command", e))?;
//! #         }
//! #         Ok(())
//! #     }
//! # }
//! use devsim::architecture::{ArchitectureBuilder, AtomicDescriptor};
//! use devsim::simulation::{EventBuffer, Simulation};
//!
//! const S: TimeUnit = TimeUnit::Seconds;
//!
//! let architecture = ArchitectureBuilder::new("heater", S)
//!     .atomic(
//!         AtomicDescriptor::new("heater", S, || Heater { temperature: 20.0, heating: false })
//!             .imports("switch")
//!             .exports("temperature"),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let mut simulation = Simulation::new(architecture);
//! let temperatures = EventBuffer::new();
//! simulation.connect_sink("temperature", temperatures.clone()).unwrap();
//!
//! // Switch the heater on after 90s and run for 10 minutes.
//! simulation.construct_simulator().unwrap();
//! simulation
//!     .schedule_input(Event::new("switch", SimTime::new(90.0, S), true))
//!     .unwrap();
//! simulation
//!     .do_standalone_simulation(SimTime::zero(S), SimDuration::new(600.0, S))
//!     .unwrap();
//!
//! // The switch command postpones the next report by a full period.
//! let times: Vec<f64> = temperatures.map(|e| e.time().value()).collect();
//! assert_eq!(times, [60.0, 150.0, 210.0, 270.0, 330.0, 390.0, 450.0, 510.0, 570.0]);
//! ```
//!
//! Real-time runs are started with
//! [`Simulation::start_rt_simulation()`](simulation::Simulation::start_rt_simulation)
//! and use an [`AcceleratedClock`](time::AcceleratedClock): each forecast
//! event is executed when the accelerated clock reaches its simulation time,
//! and events injected during the run are stamped with the clock-derived
//! simulation time.
//!
//! ## Closing the loop
//!
//! A [`Controller`](controller::Controller) keeps a measured quantity within
//! a hysteresis band around a target by starting and stopping the actuator of
//! a piece of equipment, either by polling its measurements or by receiving
//! measurements pushed by the equipment. See the [`controller`] module
//! documentation.
//!
//! # Other resources
//!
//! * the [`simulation`] module discusses the simulation lifecycle and the
//!   step protocol of the engines,
//! * the [`time`] module discusses simulation time units, accelerated clocks
//!   and the host scheduler used for real-time pacing,
//! * the `heater_control` example of the repository runs a controller
//!   against a simulated heater in real time.
#![warn(missing_docs, missing_debug_implementations, unreachable_pub)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod architecture;
pub mod controller;
pub mod event;
pub mod model;
pub mod simulation;
pub mod time;
pub mod util;
