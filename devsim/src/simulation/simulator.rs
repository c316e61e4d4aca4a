use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error, info_span, trace};

use crate::architecture::{AtomicDescriptor, ModelFactory};
use crate::event::{Event, EventKind, EventPriority, Inbox};
use crate::model::{
    AtomicModel, FixpointProgress, ModelError, ModelUri, SimulationReport, Variables,
};
use crate::time::{SimDuration, SimTime, TimeUnit};
use crate::util::panic_message;

use super::activity::ActivityNotifier;
use super::assembly::Delivery;
use super::{check_unit, DevsEngine, ProtocolError, SimulationError, SimulatorState};

/// The engine of an atomic model.
///
/// A `Simulator` drives the DEVS step protocol of a single [`AtomicModel`]:
///
/// 1. [`produce_output()`](DevsEngine::produce_output) at the forecast time
///    of the next internal event, which delivers the emitted events directly
///    to the inboxes of the atomic models that import them,
/// 2. [`internal_event_step()`](DevsEngine::internal_event_step), which
///    applies the internal transition and computes the next forecast,
/// 3. [`external_event_step()`](DevsEngine::external_event_step) whenever
///    input is buffered, which cancels the pending forecast, applies the
///    external transition to all buffered events and computes the next
///    forecast.
///
/// After every step, `next_time_advance == time_of_next_event -
/// time_of_last_event`.
///
/// # Examples
///
/// Driving a standalone simulator.
///
/// ```
/// use devsim::architecture::AtomicDescriptor;
/// use devsim::event::Event;
/// use devsim::model::{AtomicModel, ModelError};
/// use devsim::simulation::{DevsEngine, Simulator};
/// use devsim::time::{SimDuration, SimTime, TimeUnit};
///
/// const S: TimeUnit = TimeUnit::Seconds;
///
/// // Emits a tick every 2s.
/// struct Ticker;
///
/// impl AtomicModel for Ticker {
///     fn time_advance(&self) -> SimDuration {
///         SimDuration::new(2.0, S)
///     }
///     fn output(&mut self, current: SimTime) -> Result<Vec<Event>, ModelError> {
///         Ok(vec![Event::signal("tick", current)])
///     }
///     fn internal_transition(&mut self, _: SimTime) -> Result<(), ModelError> {
///         Ok(())
///     }
///     fn external_transition(
///         &mut self,
///         _: SimTime,
///         _: SimDuration,
///         _: Vec<Event>,
///     ) -> Result<(), ModelError> {
///         Ok(())
///     }
/// }
///
/// let mut simulator = Simulator::new(&AtomicDescriptor::new("ticker", S, || Ticker).exports("tick"));
/// simulator.initialise_simulation_for(SimDuration::new(10.0, S)).unwrap();
/// assert_eq!(simulator.time_of_next_event(), SimTime::new(2.0, S));
///
/// simulator.produce_output(SimTime::new(2.0, S)).unwrap();
/// simulator.internal_event_step().unwrap();
/// assert_eq!(simulator.time_of_last_event(), SimTime::new(2.0, S));
/// assert_eq!(simulator.time_of_next_event(), SimTime::new(4.0, S));
/// ```
pub struct Simulator {
    uri: ModelUri,
    unit: TimeUnit,
    factory: ModelFactory,
    model: Box<dyn AtomicModel>,
    imported: BTreeSet<EventKind>,
    exported: BTreeSet<EventKind>,
    state: SimulatorState,
    inbox: Inbox,
    notifier: ActivityNotifier,
    routes: HashMap<EventKind, Vec<Delivery>>,
    output_produced_at: Option<SimTime>,
}

impl Simulator {
    /// Creates a standalone simulator.
    ///
    /// The events emitted by a standalone simulator are checked against the
    /// declared exported kinds but are not delivered anywhere.
    pub fn new(descriptor: &AtomicDescriptor) -> Self {
        Self::with_routes(
            descriptor,
            Inbox::new(),
            ActivityNotifier::default(),
            HashMap::new(),
        )
    }

    pub(crate) fn with_routes(
        descriptor: &AtomicDescriptor,
        inbox: Inbox,
        notifier: ActivityNotifier,
        routes: HashMap<EventKind, Vec<Delivery>>,
    ) -> Self {
        let factory = descriptor.factory().clone();

        Self {
            uri: descriptor.uri().clone(),
            unit: descriptor.unit(),
            model: factory(),
            factory,
            imported: descriptor.imported().clone(),
            exported: descriptor.exported().clone(),
            state: SimulatorState::new(descriptor.unit()),
            inbox,
            notifier,
            routes,
            output_produced_at: None,
        }
    }

    /// Buffers an event for the next external step.
    ///
    /// The event is delivered with [`EventPriority::External`]; an error is
    /// returned if its kind is not imported by the model.
    pub fn deliver(&self, event: Event) -> Result<(), ProtocolError> {
        if !self.imported.contains(event.kind()) {
            return Err(ProtocolError::UndeclaredInput {
                kind: event.kind().clone(),
            });
        }
        self.inbox.push(event.with_priority(EventPriority::External));
        self.notifier.has_received_external_events();

        Ok(())
    }

    /// Returns a copy of the protocol state.
    pub fn state(&self) -> SimulatorState {
        self.state
    }

    fn check_running(&self) -> Result<(), ProtocolError> {
        if !self.state.initialised {
            return Err(ProtocolError::NotInitialised);
        }
        if !self.state.running {
            return Err(ProtocolError::SimulationEnded);
        }

        Ok(())
    }

    /// Computes the next forecast from the time of the last event.
    fn schedule_from(&mut self, time_of_last_event: SimTime) -> Result<(), SimulationError> {
        let time_advance = guarded(&self.uri, || Ok(self.model.time_advance()))?;
        check_unit(self.unit, time_advance.unit())?;

        let time_of_next_event = time_of_last_event.checked_add(time_advance)?;
        self.state.time_of_last_event = time_of_last_event;
        self.state.time_of_next_event = time_of_next_event;
        self.state.next_time_advance = time_of_next_event.checked_duration_since(time_of_last_event)?;

        Ok(())
    }

    fn trace_state(&self, step: &str) {
        trace!(
            tl = %self.state.time_of_last_event,
            tn = %self.state.time_of_next_event,
            "{step}"
        );
        if self.has_debug_level(1) {
            debug!(
                "{}",
                self.show_current_state("", SimDuration::zero(self.unit))
            );
        }
    }
}

impl DevsEngine for Simulator {
    fn uri(&self) -> &ModelUri {
        &self.uri
    }

    fn time_unit(&self) -> TimeUnit {
        self.unit
    }

    fn initialise_simulation(
        &mut self,
        start: SimTime,
        duration: SimDuration,
    ) -> Result<(), SimulationError> {
        let _span = info_span!("model", uri = %self.uri).entered();

        if self.state.initialised {
            return Err(ProtocolError::AlreadyInitialised.into());
        }
        check_unit(self.unit, start.unit())?;
        check_unit(self.unit, duration.unit())?;
        if duration.is_zero() {
            return Err(ProtocolError::NonPositiveDuration(duration).into());
        }

        self.inbox.clear();
        self.output_produced_at = None;
        guarded(&self.uri, || {
            self.model.initialise_state(start);
            Ok(())
        })?;
        self.schedule_from(start)?;
        self.state.initialised = true;
        self.state.running = true;
        self.trace_state("initialised");

        Ok(())
    }

    fn is_simulation_initialised(&self) -> bool {
        self.state.initialised
    }

    fn is_running(&self) -> bool {
        self.state.running
    }

    fn time_of_last_event(&self) -> SimTime {
        self.state.time_of_last_event
    }

    fn time_of_next_event(&self) -> SimTime {
        self.state.time_of_next_event
    }

    fn next_time_advance(&self) -> SimDuration {
        self.state.next_time_advance
    }

    fn time_of_pending_input(&self) -> Option<SimTime> {
        self.inbox.earliest_time()
    }

    fn produce_output(&mut self, current: SimTime) -> Result<(), SimulationError> {
        let _span = info_span!("model", uri = %self.uri).entered();

        self.check_running()?;
        check_unit(self.unit, current.unit())?;
        let forecast = self.state.time_of_next_event;
        if forecast.is_infinite() {
            return Err(ProtocolError::NoForecast.into());
        }
        if current != forecast {
            return Err(ProtocolError::NotImminent { current, forecast }.into());
        }
        if self.output_produced_at == Some(current) {
            return Err(ProtocolError::OutputAlreadyProduced { current }.into());
        }

        let events = guarded(&self.uri, || self.model.output(current))?;
        for event in events {
            if !self.exported.contains(event.kind()) {
                return Err(ProtocolError::UndeclaredOutput {
                    uri: self.uri.clone(),
                    kind: event.kind().clone(),
                }
                .into());
            }
            let event = event.with_time(current);
            trace!(kind = %event.kind(), "output");
            if let Some(deliveries) = self.routes.get(event.kind()) {
                for delivery in deliveries {
                    delivery.deliver(&event);
                }
            }
        }
        self.output_produced_at = Some(current);

        Ok(())
    }

    fn internal_event_step(&mut self) -> Result<(), SimulationError> {
        let _span = info_span!("model", uri = %self.uri).entered();

        self.check_running()?;
        let state = self.state;
        if state.time_of_next_event.is_infinite() {
            return Err(ProtocolError::NoForecast.into());
        }
        if state.time_of_next_event.checked_duration_since(state.time_of_last_event)?
            != state.next_time_advance
        {
            return Err(ProtocolError::TimeAdvanceInvariant {
                time_of_last_event: state.time_of_last_event,
                time_of_next_event: state.time_of_next_event,
                next_time_advance: state.next_time_advance,
            }
            .into());
        }
        if self.output_produced_at.take() != Some(state.time_of_next_event) {
            return Err(ProtocolError::OutputNotProduced {
                expected: state.time_of_next_event,
            }
            .into());
        }

        let current = state.time_of_next_event;
        guarded(&self.uri, || self.model.internal_transition(current))?;
        self.schedule_from(current)?;
        self.trace_state("internal transition");

        Ok(())
    }

    fn external_event_step(&mut self, elapsed: SimDuration) -> Result<(), SimulationError> {
        let _span = info_span!("model", uri = %self.uri).entered();

        self.check_running()?;
        check_unit(self.unit, elapsed.unit())?;
        if self.inbox.is_empty() {
            return Err(ProtocolError::NoPendingInput.into());
        }
        if elapsed > self.state.next_time_advance {
            return Err(ProtocolError::ElapsedBeyondForecast {
                elapsed,
                next_time_advance: self.state.next_time_advance,
            }
            .into());
        }
        let current = self.state.time_of_last_event.checked_add(elapsed)?;

        // The pending forecast is void from now on.
        self.state.time_of_next_event = SimTime::infinity(self.unit);
        self.state.next_time_advance = SimDuration::infinity(self.unit);
        self.output_produced_at = None;

        let events = self.inbox.drain();
        trace!(count = events.len(), "external transition");
        guarded(&self.uri, || self.model.external_transition(current, elapsed, events))?;
        self.schedule_from(current)?;
        self.notifier.has_performed_external_events();
        self.trace_state("external transition");

        Ok(())
    }

    fn refresh_forecast(&mut self) -> Result<(), SimulationError> {
        self.check_running()?;
        if self.output_produced_at.is_some() {
            return Err(ProtocolError::OutputAlreadyProduced {
                current: self.state.time_of_next_event,
            }
            .into());
        }

        self.schedule_from(self.state.time_of_last_event)
    }

    fn end_simulation(&mut self, end: SimTime) -> Result<(), SimulationError> {
        let _span = info_span!("model", uri = %self.uri).entered();

        self.check_running()?;
        check_unit(self.unit, end.unit())?;

        self.state.running = false;
        self.inbox.clear();
        self.model.end_simulation(end);
        trace!(end = %end, "simulation ended");

        Ok(())
    }

    fn reinitialise(&mut self) {
        self.model = (self.factory)();
        self.state = SimulatorState {
            debug_level: self.state.debug_level,
            ..SimulatorState::new(self.unit)
        };
        self.inbox.clear();
        self.output_produced_at = None;
    }

    fn final_report(&self) -> SimulationReport {
        SimulationReport::new(self.uri.clone(), self.model.final_report(), Vec::new())
    }

    fn use_fixpoint_initialise_variables(&self) -> bool {
        self.model.use_fixpoint_initialise_variables()
    }

    fn fixpoint_initialise_variables(&mut self, variables: &mut Variables) -> FixpointProgress {
        if !self.model.use_fixpoint_initialise_variables() {
            return FixpointProgress::default();
        }

        self.model.fixpoint_initialise_variables(&self.uri, variables)
    }

    fn toggle_debug_mode(&mut self) {
        self.state.debug_level = if self.state.debug_level == 0 { 1 } else { 0 };
    }

    fn set_debug_level(&mut self, level: u32) {
        self.state.debug_level = level;
    }

    fn debug_level(&self) -> u32 {
        self.state.debug_level
    }

    fn show_current_state(&self, indent: &str, elapsed: SimDuration) -> String {
        let mut s = format!(
            "{indent}{} [tl = {}, tn = {}, ta = {}, elapsed = {}]\n",
            self.uri,
            self.state.time_of_last_event,
            self.state.time_of_next_event,
            self.state.next_time_advance,
            elapsed,
        );
        if self.has_debug_level(2) {
            s.push_str(&self.show_current_state_content(indent));
        }

        s
    }

    fn show_current_state_content(&self, indent: &str) -> String {
        self.model
            .show_state_content()
            .lines()
            .map(|line| format!("{indent}  {line}\n"))
            .collect()
    }
}

/// Runs a function of the model, turning a panic into a model error so that
/// the step fails without poisoning the locks held by the caller.
fn guarded<R>(
    uri: &ModelUri,
    f: impl FnOnce() -> Result<R, ModelError>,
) -> Result<R, SimulationError> {
    let result = panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let message = panic_message(&*payload);
        error!(panic = %message, "model panicked");

        Err(ModelError::new(format!("panicked: {message}")))
    });

    result.map_err(|source| SimulationError::Model {
        uri: uri.clone(),
        source,
    })
}

impl fmt::Debug for Simulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulator")
            .field("uri", &self.uri)
            .field("state", &self.state)
            .field("inbox", &self.inbox)
            .finish_non_exhaustive()
    }
}
