use std::fmt;

use tracing::{error, info_span, trace};

use crate::model::{FixpointProgress, ModelUri, SimulationReport, Variables};
use crate::time::{SimDuration, SimTime, TimeUnit};

use super::activity::{ActivityBoard, ActivityNotifier};
use super::{check_unit, DevsEngine, ProtocolError, SimulationError, SimulatorState};

/// The engine of a coupled model.
///
/// A `Coordinator` presents the same step protocol as a
/// [`Simulator`](super::Simulator) to its parent. Its forecast is the earliest
/// forecast among its children; when it is stepped, it forwards output
/// production and internal steps to its imminent children, then an external
/// step to each child holding buffered input, in declaration order.
///
/// Events are not relayed by coordinators: they travel directly between
/// atomic simulators along the resolved routes. Coordinators only track
/// which of their children hold buffered input through an activity board
/// which the children update with the
/// [`has_received_external_events()`](Coordinator::has_received_external_events) /
/// [`has_performed_external_events()`](Coordinator::has_performed_external_events)
/// notifications.
pub struct Coordinator {
    uri: ModelUri,
    unit: TimeUnit,
    children: Vec<Box<dyn DevsEngine>>,
    board: ActivityBoard,
    notifier: ActivityNotifier,
    state: SimulatorState,
    imminent: Vec<usize>,
    output_produced_at: Option<SimTime>,
}

impl Coordinator {
    pub(crate) fn new(
        uri: ModelUri,
        unit: TimeUnit,
        children: Vec<Box<dyn DevsEngine>>,
        board: ActivityBoard,
        notifier: ActivityNotifier,
    ) -> Self {
        Self {
            uri,
            unit,
            children,
            board,
            notifier,
            state: SimulatorState::new(unit),
            imminent: Vec::new(),
            output_produced_at: None,
        }
    }

    /// Records that a child holds buffered input.
    pub fn has_received_external_events(&self, uri: &ModelUri) {
        self.board.mark(uri);
    }

    /// Records that a child has consumed its buffered input.
    pub fn has_performed_external_events(&self, uri: &ModelUri) {
        self.board.unmark(uri);
    }

    /// Returns the engines of the submodels in declaration order.
    pub fn children(&self) -> &[Box<dyn DevsEngine>] {
        &self.children
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

    /// Re-evaluates the forecast as the earliest forecast of the children.
    fn schedule_from(&mut self, time_of_last_event: SimTime) -> Result<(), SimulationError> {
        let time_of_next_event = self
            .children
            .iter()
            .map(|child| child.time_of_next_event())
            .fold(SimTime::infinity(self.unit), SimTime::min);

        self.state.time_of_last_event = time_of_last_event;
        self.state.time_of_next_event = time_of_next_event;
        self.state.next_time_advance = time_of_next_event.checked_duration_since(time_of_last_event)?;

        Ok(())
    }

    /// Performs an external step on every child holding buffered input.
    fn relay_external_steps(&mut self, current: SimTime) -> Result<(), SimulationError> {
        for child in self.children.iter_mut() {
            if !self.board.contains(child.uri()) {
                continue;
            }
            let elapsed = current.checked_duration_since(child.time_of_last_event())?;
            child.external_event_step(elapsed)?;
        }

        Ok(())
    }

    fn notify_if_idle(&self) {
        if self.board.is_empty() {
            self.notifier.has_performed_external_events();
        }
    }
}

impl DevsEngine for Coordinator {
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

        self.board.clear();
        for child in self.children.iter_mut() {
            child.initialise_simulation(start, duration)?;
        }
        self.imminent.clear();
        self.output_produced_at = None;
        self.schedule_from(start)?;
        self.state.initialised = true;
        self.state.running = true;

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
        self.children
            .iter()
            .filter_map(|child| child.time_of_pending_input())
            .reduce(SimTime::min)
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

        self.imminent = self
            .children
            .iter()
            .enumerate()
            .filter(|(_, child)| child.time_of_next_event() == current)
            .map(|(i, _)| i)
            .collect();
        trace!(imminent = self.imminent.len(), "output");
        for &i in &self.imminent {
            self.children[i].produce_output(current)?;
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
        for i in std::mem::take(&mut self.imminent) {
            self.children[i].internal_event_step()?;
        }
        self.relay_external_steps(current)?;
        self.schedule_from(current)?;
        self.notify_if_idle();
        trace!(tl = %current, tn = %self.state.time_of_next_event, "internal step");

        Ok(())
    }

    fn external_event_step(&mut self, elapsed: SimDuration) -> Result<(), SimulationError> {
        let _span = info_span!("model", uri = %self.uri).entered();

        self.check_running()?;
        check_unit(self.unit, elapsed.unit())?;
        if self.board.is_empty() {
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

        self.output_produced_at = None;
        self.imminent.clear();
        self.relay_external_steps(current)?;
        self.schedule_from(current)?;
        self.notify_if_idle();
        trace!(tl = %current, tn = %self.state.time_of_next_event, "external step");

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

        for child in self.children.iter_mut() {
            child.refresh_forecast()?;
        }

        self.schedule_from(self.state.time_of_last_event)
    }

    fn end_simulation(&mut self, end: SimTime) -> Result<(), SimulationError> {
        let _span = info_span!("model", uri = %self.uri).entered();

        self.check_running()?;
        check_unit(self.unit, end.unit())?;

        self.state.running = false;
        self.board.clear();
        // Every child is ended; the first failure is returned.
        let mut result = Ok(());
        for child in self.children.iter_mut() {
            if let Err(e) = child.end_simulation(end) {
                if result.is_ok() {
                    result = Err(e);
                } else {
                    error!(child = %child.uri(), error = %e, "failed to end the simulation");
                }
            }
        }

        result
    }

    fn reinitialise(&mut self) {
        for child in self.children.iter_mut() {
            child.reinitialise();
        }
        self.board.clear();
        self.imminent.clear();
        self.output_produced_at = None;
        self.state = SimulatorState {
            debug_level: self.state.debug_level,
            ..SimulatorState::new(self.unit)
        };
    }

    fn final_report(&self) -> SimulationReport {
        SimulationReport::new(
            self.uri.clone(),
            None,
            self.children.iter().map(|c| c.final_report()).collect(),
        )
    }

    fn use_fixpoint_initialise_variables(&self) -> bool {
        self.children
            .iter()
            .any(|c| c.use_fixpoint_initialise_variables())
    }

    fn fixpoint_initialise_variables(&mut self, variables: &mut Variables) -> FixpointProgress {
        self.children
            .iter_mut()
            .map(|c| c.fixpoint_initialise_variables(variables))
            .fold(FixpointProgress::default(), |acc, p| acc + p)
    }

    fn toggle_debug_mode(&mut self) {
        self.state.debug_level = if self.state.debug_level == 0 { 1 } else { 0 };
        let level = self.state.debug_level;
        for child in self.children.iter_mut() {
            child.set_debug_level(level);
        }
    }

    fn set_debug_level(&mut self, level: u32) {
        self.state.debug_level = level;
        for child in self.children.iter_mut() {
            child.set_debug_level(level);
        }
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
        let child_indent = format!("{indent}  ");
        let current = self.state.time_of_last_event.checked_add(elapsed).ok();
        for child in &self.children {
            let child_elapsed = current
                .and_then(|c| c.checked_duration_since(child.time_of_last_event()).ok())
                .unwrap_or_else(|| SimDuration::zero(self.unit));
            s.push_str(&child.show_current_state(&child_indent, child_elapsed));
        }

        s
    }

    fn show_current_state_content(&self, indent: &str) -> String {
        let child_indent = format!("{indent}  ");
        self.children
            .iter()
            .map(|c| c.show_current_state_content(&child_indent))
            .collect()
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("uri", &self.uri)
            .field("state", &self.state)
            .field("board", &self.board)
            .finish_non_exhaustive()
    }
}
