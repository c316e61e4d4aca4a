use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::event::Event;
use crate::time::{AcceleratedClock, HostScheduler, MonotonicTime, SimDuration, SimTime, TaskKey};
use crate::util::lock;

use super::assembly::EngineTree;
use super::sink::SinkSet;
use super::{ProtocolError, SimulationError};

/// Returns the wall-clock delay until the simulation time `time` of a run
/// which started at simulation time `start` and accelerated instant
/// `instant_of_start`.
///
/// `None` is returned if `time` precedes `start` or cannot be represented.
pub(crate) fn wall_clock_delay(
    clock: &dyn AcceleratedClock,
    instant_of_start: MonotonicTime,
    start: SimTime,
    time: SimTime,
) -> Option<Duration> {
    let offset = time.checked_duration_since(start).ok()?.to_std()?;

    Some(clock.delay_until_instant(instant_of_start + offset))
}

/// Paces the steps of an engine tree against an accelerated clock.
///
/// Each forecast internal event is executed by the host scheduler at the
/// wall-clock time at which the clock reaches `instant_of_start + (time of
/// next event - start)`. External input injected during the run is stamped
/// with the simulation time derived from the clock at reception.
///
/// The engine tree lock is always taken after the control lock, and sinks
/// are only invoked once both are released.
pub(crate) struct RealTimeSimulator {
    shared: Arc<Shared>,
}

struct Shared {
    tree: Arc<Mutex<EngineTree>>,
    sinks: Arc<Mutex<SinkSet>>,
    clock: Arc<dyn AcceleratedClock>,
    scheduler: HostScheduler,
    instant_of_start: MonotonicTime,
    start: SimTime,
    end: SimTime,
    control: Mutex<Control>,
    ended: Condvar,
}

struct Control {
    running: bool,
    pending: Option<TaskKey>,
    // Timer tasks only run if the generation is unchanged since they were
    // scheduled.
    generation: u64,
    failure: Option<SimulationError>,
}

impl Control {
    /// Cancels the pending timer task, including one which has already been
    /// dequeued by the scheduler but is still waiting for the control lock.
    fn cancel_pending(&mut self) {
        if let Some(key) = self.pending.take() {
            key.cancel();
        }
        self.generation += 1;
    }
}

impl RealTimeSimulator {
    /// Starts pacing an initialised engine tree.
    pub(crate) fn start(
        tree: Arc<Mutex<EngineTree>>,
        sinks: Arc<Mutex<SinkSet>>,
        clock: Arc<dyn AcceleratedClock>,
        scheduler: HostScheduler,
        instant_of_start: MonotonicTime,
        start: SimTime,
        end: SimTime,
    ) -> Self {
        let shared = Arc::new(Shared {
            tree,
            sinks,
            clock,
            scheduler,
            instant_of_start,
            start,
            end,
            control: Mutex::new(Control {
                running: true,
                pending: None,
                generation: 0,
                failure: None,
            }),
            ended: Condvar::new(),
        });

        {
            let mut control = lock(&shared.control);
            let tree = lock(&shared.tree);
            shared.schedule_next(&mut control, &tree);
        }
        info!(
            start = %start,
            end = %end,
            acceleration_factor = shared.clock.acceleration_factor(),
            "real-time simulation started"
        );

        Self { shared }
    }

    /// Returns `true` until the run has ended.
    pub(crate) fn is_running(&self) -> bool {
        lock(&self.shared.control).running
    }

    /// Returns the simulation time derived from the clock.
    pub(crate) fn current_time(&self) -> SimTime {
        self.shared.sim_time_at(self.shared.clock.current_instant())
    }

    /// Delivers an external event at the simulation time derived from the
    /// clock and performs the corresponding external step.
    ///
    /// A failure of a step ends the run and is returned.
    pub(crate) fn inject_event(&self, event: Event) -> Result<(), SimulationError> {
        let shared = &self.shared;
        let (result, outputs) = {
            let mut control = lock(&shared.control);
            if !control.running {
                return Err(ProtocolError::NoRunInProgress.into());
            }
            let mut tree = lock(&shared.tree);
            if !tree.imports(event.kind()) {
                return Err(ProtocolError::UndeclaredInput {
                    kind: event.kind().clone(),
                }
                .into());
            }
            control.cancel_pending();

            let now = shared.sim_time_at(shared.clock.current_instant());
            let result = if now < shared.end {
                shared.inject_locked(&mut tree, now, &event)
            } else {
                // The end of the run is overdue: the event comes too late.
                shared
                    .catch_up(&mut tree, shared.end)
                    .and(Err(ProtocolError::SimulationEnded.into()))
            };
            match &result {
                Ok(()) => shared.schedule_next(&mut control, &tree),
                Err(SimulationError::Protocol(ProtocolError::SimulationEnded)) => {
                    shared.finish(&mut control, &mut tree, shared.end)
                }
                Err(e) => {
                    error!(error = %e, "external step failed, ending the real-time simulation");
                    let time_of_last_event = tree.root.time_of_last_event();
                    shared.finish(&mut control, &mut tree, time_of_last_event);
                }
            }

            (result, tree.take_outputs())
        };
        shared.dispatch(&outputs);

        result
    }

    /// Cancels the pending step and ends the run at the simulation time
    /// derived from the clock.
    ///
    /// Internal events overdue at that time are executed first. Stopping a
    /// run which has already ended is a no-op.
    pub(crate) fn stop(&self) -> Result<(), SimulationError> {
        let shared = &self.shared;
        let (result, outputs) = {
            let mut control = lock(&shared.control);
            if !control.running {
                return Ok(());
            }
            control.cancel_pending();
            let mut tree = lock(&shared.tree);

            let now = shared.sim_time_at(shared.clock.current_instant());
            let limit = now.min(shared.end);
            let result = shared.catch_up(&mut tree, limit);
            let time_of_last_event = tree.root.time_of_last_event();
            let end_time = if result.is_ok() && limit > time_of_last_event {
                limit
            } else {
                time_of_last_event
            };
            shared.finish(&mut control, &mut tree, end_time);

            (result, tree.take_outputs())
        };
        shared.dispatch(&outputs);

        result
    }

    /// Blocks until the run has ended and returns the error which ended it
    /// prematurely, if any.
    pub(crate) fn join(&self) -> Result<(), SimulationError> {
        let mut control = self.wait_while_running(None);

        match control.failure.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Blocks until the run has ended or the timeout has elapsed and returns
    /// `true` if the run has ended.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        !self.wait_while_running(Some(timeout)).running
    }

    fn wait_while_running(&self, timeout: Option<Duration>) -> MutexGuard<'_, Control> {
        let control = lock(&self.shared.control);
        match timeout {
            Some(timeout) => {
                self.shared
                    .ended
                    .wait_timeout_while(control, timeout, |c| c.running)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => self
                .shared
                .ended
                .wait_while(control, |c| c.running)
                .unwrap_or_else(PoisonError::into_inner),
        }
    }
}

impl Drop for RealTimeSimulator {
    fn drop(&mut self) {
        lock(&self.shared.control).cancel_pending();
    }
}

impl Shared {
    fn sim_time_at(&self, instant: MonotonicTime) -> SimTime {
        if instant <= self.instant_of_start {
            return self.start;
        }
        let elapsed = SimDuration::from_std(
            instant.duration_since(self.instant_of_start),
            self.start.unit(),
        );

        self.start + elapsed
    }

    /// Schedules the timer of the next internal event or of the end of the
    /// run, whichever comes first.
    fn schedule_next(self: &Arc<Self>, control: &mut Control, tree: &EngineTree) {
        let forecast = tree.root.time_of_next_event();
        let target = forecast.min(self.end);
        if target.is_infinite() {
            return;
        }
        let Some(delay) = wall_clock_delay(&*self.clock, self.instant_of_start, self.start, target)
        else {
            warn!(time = %target, "cannot convert the next event time to a wall-clock delay");
            return;
        };

        let shared = Arc::downgrade(self);
        let generation = control.generation;
        control.pending = Some(self.scheduler.schedule_after(delay, move || {
            if let Some(shared) = shared.upgrade() {
                shared.on_timer(generation);
            }
        }));
    }

    fn on_timer(self: &Arc<Self>, generation: u64) {
        let outputs = {
            let mut control = lock(&self.control);
            if !control.running || control.generation != generation {
                return;
            }
            control.pending = None;
            let mut tree = lock(&self.tree);

            if tree.root.time_of_next_event() < self.end {
                match tree.step_internal() {
                    Ok(_) => self.schedule_next(&mut control, &tree),
                    Err(e) => {
                        error!(error = %e, "internal step failed, ending the real-time simulation");
                        let time_of_last_event = tree.root.time_of_last_event();
                        control.failure = Some(e);
                        self.finish(&mut control, &mut tree, time_of_last_event);
                    }
                }
            } else {
                self.finish(&mut control, &mut tree, self.end);
            }

            tree.take_outputs()
        };
        self.dispatch(&outputs);
    }

    /// Executes the internal events forecast strictly before `limit`.
    fn catch_up(&self, tree: &mut EngineTree, limit: SimTime) -> Result<(), SimulationError> {
        loop {
            let forecast = tree.root.time_of_next_event();
            if !(forecast < limit && forecast < self.end) {
                return Ok(());
            }
            warn!(time = %forecast, "executing an overdue internal event");
            tree.step_internal()?;
        }
    }

    fn inject_locked(
        &self,
        tree: &mut EngineTree,
        now: SimTime,
        event: &Event,
    ) -> Result<(), SimulationError> {
        self.catch_up(tree, now)?;
        let current = now.max(tree.root.time_of_last_event());
        tree.inject(&event.clone().with_time(current))?;
        if tree.root.time_of_next_event() == current {
            tree.step_internal()?;
        } else {
            tree.step_external(current)?;
        }

        Ok(())
    }

    fn finish(&self, control: &mut Control, tree: &mut EngineTree, end: SimTime) {
        if tree.root.is_running() {
            if let Err(e) = tree.root.end_simulation(end) {
                error!(error = %e, "failed to end the simulation");
                control.failure.get_or_insert(e);
            }
        }
        control.cancel_pending();
        control.running = false;
        self.ended.notify_all();
        info!(end = %end, "real-time simulation ended");
    }

    fn dispatch(&self, outputs: &[Event]) {
        if !outputs.is_empty() {
            lock(&self.sinks).dispatch(outputs);
        }
    }
}
