//! Instantiation of the engine tree of an architecture.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::architecture::{Architecture, ConfigurationError, ModelEntry, ResolvedSink, SinkTarget};
use crate::event::{Event, EventKind, Inbox};
use crate::model::{ModelUri, Variables};
use crate::time::{SimDuration, SimTime};

use super::activity::{ActivityBoard, ActivityNotifier};
use super::sink::Outbox;
use super::{Coordinator, DevsEngine, ProtocolError, SimulationError, Simulator};

/// A resolved route bound to the inbox of its destination.
pub(crate) struct Delivery {
    sink: ResolvedSink,
    target: DeliveryTarget,
}

enum DeliveryTarget {
    Inbox {
        inbox: Inbox,
        notifier: ActivityNotifier,
    },
    Output(Outbox),
}

impl Delivery {
    pub(crate) fn deliver(&self, event: &Event) {
        let event = self.sink.deliver(event);
        match &self.target {
            DeliveryTarget::Inbox { inbox, notifier } => {
                inbox.push(event);
                notifier.has_received_external_events();
            }
            DeliveryTarget::Output(outbox) => outbox.push(event),
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("target", self.sink.target())
            .field("kind", self.sink.kind())
            .finish_non_exhaustive()
    }
}

/// The engines of a whole model tree.
pub(crate) struct EngineTree {
    pub(crate) root: Box<dyn DevsEngine>,
    inputs: HashMap<EventKind, Vec<Delivery>>,
    outbox: Outbox,
    variables: Variables,
}

impl EngineTree {
    /// Instantiates the simulators and coordinators of an architecture and
    /// binds the resolved routes to the inboxes of the simulators.
    pub(crate) fn assemble(architecture: &Architecture) -> Self {
        let mut builder = Builder {
            architecture,
            inboxes: HashMap::new(),
            boards: HashMap::new(),
            outbox: Outbox::new(),
        };
        let root_uri = architecture.root().clone();
        builder.collect(&root_uri, Vec::new());
        let root = builder.build(&root_uri);

        let mut inputs = HashMap::new();
        if let Some(descriptor) = architecture.descriptor(root_uri.as_str()) {
            for kind in descriptor.imported {
                let deliveries = builder.bind(architecture.influence_graph().get_inputs(kind.as_str()));
                inputs.insert(kind, deliveries);
            }
        }

        Self {
            root,
            inputs,
            outbox: builder.outbox,
            variables: Variables::new(),
        }
    }

    /// Buffers an event injected into the root model.
    pub(crate) fn inject(&self, event: &Event) -> Result<(), ProtocolError> {
        let deliveries = self
            .inputs
            .get(event.kind())
            .ok_or_else(|| ProtocolError::UndeclaredInput {
                kind: event.kind().clone(),
            })?;
        for delivery in deliveries {
            delivery.deliver(event);
        }

        Ok(())
    }

    /// Returns `true` if the root model imports events of this kind.
    pub(crate) fn imports(&self, kind: &EventKind) -> bool {
        self.inputs.contains_key(kind)
    }

    /// Takes the events delivered at the boundary of the root model.
    pub(crate) fn take_outputs(&self) -> Vec<Event> {
        self.outbox.take()
    }

    /// Initialises the whole tree, including the exported variables.
    ///
    /// The forecasts are computed anew once the variables are resolved since
    /// time advances may depend on them.
    pub(crate) fn initialise(
        &mut self,
        start: SimTime,
        duration: SimDuration,
    ) -> Result<(), SimulationError> {
        self.root.initialise_simulation(start, duration)?;
        let result = initialise_variables(self.root.as_mut())
            .map_err(SimulationError::from)
            .and_then(|variables| {
                self.variables = variables;
                self.root.refresh_forecast()
            });
        if result.is_err() {
            self.root.reinitialise();
            self.variables = Variables::new();
        }

        result
    }

    /// Returns the exported variables resolved at initialisation.
    pub(crate) fn variables(&self) -> &Variables {
        &self.variables
    }

    /// Performs an internal step of the root at its forecast time, followed
    /// by an external step if input injected for that time is still pending.
    pub(crate) fn step_internal(&mut self) -> Result<SimTime, SimulationError> {
        let current = self.root.time_of_next_event();
        self.root.produce_output(current)?;
        self.root.internal_event_step()?;
        self.step_external(current)?;

        Ok(current)
    }

    /// Performs an external step of the root at the specified time if input
    /// is buffered.
    pub(crate) fn step_external(&mut self, current: SimTime) -> Result<(), SimulationError> {
        if self.root.time_of_pending_input().is_none() {
            return Ok(());
        }
        let elapsed = current.checked_duration_since(self.root.time_of_last_event())?;
        self.root.external_event_step(elapsed)
    }
}

impl fmt::Debug for EngineTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineTree")
            .field("root", self.root.uri())
            .finish_non_exhaustive()
    }
}

/// Runs initialisation passes until all exported variables are initialised.
///
/// A pass which leaves variables pending without initialising any denotes a
/// dependency cycle.
pub(crate) fn initialise_variables(
    root: &mut dyn DevsEngine,
) -> Result<Variables, ConfigurationError> {
    let mut variables = Variables::new();
    if !root.use_fixpoint_initialise_variables() {
        return Ok(variables);
    }

    let mut pass = 0;
    loop {
        let progress = root.fixpoint_initialise_variables(&mut variables);
        pass += 1;
        debug!(
            pass,
            newly_initialised = progress.newly_initialised,
            still_pending = progress.still_pending,
            "variable initialisation pass"
        );
        if progress.is_complete() {
            return Ok(variables);
        }
        if progress.is_stalled() {
            return Err(ConfigurationError::CyclicVariableDependency {
                pending: progress.still_pending,
            });
        }
    }
}

struct Builder<'a> {
    architecture: &'a Architecture,
    inboxes: HashMap<ModelUri, (Inbox, ActivityNotifier)>,
    boards: HashMap<ModelUri, (ActivityBoard, ActivityNotifier)>,
    outbox: Outbox,
}

impl Builder<'_> {
    /// Creates the inboxes, boards and notifiers of the subtree rooted at
    /// `uri`, `chain` being the notification chain of `uri`.
    fn collect(&mut self, uri: &ModelUri, chain: Vec<(ActivityBoard, ModelUri)>) {
        match self.architecture.entry(uri.as_str()) {
            Some(ModelEntry::Atomic(_)) => {
                self.inboxes
                    .insert(uri.clone(), (Inbox::new(), ActivityNotifier::new(chain)));
            }
            Some(ModelEntry::Coupled(d)) => {
                let board = ActivityBoard::new();
                for child in d.submodels() {
                    let mut child_chain = vec![(board.clone(), child.clone())];
                    child_chain.extend(chain.iter().cloned());
                    self.collect(child, child_chain);
                }
                self.boards
                    .insert(uri.clone(), (board, ActivityNotifier::new(chain)));
            }
            None => {}
        }
    }

    fn bind(&self, sinks: &[ResolvedSink]) -> Vec<Delivery> {
        sinks
            .iter()
            .filter_map(|sink| {
                let target = match sink.target() {
                    SinkTarget::Model(uri) => {
                        let (inbox, notifier) = self.inboxes.get(uri)?;
                        DeliveryTarget::Inbox {
                            inbox: inbox.clone(),
                            notifier: notifier.clone(),
                        }
                    }
                    SinkTarget::Output => DeliveryTarget::Output(self.outbox.clone()),
                };

                Some(Delivery {
                    sink: sink.clone(),
                    target,
                })
            })
            .collect()
    }

    fn build(&self, uri: &ModelUri) -> Box<dyn DevsEngine> {
        let unit = self.architecture.time_unit();
        match self.architecture.entry(uri.as_str()) {
            Some(ModelEntry::Atomic(d)) => {
                let graph = self.architecture.influence_graph();
                let routes = d
                    .exported()
                    .iter()
                    .map(|kind| {
                        let sinks = graph.get_influencees(uri.as_str(), kind.as_str());
                        (kind.clone(), self.bind(sinks))
                    })
                    .collect();
                let (inbox, notifier) = self
                    .inboxes
                    .get(uri)
                    .cloned()
                    .unwrap_or_default();

                Box::new(Simulator::with_routes(d, inbox, notifier, routes))
            }
            Some(ModelEntry::Coupled(d)) => {
                let children = d.submodels().iter().map(|c| self.build(c)).collect();
                let (board, notifier) = self.boards.get(uri).cloned().unwrap_or_default();

                Box::new(Coordinator::new(uri.clone(), unit, children, board, notifier))
            }
            // Every URI of a validated architecture is declared.
            None => Box::new(Coordinator::new(
                uri.clone(),
                unit,
                Vec::new(),
                ActivityBoard::new(),
                ActivityNotifier::default(),
            )),
        }
    }
}
