//! Resolution of routing declarations into an influence graph.

use std::collections::HashMap;

use crate::event::{Event, EventKind, EventPriority};
use crate::model::ModelUri;

use super::{Architecture, ConfigurationError, ModelEntry, Translation};

/// Final destination of a resolved route.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkTarget {
    /// An atomic model.
    Model(ModelUri),
    /// The boundary of the root model.
    Output,
}

/// An atomic destination of an exported event, with all the relabellings
/// and translations met along the route already composed.
#[derive(Clone, Debug)]
pub struct ResolvedSink {
    target: SinkTarget,
    kind: EventKind,
    priority: EventPriority,
    translations: Vec<Translation>,
}

impl ResolvedSink {
    /// Returns the destination.
    pub fn target(&self) -> &SinkTarget {
        &self.target
    }

    /// Returns the kind under which the event is delivered.
    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// Returns the tie-break priority of delivered events.
    pub fn priority(&self) -> EventPriority {
        self.priority
    }

    /// Returns the event as delivered to the destination.
    pub fn deliver(&self, event: &Event) -> Event {
        let event = self
            .translations
            .iter()
            .fold(event.clone(), |event, translation| translation.apply(event));

        event
            .with_kind(self.kind.clone())
            .with_priority(self.priority)
    }
}

/// Resolved routing table of a model tree.
///
/// For each event kind exported by an atomic model, the graph lists the
/// atomic models which import it, possibly through several coupled models.
/// Events delivered at the boundary of the root model, as well as events
/// injected into it, are resolved the same way.
///
/// The graph is built once when the architecture is validated and is closed
/// afterwards: any change of composition requires a new
/// [`Architecture`](super::Architecture).
#[derive(Clone, Debug, Default)]
pub struct InfluenceGraph {
    influencees: HashMap<ModelUri, HashMap<EventKind, Vec<ResolvedSink>>>,
    inputs: HashMap<EventKind, Vec<ResolvedSink>>,
    closed: bool,
}

impl InfluenceGraph {
    /// Creates an empty, open graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends destinations for the events of kind `kind` exported by `uri`.
    pub fn add_influencees(
        &mut self,
        uri: ModelUri,
        kind: EventKind,
        sinks: impl IntoIterator<Item = ResolvedSink>,
    ) -> Result<(), ConfigurationError> {
        if self.closed {
            return Err(ConfigurationError::CompositionClosed);
        }
        self.influencees
            .entry(uri)
            .or_default()
            .entry(kind)
            .or_default()
            .extend(sinks);

        Ok(())
    }

    /// Returns the destinations of the events of kind `kind` exported by
    /// `uri`.
    pub fn get_influencees(&self, uri: &str, kind: &str) -> &[ResolvedSink] {
        self.influencees
            .get(uri)
            .and_then(|kinds| kinds.get(kind))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Returns the destinations of the events of kind `kind` injected into
    /// the root model.
    pub fn get_inputs(&self, kind: &str) -> &[ResolvedSink] {
        self.inputs
            .get(kind)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Forbids further modifications.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Returns `true` if the graph has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn add_inputs(
        &mut self,
        kind: EventKind,
        sinks: Vec<ResolvedSink>,
    ) -> Result<(), ConfigurationError> {
        if self.closed {
            return Err(ConfigurationError::CompositionClosed);
        }
        self.inputs.entry(kind).or_default().extend(sinks);

        Ok(())
    }
}

/// Builds and closes the influence graph of a validated architecture.
pub(super) fn resolve(architecture: &Architecture) -> Result<InfluenceGraph, ConfigurationError> {
    let mut graph = InfluenceGraph::new();

    for (uri, entry) in &architecture.models {
        if let ModelEntry::Atomic(d) = entry {
            for kind in d.exported() {
                let mut sinks = Vec::new();
                resolve_outgoing(architecture, uri, kind, Vec::new(), &mut sinks);
                graph.add_influencees(uri.clone(), kind.clone(), sinks)?;
            }
        }
    }

    let root = architecture.root();
    if let Some(entry) = architecture.entry(root.as_str()) {
        for kind in entry.imported() {
            let mut sinks = Vec::new();
            resolve_incoming(architecture, root, &kind, Vec::new(), true, &mut sinks);
            graph.add_inputs(kind, sinks)?;
        }
    }

    graph.close();

    Ok(graph)
}

/// Follows an event exported by `uri` up the tree until it reaches either
/// peers or the boundary of the root model.
fn resolve_outgoing(
    architecture: &Architecture,
    uri: &ModelUri,
    kind: &EventKind,
    translations: Vec<Translation>,
    out: &mut Vec<ResolvedSink>,
) {
    let Some(parent) = architecture.parent(uri.as_str()) else {
        out.push(ResolvedSink {
            target: SinkTarget::Output,
            kind: kind.clone(),
            priority: EventPriority::External,
            translations,
        });
        return;
    };
    let Some(ModelEntry::Coupled(coupled)) = architecture.entry(parent.as_str()) else {
        return;
    };

    for entry in coupled.routing() {
        if entry.source.0 != *uri || entry.source.1 != *kind {
            continue;
        }
        for sink in &entry.sinks {
            let mut translations = translations.clone();
            translations.extend(sink.translation.clone());
            resolve_incoming(architecture, &sink.uri, &sink.kind, translations, false, out);
        }
    }
    for reexport in coupled.reexports_of(uri, kind) {
        let mut translations = translations.clone();
        translations.extend(reexport.translation.clone());
        resolve_outgoing(architecture, &coupled.uri, &reexport.kind, translations, out);
    }
}

/// Follows an event imported by `uri` down the tree to atomic models.
fn resolve_incoming(
    architecture: &Architecture,
    uri: &ModelUri,
    kind: &EventKind,
    translations: Vec<Translation>,
    crossed_boundary: bool,
    out: &mut Vec<ResolvedSink>,
) {
    match architecture.entry(uri.as_str()) {
        Some(ModelEntry::Atomic(_)) => out.push(ResolvedSink {
            target: SinkTarget::Model(uri.clone()),
            kind: kind.clone(),
            priority: if crossed_boundary {
                EventPriority::External
            } else {
                EventPriority::Internal
            },
            translations,
        }),
        Some(ModelEntry::Coupled(coupled)) => {
            for sink in coupled.import_sinks(kind) {
                let mut translations = translations.clone();
                translations.extend(sink.translation.clone());
                resolve_incoming(architecture, &sink.uri, &sink.kind, translations, true, out);
            }
        }
        None => {}
    }
}
