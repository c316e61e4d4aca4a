//! Architecture descriptors.
//!
//! An [`Architecture`] describes once and for all the models taking part in a
//! simulation run and the way their events are routed. It is assembled with
//! an [`ArchitectureBuilder`] from:
//!
//! * [`AtomicDescriptor`]s, which carry a factory for the model, its time unit,
//!   its imported and exported event kinds and an optional acceleration
//!   factor for real-time runs,
//! * [`CoupledDescriptor`]s, which list their submodels and declare how
//!   events are routed between them, how the events imported by the coupled
//!   model are relabelled for its submodels and how the events exported by
//!   its submodels are re-exported.
//!
//! All structural checks are performed by
//! [`ArchitectureBuilder::build()`], so that no malformed architecture can
//! ever reach a simulator. On success, the routing declarations are resolved
//! into an [`InfluenceGraph`] which maps each event exported by an atomic
//! model directly to the atomic models that import it.
//!
//! # Examples
//!
//! A sensor wired to a display within a coupled model, the readings of the
//! display being re-exported at the boundary of the root.
//!
//! ```
//! use devsim::architecture::{
//!     ArchitectureBuilder, AtomicDescriptor, CoupledDescriptor, Sink,
//! };
//! # use devsim::event::Event;
//! # use devsim::model::{AtomicModel, ModelError};
//! # use devsim::time::{SimDuration, SimTime, TimeUnit};
//! # struct Idle;
//! # impl AtomicModel for Idle {
//! #     fn time_advance(&self) -> SimDuration { SimDuration::infinity(TimeUnit::Seconds) }
//! #     fn output(&mut self, _: SimTime) -> Result<Vec<Event>, ModelError> { Ok(Vec::new()) }
//! #     fn internal_transition(&mut self, _: SimTime) -> Result<(), ModelError> { Ok(()) }
//! #     fn external_transition(&mut self, _: SimTime, _: SimDuration, _: Vec<Event>) -> Result<(), ModelError> { Ok(()) }
//! # }
//!
//! let architecture = ArchitectureBuilder::new("bench", TimeUnit::Seconds)
//!     .atomic(AtomicDescriptor::new("sensor", TimeUnit::Seconds, || Idle).exports("reading"))
//!     .atomic(
//!         AtomicDescriptor::new("display", TimeUnit::Seconds, || Idle)
//!             .imports("value")
//!             .exports("shown"),
//!     )
//!     .coupled(
//!         CoupledDescriptor::new("bench")
//!             .submodel("sensor")
//!             .submodel("display")
//!             .route("sensor", "reading", Sink::new("display", "value"))
//!             .reexport("display", "shown", "display_output"),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let sinks = architecture.influence_graph().get_influencees("sensor", "reading");
//! assert_eq!(sinks.len(), 1);
//! ```

mod routing;

pub use routing::{InfluenceGraph, ResolvedSink, SinkTarget};

use std::collections::{BTreeSet, HashMap, HashSet};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use crate::event::{Event, EventKind};
use crate::model::{AtomicModel, ModelDescriptor, ModelKind, ModelUri};
use crate::time::TimeUnit;

/// Factory of atomic models.
///
/// A factory is invoked once when the engine tree is built and once again
/// each time the simulator of the model is reinitialised.
pub type ModelFactory = Arc<dyn Fn() -> Box<dyn AtomicModel> + Send + Sync + 'static>;

/// Payload transformation applied to an event along a route.
///
/// The kind of the delivered event is always the one declared by the sink;
/// a translation is only needed when the payload itself must be converted.
#[derive(Clone)]
pub struct Translation(Arc<dyn Fn(Event) -> Event + Send + Sync + 'static>);

impl Translation {
    /// Creates a translation from a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Event) -> Event + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Applies the translation.
    pub fn apply(&self, event: Event) -> Event {
        (self.0)(event)
    }
}

impl fmt::Debug for Translation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Translation")
    }
}

/// Destination of a route.
#[derive(Clone, Debug)]
pub struct Sink {
    uri: ModelUri,
    kind: EventKind,
    translation: Option<Translation>,
}

impl Sink {
    /// Creates a sink delivering events of the specified kind to a model.
    pub fn new(uri: impl Into<ModelUri>, kind: impl Into<EventKind>) -> Self {
        Self {
            uri: uri.into(),
            kind: kind.into(),
            translation: None,
        }
    }

    /// Sets a payload transformation applied before delivery.
    pub fn with_translation<F>(mut self, f: F) -> Self
    where
        F: Fn(Event) -> Event + Send + Sync + 'static,
    {
        self.translation = Some(Translation::new(f));
        self
    }

    /// Returns the URI of the destination model.
    pub fn uri(&self) -> &ModelUri {
        &self.uri
    }

    /// Returns the kind under which the event is delivered.
    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// Returns the payload transformation, if any.
    pub fn translation(&self) -> Option<&Translation> {
        self.translation.as_ref()
    }
}

/// A routing table entry between peers of a coupled model.
#[derive(Clone, Debug)]
pub struct RoutingEntry {
    /// Emitting submodel and exported kind.
    pub source: (ModelUri, EventKind),
    /// Receiving submodels.
    pub sinks: Vec<Sink>,
}

/// Declaration of an event exported by a submodel and re-exported by the
/// coupled model under its own kind.
#[derive(Clone, Debug)]
pub(crate) struct Reexport {
    pub(crate) source: (ModelUri, EventKind),
    pub(crate) kind: EventKind,
    pub(crate) translation: Option<Translation>,
}

/// Descriptor of an atomic model.
#[derive(Clone)]
pub struct AtomicDescriptor {
    uri: ModelUri,
    unit: TimeUnit,
    factory: ModelFactory,
    imported: BTreeSet<EventKind>,
    exported: BTreeSet<EventKind>,
    acceleration_factor: Option<f64>,
}

impl AtomicDescriptor {
    /// Creates a descriptor for the models built by `factory`.
    pub fn new<M, F>(uri: impl Into<ModelUri>, unit: TimeUnit, factory: F) -> Self
    where
        M: AtomicModel,
        F: Fn() -> M + Send + Sync + 'static,
    {
        Self {
            uri: uri.into(),
            unit,
            factory: Arc::new(move || Box::new(factory()) as Box<dyn AtomicModel>),
            imported: BTreeSet::new(),
            exported: BTreeSet::new(),
            acceleration_factor: None,
        }
    }

    /// Declares an imported event kind.
    pub fn imports(mut self, kind: impl Into<EventKind>) -> Self {
        self.imported.insert(kind.into());
        self
    }

    /// Declares an exported event kind.
    pub fn exports(mut self, kind: impl Into<EventKind>) -> Self {
        self.exported.insert(kind.into());
        self
    }

    /// Sets the acceleration factor used by real-time runs.
    pub fn with_acceleration_factor(mut self, factor: f64) -> Self {
        self.acceleration_factor = Some(factor);
        self
    }

    /// Returns the URI of the model.
    pub fn uri(&self) -> &ModelUri {
        &self.uri
    }

    /// Returns the time unit of the model.
    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    /// Returns the acceleration factor, if any.
    pub fn acceleration_factor(&self) -> Option<f64> {
        self.acceleration_factor
    }

    pub(crate) fn factory(&self) -> &ModelFactory {
        &self.factory
    }

    pub(crate) fn imported(&self) -> &BTreeSet<EventKind> {
        &self.imported
    }

    pub(crate) fn exported(&self) -> &BTreeSet<EventKind> {
        &self.exported
    }
}

impl fmt::Debug for AtomicDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicDescriptor")
            .field("uri", &self.uri)
            .field("unit", &self.unit)
            .field("imported", &self.imported)
            .field("exported", &self.exported)
            .field("acceleration_factor", &self.acceleration_factor)
            .finish_non_exhaustive()
    }
}

/// Descriptor of a coupled model.
#[derive(Clone, Debug)]
pub struct CoupledDescriptor {
    uri: ModelUri,
    submodels: Vec<ModelUri>,
    imports: Vec<(EventKind, Sink)>,
    reexports: Vec<Reexport>,
    routing: Vec<RoutingEntry>,
}

impl CoupledDescriptor {
    /// Creates an empty coupled model descriptor.
    pub fn new(uri: impl Into<ModelUri>) -> Self {
        Self {
            uri: uri.into(),
            submodels: Vec::new(),
            imports: Vec::new(),
            reexports: Vec::new(),
            routing: Vec::new(),
        }
    }

    /// Adds a submodel.
    ///
    /// Submodels are stepped in declaration order when they are imminent
    /// simultaneously.
    pub fn submodel(mut self, uri: impl Into<ModelUri>) -> Self {
        self.submodels.push(uri.into());
        self
    }

    /// Declares an imported event kind and relabels it for a submodel.
    ///
    /// This may be called several times with the same kind to reach several
    /// submodels.
    pub fn imports(mut self, kind: impl Into<EventKind>, sink: Sink) -> Self {
        self.imports.push((kind.into(), sink));
        self
    }

    /// Re-exports under `kind` the events of kind `child_kind` exported by
    /// submodel `child`.
    pub fn reexport(
        self,
        child: impl Into<ModelUri>,
        child_kind: impl Into<EventKind>,
        kind: impl Into<EventKind>,
    ) -> Self {
        self.push_reexport(child.into(), child_kind.into(), kind.into(), None)
    }

    /// Re-exports events of a submodel, transforming their payload.
    pub fn reexport_with<F>(
        self,
        child: impl Into<ModelUri>,
        child_kind: impl Into<EventKind>,
        kind: impl Into<EventKind>,
        translation: F,
    ) -> Self
    where
        F: Fn(Event) -> Event + Send + Sync + 'static,
    {
        self.push_reexport(
            child.into(),
            child_kind.into(),
            kind.into(),
            Some(Translation::new(translation)),
        )
    }

    /// Routes the events of kind `kind` exported by submodel `source` to a
    /// peer submodel.
    pub fn route(
        mut self,
        source: impl Into<ModelUri>,
        kind: impl Into<EventKind>,
        sink: Sink,
    ) -> Self {
        let source = (source.into(), kind.into());
        match self.routing.iter_mut().find(|entry| entry.source == source) {
            Some(entry) => entry.sinks.push(sink),
            None => self.routing.push(RoutingEntry {
                source,
                sinks: vec![sink],
            }),
        }

        self
    }

    /// Returns the URI of the model.
    pub fn uri(&self) -> &ModelUri {
        &self.uri
    }

    /// Returns the submodels in declaration order.
    pub fn submodels(&self) -> &[ModelUri] {
        &self.submodels
    }

    /// Returns the routing table.
    pub fn routing(&self) -> &[RoutingEntry] {
        &self.routing
    }

    pub(crate) fn import_sinks<'a>(&'a self, kind: &'a EventKind) -> impl Iterator<Item = &'a Sink> {
        self.imports
            .iter()
            .filter(move |(k, _)| k == kind)
            .map(|(_, sink)| sink)
    }

    /// Returns the re-exports of the events of kind `kind` exported by the
    /// child `uri`.
    pub(crate) fn reexports_of<'a>(
        &'a self,
        uri: &'a ModelUri,
        kind: &'a EventKind,
    ) -> impl Iterator<Item = &'a Reexport> {
        self.reexports
            .iter()
            .filter(move |r| r.source.0 == *uri && r.source.1 == *kind)
    }

    fn imported(&self) -> BTreeSet<EventKind> {
        self.imports.iter().map(|(kind, _)| kind.clone()).collect()
    }

    fn exported(&self) -> BTreeSet<EventKind> {
        self.reexports.iter().map(|r| r.kind.clone()).collect()
    }

    fn push_reexport(
        mut self,
        child: ModelUri,
        child_kind: EventKind,
        kind: EventKind,
        translation: Option<Translation>,
    ) -> Self {
        self.reexports.push(Reexport {
            source: (child, child_kind),
            kind,
            translation,
        });
        self
    }
}

#[derive(Clone, Debug)]
pub(crate) enum ModelEntry {
    Atomic(AtomicDescriptor),
    Coupled(CoupledDescriptor),
}

impl ModelEntry {
    fn uri(&self) -> &ModelUri {
        match self {
            Self::Atomic(d) => &d.uri,
            Self::Coupled(d) => &d.uri,
        }
    }

    fn imported(&self) -> BTreeSet<EventKind> {
        match self {
            Self::Atomic(d) => d.imported.clone(),
            Self::Coupled(d) => d.imported(),
        }
    }

    fn exported(&self) -> BTreeSet<EventKind> {
        match self {
            Self::Atomic(d) => d.exported.clone(),
            Self::Coupled(d) => d.exported(),
        }
    }
}

/// Builder for an [`Architecture`].
#[derive(Debug)]
pub struct ArchitectureBuilder {
    root: ModelUri,
    time_unit: TimeUnit,
    entries: Vec<ModelEntry>,
}

impl ArchitectureBuilder {
    /// Creates a builder for an architecture rooted at `root`, whose models
    /// all use the specified time unit.
    pub fn new(root: impl Into<ModelUri>, time_unit: TimeUnit) -> Self {
        Self {
            root: root.into(),
            time_unit,
            entries: Vec::new(),
        }
    }

    /// Adds an atomic model.
    pub fn atomic(mut self, descriptor: AtomicDescriptor) -> Self {
        self.entries.push(ModelEntry::Atomic(descriptor));
        self
    }

    /// Adds a coupled model.
    pub fn coupled(mut self, descriptor: CoupledDescriptor) -> Self {
        self.entries.push(ModelEntry::Coupled(descriptor));
        self
    }

    /// Validates the descriptors and resolves the routing.
    pub fn build(self) -> Result<Architecture, ConfigurationError> {
        let mut models = HashMap::new();
        for entry in self.entries {
            let uri = entry.uri().clone();
            if models.insert(uri.clone(), entry).is_some() {
                return Err(ConfigurationError::DuplicateUri(uri));
            }
        }
        if !models.contains_key(&self.root) {
            return Err(ConfigurationError::UnknownRoot(self.root));
        }

        let parents = check_tree(&self.root, &models)?;
        let mut acceleration_factor = None;
        for entry in models.values() {
            check_interface(entry)?;
            match entry {
                ModelEntry::Atomic(d) => {
                    if d.unit != self.time_unit {
                        return Err(ConfigurationError::UnitMismatch {
                            uri: d.uri.clone(),
                            expected: self.time_unit,
                            found: d.unit,
                        });
                    }
                    if let Some(factor) = d.acceleration_factor {
                        if !(factor.is_finite() && factor > 0.0) {
                            return Err(ConfigurationError::InvalidAccelerationFactor {
                                uri: d.uri.clone(),
                                factor,
                            });
                        }
                        match acceleration_factor {
                            None => acceleration_factor = Some(factor),
                            Some(global) if global != factor => {
                                return Err(ConfigurationError::ConflictingAccelerationFactors {
                                    uri: d.uri.clone(),
                                    expected: global,
                                    found: factor,
                                })
                            }
                            Some(_) => {}
                        }
                    }
                }
                ModelEntry::Coupled(d) => check_coupled(d, &models)?,
            }
        }

        let mut architecture = Architecture {
            root: self.root,
            time_unit: self.time_unit,
            acceleration_factor,
            models,
            parents,
            graph: InfluenceGraph::new(),
        };
        architecture.graph = routing::resolve(&architecture)?;

        Ok(architecture)
    }
}

/// A validated model tree with its resolved routing.
#[derive(Clone, Debug)]
pub struct Architecture {
    root: ModelUri,
    time_unit: TimeUnit,
    acceleration_factor: Option<f64>,
    models: HashMap<ModelUri, ModelEntry>,
    parents: HashMap<ModelUri, ModelUri>,
    graph: InfluenceGraph,
}

impl Architecture {
    /// Returns the URI of the root model.
    pub fn root(&self) -> &ModelUri {
        &self.root
    }

    /// Returns the global time unit.
    pub fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }

    /// Returns the acceleration factor shared by the atomic models that
    /// declare one.
    pub fn acceleration_factor(&self) -> Option<f64> {
        self.acceleration_factor
    }

    /// Returns the descriptor of a model.
    pub fn descriptor(&self, uri: &str) -> Option<ModelDescriptor> {
        let entry = self.models.get(uri)?;

        Some(ModelDescriptor {
            uri: entry.uri().clone(),
            kind: match entry {
                ModelEntry::Atomic(_) => ModelKind::Atomic,
                ModelEntry::Coupled(_) => ModelKind::Coupled,
            },
            imported: entry.imported(),
            exported: entry.exported(),
        })
    }

    /// Returns the parent of a model, or `None` for the root.
    pub fn parent(&self, uri: &str) -> Option<&ModelUri> {
        self.parents.get(uri)
    }

    /// Returns the number of models.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Returns `true` if the architecture contains no models.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Returns the resolved routing.
    pub fn influence_graph(&self) -> &InfluenceGraph {
        &self.graph
    }

    pub(crate) fn entry(&self, uri: &str) -> Option<&ModelEntry> {
        self.models.get(uri)
    }
}

/// Checks that the coupled models form a tree containing every model and
/// returns the parent of each non-root model.
fn check_tree(
    root: &ModelUri,
    models: &HashMap<ModelUri, ModelEntry>,
) -> Result<HashMap<ModelUri, ModelUri>, ConfigurationError> {
    let mut parents = HashMap::new();
    for entry in models.values() {
        if let ModelEntry::Coupled(d) = entry {
            for child in &d.submodels {
                if !models.contains_key(child) {
                    return Err(ConfigurationError::DanglingUri {
                        referenced_by: d.uri.clone(),
                        uri: child.clone(),
                    });
                }
                if child == root {
                    return Err(ConfigurationError::RootIsSubmodel(root.clone()));
                }
                if parents.insert(child.clone(), d.uri.clone()).is_some() {
                    return Err(ConfigurationError::MultipleParents(child.clone()));
                }
            }
        }
    }

    let mut reachable = HashSet::new();
    let mut stack = vec![root];
    while let Some(uri) = stack.pop() {
        reachable.insert(uri.clone());
        if let Some(ModelEntry::Coupled(d)) = models.get(uri) {
            stack.extend(d.submodels.iter());
        }
    }
    let mut unreachable: Vec<_> = models.keys().filter(|u| !reachable.contains(*u)).collect();
    unreachable.sort();
    if let Some(uri) = unreachable.first() {
        return Err(ConfigurationError::UnreachableModel((*uri).clone()));
    }

    Ok(parents)
}

fn check_interface(entry: &ModelEntry) -> Result<(), ConfigurationError> {
    let imported = entry.imported();
    let exported = entry.exported();
    if let Some(kind) = imported.intersection(&exported).next() {
        return Err(ConfigurationError::OverlappingKinds {
            uri: entry.uri().clone(),
            kind: kind.clone(),
        });
    }

    Ok(())
}

fn check_coupled(
    d: &CoupledDescriptor,
    models: &HashMap<ModelUri, ModelEntry>,
) -> Result<(), ConfigurationError> {
    let submodel = |uri: &ModelUri| -> Result<&ModelEntry, ConfigurationError> {
        if !d.submodels.contains(uri) {
            return Err(ConfigurationError::DanglingUri {
                referenced_by: d.uri.clone(),
                uri: uri.clone(),
            });
        }
        models
            .get(uri)
            .ok_or_else(|| ConfigurationError::DanglingUri {
                referenced_by: d.uri.clone(),
                uri: uri.clone(),
            })
    };
    let check_exported = |uri: &ModelUri, kind: &EventKind| -> Result<(), ConfigurationError> {
        if submodel(uri)?.exported().contains(kind) {
            Ok(())
        } else {
            Err(ConfigurationError::NotExported {
                uri: uri.clone(),
                kind: kind.clone(),
            })
        }
    };
    let check_imported = |sink: &Sink| -> Result<(), ConfigurationError> {
        if submodel(&sink.uri)?.imported().contains(&sink.kind) {
            Ok(())
        } else {
            Err(ConfigurationError::NotImported {
                uri: sink.uri.clone(),
                kind: sink.kind.clone(),
            })
        }
    };

    for (_, sink) in &d.imports {
        check_imported(sink)?;
    }
    for reexport in &d.reexports {
        check_exported(&reexport.source.0, &reexport.source.1)?;
    }
    for entry in &d.routing {
        check_exported(&entry.source.0, &entry.source.1)?;
        for sink in &entry.sinks {
            check_imported(sink)?;
        }
    }

    Ok(())
}

/// Error returned when an architecture or a run configuration is malformed.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigurationError {
    /// Two models share the same URI.
    DuplicateUri(ModelUri),
    /// The root URI does not designate any model.
    UnknownRoot(ModelUri),
    /// A coupled model references a model which is not among its submodels
    /// or does not exist.
    DanglingUri {
        /// The referencing coupled model.
        referenced_by: ModelUri,
        /// The missing model.
        uri: ModelUri,
    },
    /// A model is the submodel of several coupled models.
    MultipleParents(ModelUri),
    /// The root model is declared as a submodel.
    RootIsSubmodel(ModelUri),
    /// A model cannot be reached from the root.
    UnreachableModel(ModelUri),
    /// A kind is both imported and exported by the same model.
    OverlappingKinds {
        /// The model.
        uri: ModelUri,
        /// The offending kind.
        kind: EventKind,
    },
    /// A route or re-export originates from a kind the source does not
    /// export.
    NotExported {
        /// The source model.
        uri: ModelUri,
        /// The undeclared kind.
        kind: EventKind,
    },
    /// A route or import targets a kind the sink does not import.
    NotImported {
        /// The sink model.
        uri: ModelUri,
        /// The undeclared kind.
        kind: EventKind,
    },
    /// The time unit of an atomic model differs from the global time unit.
    UnitMismatch {
        /// The model.
        uri: ModelUri,
        /// The global unit.
        expected: TimeUnit,
        /// The unit of the model.
        found: TimeUnit,
    },
    /// An acceleration factor is not finite and strictly positive.
    InvalidAccelerationFactor {
        /// The model.
        uri: ModelUri,
        /// The invalid factor.
        factor: f64,
    },
    /// Two atomic models declare different acceleration factors.
    ConflictingAccelerationFactors {
        /// The model declaring the second factor.
        uri: ModelUri,
        /// The factor declared first.
        expected: f64,
        /// The conflicting factor.
        found: f64,
    },
    /// A real-time run was requested but no acceleration factor is known.
    MissingAccelerationFactor,
    /// The influence graph was modified after it was closed.
    CompositionClosed,
    /// The exported variables cannot be initialised because their
    /// dependencies form a cycle.
    CyclicVariableDependency {
        /// Number of variables left uninitialised.
        pending: usize,
    },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateUri(uri) => write!(fmt, "duplicate model URI '{uri}'"),
            Self::UnknownRoot(uri) => write!(fmt, "the root model '{uri}' is not declared"),
            Self::DanglingUri { referenced_by, uri } => write!(
                fmt,
                "coupled model '{referenced_by}' references '{uri}', which is not one of its submodels"
            ),
            Self::MultipleParents(uri) => {
                write!(fmt, "model '{uri}' is a submodel of several coupled models")
            }
            Self::RootIsSubmodel(uri) => write!(fmt, "the root model '{uri}' is declared as a submodel"),
            Self::UnreachableModel(uri) => {
                write!(fmt, "model '{uri}' cannot be reached from the root model")
            }
            Self::OverlappingKinds { uri, kind } => write!(
                fmt,
                "model '{uri}' both imports and exports events of kind '{kind}'"
            ),
            Self::NotExported { uri, kind } => {
                write!(fmt, "model '{uri}' does not export events of kind '{kind}'")
            }
            Self::NotImported { uri, kind } => {
                write!(fmt, "model '{uri}' does not import events of kind '{kind}'")
            }
            Self::UnitMismatch {
                uri,
                expected,
                found,
            } => write!(
                fmt,
                "model '{uri}' uses time unit '{found}' instead of the global unit '{expected}'"
            ),
            Self::InvalidAccelerationFactor { uri, factor } => {
                write!(fmt, "model '{uri}' has an invalid acceleration factor: {factor}")
            }
            Self::ConflictingAccelerationFactors {
                uri,
                expected,
                found,
            } => write!(
                fmt,
                "model '{uri}' declares acceleration factor {found} while {expected} was declared elsewhere"
            ),
            Self::MissingAccelerationFactor => {
                fmt.write_str("no acceleration factor is configured for the real-time run")
            }
            Self::CompositionClosed => {
                fmt.write_str("the influence graph cannot be modified once closed")
            }
            Self::CyclicVariableDependency { pending } => write!(
                fmt,
                "{pending} exported variable(s) could not be initialised due to cyclic dependencies"
            ),
        }
    }
}

impl Error for ConfigurationError {}
