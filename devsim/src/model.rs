//! Model identity, composition descriptors and atomic model behavior.
//!
//! # Authoring atomic models
//!
//! An atomic model is a leaf of the model tree: it owns a private state and
//! implements the four DEVS functions of the [`AtomicModel`] trait:
//!
//! * [`time_advance()`](AtomicModel::time_advance), the duration until the
//!   next internal event if no external event is received in between,
//! * [`output()`](AtomicModel::output), which emits the events exported when
//!   the internal event occurs,
//! * [`internal_transition()`](AtomicModel::internal_transition), the state
//!   change triggered by the internal event itself,
//! * [`external_transition()`](AtomicModel::external_transition), the state
//!   change triggered by the reception of imported events.
//!
//! Models never address each other: they only emit events of the kinds they
//! export, and the routing table of the enclosing coupled models decides
//! which models import them.
//!
//! ## A simple model
//!
//! A lamp which reports its state 1s after each switch command.
//!
//! ```
//! use devsim::event::Event;
//! use devsim::model::{AtomicModel, ModelError};
//! use devsim::time::{SimDuration, SimTime, TimeUnit};
//!
//! #[derive(Default)]
//! pub struct Lamp {
//!     is_on: bool,
//!     must_report: bool,
//! }
//!
//! impl AtomicModel for Lamp {
//!     fn time_advance(&self) -> SimDuration {
//!         if self.must_report {
//!             SimDuration::new(1.0, TimeUnit::Seconds)
//!         } else {
//!             SimDuration::infinity(TimeUnit::Seconds)
//!         }
//!     }
//!
//!     fn output(&mut self, current: SimTime) -> Result<Vec<Event>, ModelError> {
//!         Ok(vec![Event::new("lamp_state", current, self.is_on)])
//!     }
//!
//!     fn internal_transition(&mut self, _current: SimTime) -> Result<(), ModelError> {
//!         self.must_report = false;
//!         Ok(())
//!     }
//!
//!     fn external_transition(
//!         &mut self,
//!         _current: SimTime,
//!         _elapsed: SimDuration,
//!         events: Vec<Event>,
//!     ) -> Result<(), ModelError> {
//!         for event in events {
//!             match event.kind().as_str() {
//!                 "switch_on" => self.is_on = true,
//!                 "switch_off" => self.is_on = false,
//!                 _ => return Err(ModelError::new(format!("unexpected event {event:?}"))),
//!             }
//!             self.must_report = true;
//!         }
//!         Ok(())
//!     }
//! }
//! ```

mod report;
mod variables;

pub use report::{ReportPayload, SimulationReport};
pub use variables::{ExportedVariable, FixpointProgress, VariableKey, Variables};

use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::event::{Event, EventKind};
use crate::time::{SimDuration, SimTime};

/// Unique identifier of a model within a simulation run.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModelUri(Arc<str>);

impl ModelUri {
    /// Creates a model URI.
    pub fn new(uri: impl AsRef<str>) -> Self {
        Self(Arc::from(uri.as_ref()))
    }

    /// Returns the URI as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ModelUri {
    fn from(uri: &str) -> Self {
        Self::new(uri)
    }
}

impl From<String> for ModelUri {
    fn from(uri: String) -> Self {
        Self(Arc::from(uri))
    }
}

impl Borrow<str> for ModelUri {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a model is a leaf or a composition.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ModelKind {
    /// Leaf model with private state.
    Atomic,
    /// Composition of submodels.
    Coupled,
}

/// Identity and interface of a model.
///
/// For a coupled model, imported and exported kinds are those declared at its
/// boundary, which are relabelled to and from the kinds of its submodels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelDescriptor {
    /// Unique URI of the model.
    pub uri: ModelUri,
    /// Leaf or composition.
    pub kind: ModelKind,
    /// Kinds of the events the model consumes.
    pub imported: BTreeSet<EventKind>,
    /// Kinds of the events the model produces.
    pub exported: BTreeSet<EventKind>,
}

/// Behavior of a leaf model.
///
/// All time values passed to and returned by these methods are expressed in
/// the time unit declared for the model in the architecture.
///
/// See the [module-level documentation](crate::model) for an example.
pub trait AtomicModel: Send + 'static {
    /// Resets the state at the start of a run.
    ///
    /// The default implementation does nothing.
    fn initialise_state(&mut self, start: SimTime) {
        let _ = start;
    }

    /// Returns the duration until the next internal event.
    ///
    /// An infinite duration means that no internal event is forecast.
    fn time_advance(&self) -> SimDuration;

    /// Emits the events exported at the time of the internal event.
    ///
    /// This method is called exactly once before each internal transition.
    fn output(&mut self, current: SimTime) -> Result<Vec<Event>, ModelError>;

    /// Updates the state when the forecast internal event occurs.
    fn internal_transition(&mut self, current: SimTime) -> Result<(), ModelError>;

    /// Updates the state upon reception of imported events.
    ///
    /// `elapsed` is the duration since the previous transition and `events`
    /// contains at least one event.
    fn external_transition(
        &mut self,
        current: SimTime,
        elapsed: SimDuration,
        events: Vec<Event>,
    ) -> Result<(), ModelError>;

    /// Performs final bookkeeping at the end of a run.
    ///
    /// The default implementation does nothing.
    fn end_simulation(&mut self, end: SimTime) {
        let _ = end;
    }

    /// Returns the final report of the run, if the model defines one.
    fn final_report(&self) -> Option<Box<dyn ReportPayload>> {
        None
    }

    /// Returns `true` if the model exports variables whose values depend on
    /// variables exported by other models.
    fn use_fixpoint_initialise_variables(&self) -> bool {
        false
    }

    /// Attempts to initialise the exported variables whose dependencies are
    /// now available.
    ///
    /// This method may be called repeatedly and must make progress whenever a
    /// variable can be resolved.
    fn fixpoint_initialise_variables(
        &mut self,
        uri: &ModelUri,
        variables: &mut Variables,
    ) -> FixpointProgress {
        let _ = (uri, variables);

        FixpointProgress::default()
    }

    /// Returns a human-readable description of the state, for debugging.
    fn show_state_content(&self) -> String {
        String::new()
    }
}

/// Error raised by a model's own transition or output function.
///
/// Such an error aborts the current step.
#[derive(Debug)]
pub struct ModelError {
    message: String,
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ModelError {
    /// Creates an error with the specified message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error with the specified message and cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(&self.message)
    }
}

impl Error for ModelError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_deref()
            .map(|source| source as &(dyn Error + 'static))
    }
}
