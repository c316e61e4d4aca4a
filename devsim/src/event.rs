//! Timestamped events exchanged between models.
//!
//! An [`Event`] is an immutable occurrence of a given [`EventKind`] at a
//! given [`SimTime`], carrying an opaque payload whose type is determined by
//! the kind. Events are ordered by time of occurrence, ties being broken by
//! their [`EventPriority`] and then by emission order.

mod inbox;

pub(crate) use inbox::Inbox;

use std::any::{type_name, Any};
use std::borrow::Borrow;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::time::SimTime;

/// The type of an event.
///
/// Kinds are declared by models as imported or exported and are the keys of
/// the routing tables.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventKind(Arc<str>);

impl EventKind {
    /// Creates an event kind.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Returns the name of the kind.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EventKind {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for EventKind {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl Borrow<str> for EventKind {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tie-break priority between simultaneous events.
///
/// The priority is fixed when the route of an event is declared: events that
/// cross the boundary of a coupled model or are injected from outside the
/// simulation are `External` and take precedence over `Internal` events
/// exchanged between peers of the same coupled model.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EventPriority {
    /// Re-exported or injected event.
    External,
    /// Event exchanged between peers.
    Internal,
}

/// Opaque event payload.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// A timestamped occurrence of an [`EventKind`].
///
/// # Examples
///
/// ```
/// use devsim::event::Event;
/// use devsim::time::{SimTime, TimeUnit};
///
/// struct Lamp {
///     power: f64,
/// }
///
/// let event = Event::new("set_power", SimTime::new(3.0, TimeUnit::Seconds), 40.0_f64);
/// let mut lamp = Lamp { power: 0.0 };
///
/// event
///     .execute_on(&mut lamp, |lamp, power: &f64| lamp.power = *power)
///     .unwrap();
/// assert_eq!(lamp.power, 40.0);
/// ```
#[derive(Clone)]
pub struct Event {
    kind: EventKind,
    time: SimTime,
    priority: EventPriority,
    payload: Payload,
}

impl Event {
    /// Creates an event with the specified payload.
    ///
    /// The priority defaults to [`EventPriority::Internal`] and is overwritten
    /// according to the route of the event when it is delivered.
    pub fn new<T>(kind: impl Into<EventKind>, time: SimTime, payload: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            kind: kind.into(),
            time,
            priority: EventPriority::Internal,
            payload: Arc::new(payload),
        }
    }

    /// Creates an event without payload.
    pub fn signal(kind: impl Into<EventKind>, time: SimTime) -> Self {
        Self::new(kind, time, ())
    }

    /// Returns the kind of the event.
    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// Returns the time of occurrence of the event.
    pub fn time(&self) -> SimTime {
        self.time
    }

    /// Returns the tie-break priority of the event.
    pub fn priority(&self) -> EventPriority {
        self.priority
    }

    /// Returns the payload if it has the requested type.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref()
    }

    /// Returns the type-erased payload.
    pub fn payload_any(&self) -> &Payload {
        &self.payload
    }

    /// Applies an action to a target state using the typed payload.
    ///
    /// An error is returned if the payload does not have the type expected by
    /// the action.
    pub fn execute_on<S, T, F>(&self, target: &mut S, action: F) -> Result<(), PayloadError>
    where
        S: ?Sized,
        T: Any,
        F: FnOnce(&mut S, &T),
    {
        let payload = self.payload::<T>().ok_or_else(|| PayloadError {
            kind: self.kind.clone(),
            expected: type_name::<T>(),
        })?;
        action(target, payload);

        Ok(())
    }

    /// Returns a copy of the event relabelled with another kind.
    pub fn with_kind(mut self, kind: EventKind) -> Self {
        self.kind = kind;
        self
    }

    /// Returns a copy of the event with another time of occurrence.
    pub fn with_time(mut self, time: SimTime) -> Self {
        self.time = time;
        self
    }

    /// Returns a copy of the event with another payload.
    pub fn with_payload<T>(mut self, payload: T) -> Self
    where
        T: Any + Send + Sync,
    {
        self.payload = Arc::new(payload);
        self
    }

    pub(crate) fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.kind)
            .field("time", &self.time)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Error returned when an event payload does not have the expected type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayloadError {
    kind: EventKind,
    expected: &'static str,
}

impl fmt::Display for PayloadError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            fmt,
            "the payload of event '{}' is not of type '{}'",
            self.kind, self.expected
        )
    }
}

impl Error for PayloadError {}
