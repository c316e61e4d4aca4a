use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::event::{Event, EventKind};

/// An observer of the events exported by the root model.
///
/// Sinks are invoked after each step, once the engine tree has been released,
/// so a sink may safely call back into the [`Simulation`](super::Simulation)
/// through another handle. This trait is implemented for closures of type
/// `FnMut(&Event)`.
pub trait EventSink: Send + 'static {
    /// Receives an exported event.
    fn receive(&mut self, event: &Event);
}

impl<F> EventSink for F
where
    F: FnMut(&Event) + Send + 'static,
{
    fn receive(&mut self, event: &Event) {
        self(event)
    }
}

/// The shared data of an `EventBuffer`.
struct Inner {
    capacity: usize,
    is_open: AtomicBool,
    buffer: Mutex<VecDeque<Event>>,
}

/// An [`EventSink`] with a bounded size.
///
/// If the maximum capacity is exceeded, older events are overwritten. Events
/// are returned in first-in-first-out order. A buffer is a handle: clones share
/// the same storage, so one clone can be connected to a simulation while
/// another is used to read events.
///
/// Note that even if the iterator returns `None`, it may still produce more
/// items in the future (in other words, it is not a
/// [`FusedIterator`](std::iter::FusedIterator)).
#[derive(Clone)]
pub struct EventBuffer {
    inner: Arc<Inner>,
}

impl EventBuffer {
    /// Default capacity when constructed with `new`.
    pub const DEFAULT_CAPACITY: usize = 256;

    /// Creates an open `EventBuffer` with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Creates an open `EventBuffer` with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity,
                is_open: AtomicBool::new(true),
                buffer: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Starts or resumes the collection of new events.
    pub fn open(&self) {
        self.inner.is_open.store(true, Ordering::Relaxed);
    }

    /// Pauses the collection of new events.
    ///
    /// Events that were previously in the buffer remain available.
    pub fn close(&self) {
        self.inner.is_open.store(false, Ordering::Relaxed);
    }

    /// Returns the number of buffered events.
    pub fn len(&self) -> usize {
        self.inner.buffer.lock().unwrap().len()
    }

    /// Returns `true` if no event is buffered.
    pub fn is_empty(&self) -> bool {
        self.inner.buffer.lock().unwrap().is_empty()
    }
}

impl EventSink for EventBuffer {
    fn receive(&mut self, event: &Event) {
        if !self.inner.is_open.load(Ordering::Relaxed) {
            return;
        }

        let mut buffer = self.inner.buffer.lock().unwrap();
        if buffer.len() == self.inner.capacity {
            buffer.pop_front();
        }

        buffer.push_back(event.clone());
    }
}

impl Iterator for EventBuffer {
    type Item = Event;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.buffer.lock().unwrap().pop_front()
    }
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EventBuffer").finish_non_exhaustive()
    }
}

/// Staging area for the events delivered at the boundary of the root model
/// during a step.
#[derive(Clone, Debug, Default)]
pub(crate) struct Outbox {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Outbox {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    pub(crate) fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

/// The sinks connected to a simulation, keyed by exported kind.
#[derive(Default)]
pub(crate) struct SinkSet {
    sinks: Vec<(EventKind, Box<dyn EventSink>)>,
}

impl SinkSet {
    pub(crate) fn add(&mut self, kind: EventKind, sink: Box<dyn EventSink>) {
        self.sinks.push((kind, sink));
    }

    /// Forwards events to the sinks of their kind, in connection order.
    pub(crate) fn dispatch(&mut self, events: &[Event]) {
        for event in events {
            for (kind, sink) in self.sinks.iter_mut() {
                if kind == event.kind() {
                    sink.receive(event);
                }
            }
        }
    }
}

impl fmt::Debug for SinkSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.sinks.iter().map(|(kind, _)| kind))
            .finish()
    }
}
