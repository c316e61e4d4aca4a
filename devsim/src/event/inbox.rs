use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::time::SimTime;

use super::Event;

/// The shared data of an `Inbox`.
#[derive(Default)]
struct Inner {
    events: Vec<(u64, Event)>,
    next_seq: u64,
}

/// Buffer of imported events awaiting an external transition.
///
/// An inbox is written by the simulators of the models that influence its
/// owner and drained by its owner only, so it behaves as a multi-producer,
/// single-consumer handoff. Events are drained in time order, ties being
/// broken by priority and then by arrival order.
#[derive(Clone, Default)]
pub(crate) struct Inbox {
    inner: Arc<Mutex<Inner>>,
}

impl Inbox {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, event: Event) {
        let mut inner = self.inner.lock().unwrap();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.events.push((seq, event));
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().events.is_empty()
    }

    /// Returns the time of the earliest buffered event, if any.
    pub(crate) fn earliest_time(&self) -> Option<SimTime> {
        self.inner
            .lock()
            .unwrap()
            .events
            .iter()
            .map(|(_, event)| event.time())
            .reduce(SimTime::min)
    }

    /// Takes all buffered events in delivery order.
    pub(crate) fn drain(&self) -> Vec<Event> {
        let mut events = std::mem::take(&mut self.inner.lock().unwrap().events);
        events.sort_by(|(seq_a, a), (seq_b, b)| {
            a.time()
                .partial_cmp(&b.time())
                .unwrap_or(Ordering::Equal)
                .then(a.priority().cmp(&b.priority()))
                .then(seq_a.cmp(seq_b))
        });

        events.into_iter().map(|(_, event)| event).collect()
    }

    pub(crate) fn clear(&self) {
        self.inner.lock().unwrap().events.clear();
    }
}

impl fmt::Debug for Inbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.inner.lock().unwrap().events.len();
        write!(f, "Inbox ({len} events)")
    }
}
