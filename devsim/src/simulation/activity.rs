use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::model::ModelUri;

/// Set of children of a coordinator that hold buffered input.
#[derive(Clone, Default)]
pub(crate) struct ActivityBoard {
    active: Arc<Mutex<BTreeSet<ModelUri>>>,
}

impl ActivityBoard {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn mark(&self, uri: &ModelUri) {
        let mut active = self.active.lock().unwrap();
        if !active.contains(uri) {
            active.insert(uri.clone());
        }
    }

    pub(crate) fn unmark(&self, uri: &ModelUri) {
        self.active.lock().unwrap().remove(uri);
    }

    pub(crate) fn contains(&self, uri: &ModelUri) -> bool {
        self.active.lock().unwrap().contains(uri)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.active.lock().unwrap().is_empty()
    }

    pub(crate) fn clear(&self) {
        self.active.lock().unwrap().clear();
    }
}

impl fmt::Debug for ActivityBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.active.lock().unwrap().iter())
            .finish()
    }
}

/// Upward notification handle of an engine.
///
/// The chain lists, from the direct parent up to the root, the activity board
/// of each ancestor together with the URI under which the engine or its
/// ancestor is known there. Reception of input marks the whole chain so that
/// every ancestor knows it must relay an external step; consumption only
/// clears the direct parent, which in turn clears its own entry once all its
/// children are idle.
#[derive(Clone, Debug, Default)]
pub(crate) struct ActivityNotifier {
    chain: Vec<(ActivityBoard, ModelUri)>,
}

impl ActivityNotifier {
    pub(crate) fn new(chain: Vec<(ActivityBoard, ModelUri)>) -> Self {
        Self { chain }
    }

    pub(crate) fn has_received_external_events(&self) {
        for (board, uri) in &self.chain {
            board.mark(uri);
        }
    }

    pub(crate) fn has_performed_external_events(&self) {
        if let Some((board, uri)) = self.chain.first() {
            board.unmark(uri);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifications_propagate_upward() {
        let root_board = ActivityBoard::new();
        let room_board = ActivityBoard::new();
        let heater = ActivityNotifier::new(vec![
            (room_board.clone(), ModelUri::new("heater")),
            (root_board.clone(), ModelUri::new("room")),
        ]);
        let room = ActivityNotifier::new(vec![(root_board.clone(), ModelUri::new("room"))]);

        heater.has_received_external_events();
        assert!(room_board.contains(&ModelUri::new("heater")));
        assert!(root_board.contains(&ModelUri::new("room")));

        heater.has_performed_external_events();
        assert!(room_board.is_empty());
        assert!(!root_board.is_empty());

        room.has_performed_external_events();
        assert!(root_board.is_empty());
    }
}
