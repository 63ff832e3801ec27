//! Journey events for collaborators.
//!
//! The engine itself never performs side effects. Callers resolve a journey
//! before and after a write, [`diff_views`] the two, and publish the result on an
//! [`EventEmitter`] so notifiers, reminder schedulers and document generators can
//! react without coupling to the engine.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use milestone_types::NodeState;

use crate::resolver::ResolvedView;

/// A change between two resolution passes of the same journey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JourneyEvent {
    NodeStateChanged {
        node_id: String,
        from: NodeState,
        to: NodeState,
    },
    /// A visible node became hidden by a condition.
    NodeHidden { node_id: String },
    /// A hidden node became visible.
    NodeRevealed { node_id: String, state: NodeState },
}

impl JourneyEvent {
    pub fn node_id(&self) -> &str {
        match self {
            JourneyEvent::NodeStateChanged { node_id, .. }
            | JourneyEvent::NodeHidden { node_id }
            | JourneyEvent::NodeRevealed { node_id, .. } => node_id,
        }
    }

    /// True when a node has just become available to work on.
    pub fn is_unlock(&self) -> bool {
        matches!(
            self,
            JourneyEvent::NodeStateChanged {
                from: NodeState::Locked,
                to: NodeState::Active,
                ..
            } | JourneyEvent::NodeRevealed {
                state: NodeState::Active,
                ..
            }
        )
    }
}

/// Every difference between `before` and `after`, ordered by node id.
pub fn diff_views<'p>(before: &ResolvedView<'p>, after: &ResolvedView<'p>) -> Vec<JourneyEvent> {
    let ids: BTreeSet<&str> = before
        .states()
        .map(|(id, _)| id)
        .chain(after.states().map(|(id, _)| id))
        .chain(before.hidden_nodes())
        .chain(after.hidden_nodes())
        .collect();

    ids.into_iter()
        .filter_map(|id| {
            let node_id = id.to_string();
            match (before.state_of(id), after.state_of(id)) {
                (Some(from), Some(to)) if from != to => {
                    Some(JourneyEvent::NodeStateChanged { node_id, from, to })
                }
                (Some(_), None) if after.is_hidden(id) => Some(JourneyEvent::NodeHidden { node_id }),
                (None, Some(state)) if before.is_hidden(id) => {
                    Some(JourneyEvent::NodeRevealed { node_id, state })
                }
                _ => None,
            }
        })
        .collect()
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<JourneyEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity. A subscriber more
    /// than `capacity` events behind misses the oldest ones.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers; dropped when nobody listens.
    pub fn emit(&self, event: JourneyEvent) {
        let _ = self.sender.send(event);
    }

    /// Emit every event of a diff in order.
    pub fn emit_all(&self, events: impl IntoIterator<Item = JourneyEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<JourneyEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
