//! Lifecycle bus
//!
//! Context-wide notifications: the ready gate opening, renders, mounts, and
//! every tree mutation made through a handle. Observers subscribe here.

use dom::NodeId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// What a mutation touched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MutationKind {
    ChildList,
    Attributes { name: String },
    CharacterData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    pub target: NodeId,
    pub kind: MutationKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VibeEvent {
    Ready,
    Rendered { node: NodeId, id: String },
    Mounted { node: NodeId, id: String },
    MountFailed { node: NodeId, target: String },
    Detached { node: NodeId },
    Mutation(Mutation),
}

/// Broadcast bus; slow subscribers lag rather than block publishers
pub struct EventBus {
    tx: broadcast::Sender<VibeEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    pub fn publish(&self, event: VibeEvent) {
        let _ = self.tx.send(event); // no subscribers is fine
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VibeEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
