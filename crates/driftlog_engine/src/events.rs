//! Best-effort event notifications for UI observers.

use parking_lot::RwLock;
use std::sync::mpsc::{channel, Receiver, Sender};

use driftlog_protocol::SyncStatus;

/// An observable sync event.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A batch of activities was acknowledged by the server.
    ActivitiesSynced {
        /// Number of records the server processed.
        count: usize,
    },
    /// Activities were put back on the queue after a failure.
    ActivitiesRequeued {
        /// Number of records requeued.
        count: usize,
    },
    /// A journal entry changed sync status.
    EntrySyncStatus {
        /// The entry that changed.
        entity_id: String,
        /// Its new status.
        status: SyncStatus,
    },
    /// A new conflict was queued.
    ConflictDetected {
        /// Entity the conflict concerns.
        entity_id: String,
    },
    /// A sync cycle returned to idle.
    CycleFinished {
        /// What the cycle did.
        outcome: crate::engine::CycleOutcome,
    },
}

/// Fan-out channel for [`SyncEvent`]s.
///
/// Delivery is best effort: a subscriber that dropped its receiver is
/// silently pruned on the next emit, and a slow subscriber never blocks
/// the sync cycle (the channels are unbounded).
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Sender<SyncEvent>>>,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber and returns its receiving end.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        let (tx, rx) = channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Sends an event to every live subscriber.
    pub fn emit(&self, event: SyncEvent) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers (pruned lazily on emit).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}
