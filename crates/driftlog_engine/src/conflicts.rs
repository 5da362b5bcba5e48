//! FIFO queue of unresolved conflicts.

use std::collections::VecDeque;

use tracing::info;

use driftlog_protocol::{Conflict, ConflictResolution};

/// Unresolved conflicts, oldest first.
///
/// While any conflict is queued the engine refuses to run entry sync
/// cycles; conflicts are surfaced one at a time (the front) and must be
/// resolved explicitly. A `Manual` resolution defers: the conflict stays
/// at the front of the queue.
#[derive(Debug, Default)]
pub struct ConflictQueue {
    conflicts: VecDeque<Conflict>,
}

impl ConflictQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a newly detected conflict. An existing conflict for the
    /// same entity is replaced in place rather than queued twice.
    pub fn push(&mut self, conflict: Conflict) {
        if let Some(existing) = self
            .conflicts
            .iter_mut()
            .find(|c| c.entity_id == conflict.entity_id)
        {
            *existing = conflict;
            return;
        }
        info!(entity_id = %conflict.entity_id, kind = ?conflict.conflict_type, "conflict queued");
        self.conflicts.push_back(conflict);
    }

    /// True while at least one conflict is unresolved.
    pub fn is_blocked(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// The conflict that must be resolved next.
    pub fn current(&self) -> Option<&Conflict> {
        self.conflicts.front()
    }

    /// Number of queued conflicts.
    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    /// True when no conflicts are queued.
    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Records a resolution for `entity_id` and, unless it was `Manual`,
    /// removes the conflict from the queue. Returns the resolved conflict,
    /// or `None` if no conflict exists for that entity.
    pub fn resolve(
        &mut self,
        entity_id: &str,
        resolution: ConflictResolution,
    ) -> Option<Conflict> {
        let pos = self.conflicts.iter().position(|c| c.entity_id == entity_id)?;
        self.conflicts[pos].resolve(resolution);
        if self.conflicts[pos].is_resolved() {
            self.conflicts.remove(pos)
        } else {
            // Deferred: hand back a snapshot, keep it queued.
            Some(self.conflicts[pos].clone())
        }
    }

    /// A snapshot of every queued conflict, oldest first.
    pub fn snapshot(&self) -> Vec<Conflict> {
        self.conflicts.iter().cloned().collect()
    }
}
