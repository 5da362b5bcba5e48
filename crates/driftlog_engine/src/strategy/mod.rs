//! Pluggable reconciliation strategies for the journal collection.
//!
//! Two protocols are supported:
//!
//! - [`TimestampStrategy`] compares per-entry `updated` timestamps against
//!   the locally observed remote state, with a skew window so a clock
//!   wobble around our own write does not look like divergence.
//! - [`VersionStrategy`] ships the whole collection with a version counter
//!   and an aggregate content hash; the server answers with a delta or a
//!   conflict.
//!
//! The engine holds exactly one strategy at a time; swapping it is a
//! configuration decision, not a per-cycle one.

mod timestamp;
mod version;

pub use timestamp::TimestampStrategy;
pub use version::VersionStrategy;

pub(crate) use version::{SyncStateRecord, SYNC_STATE};

use driftlog_protocol::{validate_entry, JournalEntry, SyncToken, Validated};
use driftlog_store::DurableStore;

use crate::conflicts::ConflictQueue;
use crate::error::SyncResult;
use crate::events::EventBus;
use crate::transport::SyncTransport;

/// Collection name for journal entries in the durable store.
pub(crate) const ENTRIES: &str = "entries";

/// What a single entry-sync pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryReport {
    /// Local entries confirmed on the server.
    pub pushed: usize,
    /// Entries created locally from remote state.
    pub added: usize,
    /// Local entries overwritten with remote state.
    pub updated: usize,
    /// Local entries deleted because the server no longer has them.
    pub deleted: usize,
    /// Conflicts queued during the pass.
    pub conflicts: usize,
}

impl EntryReport {
    /// True when the pass changed nothing and queued nothing.
    pub fn is_noop(&self) -> bool {
        *self == EntryReport::default()
    }
}

/// Everything a strategy may touch during one pass. Borrowed from the
/// engine so strategies stay free of locking concerns.
pub struct StrategyContext<'a> {
    /// The wire.
    pub transport: &'a dyn SyncTransport,
    /// Durable local state.
    pub store: &'a dyn DurableStore,
    /// Conflict sink.
    pub conflicts: &'a mut ConflictQueue,
    /// Event sink.
    pub events: &'a EventBus,
    /// Validated credential for this pass.
    pub token: &'a SyncToken,
    /// Wall clock at the start of the pass (epoch millis).
    pub now_ms: u64,
}

/// One reconciliation protocol for the journal collection.
pub trait SyncStrategy: Send {
    /// Short protocol name, used in logs.
    fn name(&self) -> &'static str;

    /// Runs one full reconciliation pass.
    fn sync_entries(&mut self, ctx: &mut StrategyContext<'_>) -> SyncResult<EntryReport>;
}

/// Loads, decodes, and validates every local journal entry. Invalid
/// records are dropped with a log line rather than failing the pass.
pub(crate) fn load_entries(store: &dyn DurableStore) -> SyncResult<Vec<JournalEntry>> {
    let docs = store.get_all(ENTRIES)?;
    let mut entries = Vec::with_capacity(docs.len());
    for doc in docs {
        let entry: JournalEntry = serde_json::from_value(doc)
            .map_err(|e| crate::error::SyncError::Protocol(format!("stored entry: {e}")))?;
        match validate_entry(entry) {
            Validated::Valid(entry) => entries.push(entry),
            Validated::Invalid { reason } => {
                tracing::warn!(%reason, "skipping invalid stored entry");
            }
        }
    }
    Ok(entries)
}

/// Persists one journal entry.
pub(crate) fn save_entry(store: &dyn DurableStore, entry: &JournalEntry) -> SyncResult<()> {
    let doc = serde_json::to_value(entry)
        .map_err(|e| crate::error::SyncError::Protocol(format!("encoding entry: {e}")))?;
    store.save(ENTRIES, &entry.id, &doc)?;
    Ok(())
}
