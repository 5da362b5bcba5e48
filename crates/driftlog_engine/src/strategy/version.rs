//! Whole-collection version/hash reconciliation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use driftlog_protocol::{
    Conflict, ConflictResolution, ConflictType, EntrySyncRequest, JournalEntry, SyncOutcome,
    SyncStatus,
};

use crate::error::{SyncError, SyncResult};
use crate::events::SyncEvent;
use crate::strategy::{load_entries, save_entry, EntryReport, StrategyContext, SyncStrategy};

/// Collection holding per-protocol sync state records.
pub(crate) const SYNC_STATE: &str = "sync_state";

/// Id of the single journal sync state record.
pub(crate) const ENTRY_SYNC_ID: &str = "entry_sync";

/// Per-user sync state for the version protocol. Created lazily on the
/// first cycle, updated only by the sync cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct SyncStateRecord {
    pub frontend_version: u64,
    pub frontend_hash: String,
    pub backend_version: u64,
    pub backend_hash: String,
    pub sync_status: Option<SyncOutcome>,
    pub resolution_status: Option<ConflictResolution>,
}

impl SyncStateRecord {
    pub(crate) fn load(store: &dyn driftlog_store::DurableStore) -> SyncResult<Self> {
        match store.get_by_id(SYNC_STATE, ENTRY_SYNC_ID)? {
            Some(doc) => serde_json::from_value(doc)
                .map_err(|e| SyncError::Protocol(format!("sync state record: {e}"))),
            None => Ok(Self::default()),
        }
    }

    pub(crate) fn save(&self, store: &dyn driftlog_store::DurableStore) -> SyncResult<()> {
        let doc = serde_json::to_value(self)
            .map_err(|e| SyncError::Protocol(format!("encoding sync state: {e}")))?;
        store.save(SYNC_STATE, ENTRY_SYNC_ID, &doc)?;
        Ok(())
    }
}

/// Hex SHA-256 of an entry's content.
fn content_hash_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Whole-collection reconciliation: one POST carrying every local entry
/// plus a collection version and aggregate hash; the server answers with
/// a delta or a conflict that blocks both directions until resolved.
///
/// Per-entry hashes are cached by version so unchanged entries are never
/// rehashed across cycles.
#[derive(Default)]
pub struct VersionStrategy {
    hash_cache: HashMap<String, (u64, String)>,
}

impl VersionStrategy {
    /// Creates the strategy with an empty hash cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry's content hash, recomputing only when its
    /// version moved past the cached one.
    fn hash_for(&mut self, entry: &JournalEntry) -> String {
        if let Some((version, hash)) = self.hash_cache.get(&entry.id) {
            if *version == entry.version {
                return hash.clone();
            }
        }
        if entry.hashed_at_version == entry.version {
            if let Some(hash) = &entry.content_hash {
                self.hash_cache
                    .insert(entry.id.clone(), (entry.version, hash.clone()));
                return hash.clone();
            }
        }
        let hash = content_hash_hex(&entry.content);
        self.hash_cache
            .insert(entry.id.clone(), (entry.version, hash.clone()));
        hash
    }

    /// Aggregate hex SHA-256 over the sorted (id, version, hash) triples.
    fn aggregate_hash(&mut self, entries: &[JournalEntry]) -> String {
        let mut triples: Vec<(String, u64, String)> = entries
            .iter()
            .map(|e| (e.id.clone(), e.version, self.hash_for(e)))
            .collect();
        triples.sort();

        let mut hasher = Sha256::new();
        for (id, version, hash) in &triples {
            hasher.update(id.as_bytes());
            hasher.update(b":");
            hasher.update(version.to_string().as_bytes());
            hasher.update(b":");
            hasher.update(hash.as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }
}

impl SyncStrategy for VersionStrategy {
    fn name(&self) -> &'static str {
        "version"
    }

    fn sync_entries(&mut self, ctx: &mut StrategyContext<'_>) -> SyncResult<EntryReport> {
        let mut entries = load_entries(ctx.store)?;

        // Refresh stale per-entry hashes, persisting the cache.
        for entry in &mut entries {
            if entry.hashed_at_version < entry.version || entry.content_hash.is_none() {
                entry.content_hash = Some(self.hash_for(entry));
                entry.hashed_at_version = entry.version;
                save_entry(ctx.store, entry)?;
            }
        }

        let mut state = SyncStateRecord::load(ctx.store)?;
        let frontend_hash = self.aggregate_hash(&entries);
        let frontend_version = if frontend_hash == state.frontend_hash {
            state.frontend_version
        } else {
            state.frontend_version + 1
        };

        let request = EntrySyncRequest {
            frontend_version,
            frontend_hash: frontend_hash.clone(),
            entry_count: entries.len(),
            entries: entries.clone(),
        };
        let response = ctx.transport.sync_entries(ctx.token, &request)?;

        let mut report = EntryReport::default();

        match response.sync_status {
            SyncOutcome::Conflicted => {
                let details = response.conflict_details.ok_or_else(|| {
                    SyncError::Protocol("conflicted response without details".into())
                })?;
                warn!(
                    frontend_version,
                    backend_version = details.backend_version,
                    diverged = details.diverged_ids.len(),
                    "version sync conflicted"
                );

                let diverged: Vec<String> = if details.diverged_ids.is_empty() {
                    vec![ENTRY_SYNC_ID.to_string()]
                } else {
                    details.diverged_ids.clone()
                };
                for id in &diverged {
                    let local = entries
                        .iter()
                        .find(|e| &e.id == id)
                        .map(|e| serde_json::to_value(e))
                        .transpose()
                        .map_err(|e| SyncError::Protocol(e.to_string()))?
                        .unwrap_or(serde_json::Value::Null);
                    let remote = serde_json::json!({
                        "backend_version": details.backend_version,
                        "backend_hash": details.backend_hash,
                    });
                    ctx.conflicts.push(Conflict::new(
                        id.clone(),
                        local,
                        remote,
                        ctx.now_ms,
                        ConflictType::Version,
                    ));
                    report.conflicts += 1;
                    ctx.events.emit(SyncEvent::ConflictDetected {
                        entity_id: id.clone(),
                    });
                }
                for entry in &mut entries {
                    if diverged.contains(&entry.id) {
                        entry.sync_status = SyncStatus::Conflicted;
                        save_entry(ctx.store, entry)?;
                        ctx.events.emit(SyncEvent::EntrySyncStatus {
                            entity_id: entry.id.clone(),
                            status: SyncStatus::Conflicted,
                        });
                    }
                }

                state.frontend_version = frontend_version;
                state.frontend_hash = frontend_hash;
                state.backend_version = details.backend_version;
                state.backend_hash = details.backend_hash;
                state.sync_status = Some(SyncOutcome::Conflicted);
                state.resolution_status = None;
                state.save(ctx.store)?;
            }
            SyncOutcome::Synced => {
                for mut entry in response
                    .entries_to_add
                    .into_iter()
                    .chain(response.entries_to_update)
                {
                    let existed = ctx.store.get_by_id(super::ENTRIES, &entry.id)?.is_some();
                    entry.sync_status = SyncStatus::Synced;
                    entry.last_modified = ctx.now_ms;
                    save_entry(ctx.store, &entry)?;
                    if existed {
                        report.updated += 1;
                    } else {
                        report.added += 1;
                    }
                    ctx.events.emit(SyncEvent::EntrySyncStatus {
                        entity_id: entry.id,
                        status: SyncStatus::Synced,
                    });
                }
                for id in &response.entries_to_delete {
                    if ctx.store.delete(super::ENTRIES, id)? {
                        report.deleted += 1;
                    }
                }
                // Everything the server did not override is now confirmed.
                for entry in &mut entries {
                    if entry.sync_status.needs_push()
                        && !response.entries_to_delete.contains(&entry.id)
                    {
                        entry.sync_status = SyncStatus::Synced;
                        save_entry(ctx.store, entry)?;
                        report.pushed += 1;
                        ctx.events.emit(SyncEvent::EntrySyncStatus {
                            entity_id: entry.id.clone(),
                            status: SyncStatus::Synced,
                        });
                    }
                }

                state.frontend_version = frontend_version;
                state.frontend_hash = frontend_hash;
                state.backend_version = response.backend_version;
                state.backend_hash = response.backend_hash;
                state.sync_status = Some(SyncOutcome::Synced);
                // State write is last so a crash mid-apply replays the
                // delta rather than skipping it.
                state.save(ctx.store)?;

                info!(
                    pushed = report.pushed,
                    added = report.added,
                    updated = report.updated,
                    deleted = report.deleted,
                    backend_version = state.backend_version,
                    "version sync converged"
                );
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflicts::ConflictQueue;
    use crate::events::EventBus;
    use crate::transport::MockTransport;
    use driftlog_protocol::{ConflictDetails, EntrySyncResponse, SyncToken};
    use driftlog_store::{DurableStore, MemoryStore};

    const NOW: u64 = 1_000_000;

    fn token() -> SyncToken {
        SyncToken::parse("dlt_0123456789abcdef0123456789abcdef").unwrap()
    }

    fn seed(store: &MemoryStore, entry: &JournalEntry) {
        store
            .save(super::super::ENTRIES, &entry.id, &serde_json::to_value(entry).unwrap())
            .unwrap();
    }

    fn run(
        strategy: &mut VersionStrategy,
        store: &MemoryStore,
        transport: &MockTransport,
        conflicts: &mut ConflictQueue,
    ) -> EntryReport {
        let events = EventBus::new();
        let tok = token();
        let mut ctx = StrategyContext {
            transport,
            store,
            conflicts,
            events: &events,
            token: &tok,
            now_ms: NOW,
        };
        strategy.sync_entries(&mut ctx).unwrap()
    }

    #[test]
    fn hashes_are_computed_once_per_version() {
        let mut strategy = VersionStrategy::new();
        let e = JournalEntry::new("content", 100);

        let first = strategy.hash_for(&e);
        assert_eq!(strategy.hash_for(&e), first);
        assert_eq!(first, content_hash_hex("content"));

        let mut bumped = e.clone();
        bumped.edit("changed", 200);
        assert_ne!(strategy.hash_for(&bumped), first);
    }

    #[test]
    fn aggregate_hash_is_order_independent() {
        let mut strategy = VersionStrategy::new();
        let mut a = JournalEntry::new("a", 100);
        a.id = "a".into();
        let mut b = JournalEntry::new("b", 100);
        b.id = "b".into();

        let forward = strategy.aggregate_hash(&[a.clone(), b.clone()]);
        let reverse = strategy.aggregate_hash(&[b, a]);
        assert_eq!(forward, reverse);
    }

    #[test]
    fn converged_response_applies_delta_and_confirms_pending() {
        let store = MemoryStore::new();
        let mut pending = JournalEntry::new("mine", 100);
        pending.id = "local-1".into();
        pending.sync_status = SyncStatus::Pending;
        seed(&store, &pending);

        let mut incoming = JournalEntry::new("theirs", 100);
        incoming.id = "remote-1".into();

        let transport = MockTransport::new();
        let mut response = EntrySyncResponse::in_sync(7, "server-hash");
        response.entries_to_add = vec![incoming];
        transport.queue_entry_response(response);

        let mut strategy = VersionStrategy::new();
        let report = run(&mut strategy, &store, &transport, &mut ConflictQueue::new());
        assert_eq!(report.added, 1);
        assert_eq!(report.pushed, 1);

        let all = load_entries(&store).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|e| e.sync_status == SyncStatus::Synced));

        let state = SyncStateRecord::load(&store).unwrap();
        assert_eq!(state.backend_version, 7);
        assert_eq!(state.frontend_version, 1);
        assert_eq!(state.sync_status, Some(SyncOutcome::Synced));
    }

    #[test]
    fn unchanged_collection_keeps_frontend_version() {
        let store = MemoryStore::new();
        let mut e = JournalEntry::new("stable", 100);
        e.id = "e1".into();
        seed(&store, &e);

        let transport = MockTransport::new();
        let mut strategy = VersionStrategy::new();
        run(&mut strategy, &store, &transport, &mut ConflictQueue::new());
        run(&mut strategy, &store, &transport, &mut ConflictQueue::new());

        let requests = transport.entry_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].frontend_version, 1);
        assert_eq!(requests[1].frontend_version, 1);
        assert_eq!(requests[0].frontend_hash, requests[1].frontend_hash);
    }

    #[test]
    fn conflicted_response_queues_and_marks() {
        let store = MemoryStore::new();
        let mut e = JournalEntry::new("mine", 100);
        e.id = "e1".into();
        e.sync_status = SyncStatus::Pending;
        seed(&store, &e);

        let transport = MockTransport::new();
        transport.queue_entry_response(EntrySyncResponse::conflicted(ConflictDetails {
            frontend_version: 1,
            backend_version: 4,
            frontend_hash: "fh".into(),
            backend_hash: "bh".into(),
            diverged_ids: vec!["e1".into()],
        }));

        let mut conflicts = ConflictQueue::new();
        let mut strategy = VersionStrategy::new();
        let report = run(&mut strategy, &store, &transport, &mut conflicts);

        assert_eq!(report.conflicts, 1);
        assert!(conflicts.is_blocked());
        assert_eq!(conflicts.current().unwrap().conflict_type, ConflictType::Version);
        assert_eq!(
            load_entries(&store).unwrap()[0].sync_status,
            SyncStatus::Conflicted
        );

        let state = SyncStateRecord::load(&store).unwrap();
        assert_eq!(state.sync_status, Some(SyncOutcome::Conflicted));
        assert_eq!(state.backend_version, 4);
    }

    #[test]
    fn persisted_hash_survives_new_strategy_instance() {
        let store = MemoryStore::new();
        let mut e = JournalEntry::new("stable", 100);
        e.id = "e1".into();
        seed(&store, &e);

        let transport = MockTransport::new();
        run(
            &mut VersionStrategy::new(),
            &store,
            &transport,
            &mut ConflictQueue::new(),
        );

        let stored = load_entries(&store).unwrap();
        assert_eq!(stored[0].hashed_at_version, 1);
        assert_eq!(
            stored[0].content_hash.as_deref(),
            Some(content_hash_hex("stable").as_str())
        );
    }
}
