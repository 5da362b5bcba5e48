//! Per-entity timestamp reconciliation.

use std::collections::HashMap;

use tracing::{debug, info};

use driftlog_protocol::{
    Conflict, ConflictType, EntryListRequest, JournalEntry, RemoteEntry, SyncStatus,
};

use crate::error::{SyncError, SyncResult};
use crate::events::SyncEvent;
use crate::strategy::{load_entries, save_entry, EntryReport, StrategyContext, SyncStrategy};

/// Default skew window below which a timestamp gap is presumed to be our
/// own write echoing back, not real divergence.
const DEFAULT_SKEW_WINDOW_MS: u64 = 60_000;

/// Pull-style reconciliation keyed on per-entry `updated` timestamps.
///
/// Each cycle lists the full remote entry set and reconciles it against
/// local state entry by entry. Local entries the server does not know yet
/// stay `pending`; local entries the server forgot after a successful
/// sync are treated as server-side deletes.
pub struct TimestampStrategy {
    skew_window_ms: u64,
}

impl Default for TimestampStrategy {
    fn default() -> Self {
        Self {
            skew_window_ms: DEFAULT_SKEW_WINDOW_MS,
        }
    }
}

impl TimestampStrategy {
    /// Creates a strategy with the default one-minute skew window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the skew window.
    pub fn with_skew_window_ms(mut self, window_ms: u64) -> Self {
        self.skew_window_ms = window_ms;
        self
    }
}

/// Which interpreted fields diverge between a local and remote entry.
fn divergence(local: &JournalEntry, remote: &RemoteEntry) -> Option<ConflictType> {
    if local.content != remote.content {
        Some(ConflictType::Content)
    } else if local.parent_id != remote.parent_id {
        Some(ConflictType::Metadata)
    } else {
        None
    }
}

fn entry_from_remote(remote: &RemoteEntry, now_ms: u64) -> JournalEntry {
    JournalEntry {
        id: remote.id.clone(),
        content: remote.content.clone(),
        parent_id: remote.parent_id.clone(),
        version: 1,
        content_hash: None,
        hashed_at_version: 0,
        sync_status: SyncStatus::Synced,
        last_modified: now_ms,
        remote_updated: Some(remote.updated),
    }
}

impl SyncStrategy for TimestampStrategy {
    fn name(&self) -> &'static str {
        "timestamp"
    }

    fn sync_entries(&mut self, ctx: &mut StrategyContext<'_>) -> SyncResult<EntryReport> {
        let locals = load_entries(ctx.store)?;
        let remotes = ctx
            .transport
            .list_entries(ctx.token, &EntryListRequest { updated_since: None })?;
        let remote_by_id: HashMap<&str, &RemoteEntry> =
            remotes.iter().map(|r| (r.id.as_str(), r)).collect();

        let mut report = EntryReport::default();

        for mut local in locals {
            let Some(remote) = remote_by_id.get(local.id.as_str()).copied() else {
                match local.sync_status {
                    SyncStatus::Synced => {
                        // The server acked this entry once and no longer
                        // has it: a remote delete.
                        ctx.store.delete(super::ENTRIES, &local.id)?;
                        report.deleted += 1;
                        debug!(id = %local.id, "remote delete applied");
                    }
                    SyncStatus::Unsynced => {
                        local.sync_status = SyncStatus::Pending;
                        save_entry(ctx.store, &local)?;
                        ctx.events.emit(SyncEvent::EntrySyncStatus {
                            entity_id: local.id.clone(),
                            status: SyncStatus::Pending,
                        });
                    }
                    _ => {}
                }
                continue;
            };

            let seen = local.remote_updated.unwrap_or(0);
            let local_dirty = local.sync_status.needs_push();

            match divergence(&local, remote) {
                None => {
                    // Same data on both sides; record the remote snapshot.
                    if local.sync_status != SyncStatus::Synced
                        || local.remote_updated != Some(remote.updated)
                    {
                        if local_dirty {
                            report.pushed += 1;
                        }
                        local.sync_status = SyncStatus::Synced;
                        local.remote_updated = Some(remote.updated);
                        save_entry(ctx.store, &local)?;
                        ctx.events.emit(SyncEvent::EntrySyncStatus {
                            entity_id: local.id.clone(),
                            status: SyncStatus::Synced,
                        });
                    }
                }
                Some(_) if !local_dirty => {
                    if remote.updated > seen {
                        local.content = remote.content.clone();
                        local.parent_id = remote.parent_id.clone();
                        local.sync_status = SyncStatus::Synced;
                        local.remote_updated = Some(remote.updated);
                        local.last_modified = ctx.now_ms;
                        save_entry(ctx.store, &local)?;
                        report.updated += 1;
                        ctx.events.emit(SyncEvent::EntrySyncStatus {
                            entity_id: local.id.clone(),
                            status: SyncStatus::Synced,
                        });
                    }
                    // Stale remote copy: keep local.
                }
                Some(kind) => {
                    // Both sides changed. A small timestamp gap is our own
                    // write echoing back; a large one is real divergence.
                    let gap = remote.updated.abs_diff(local.last_modified);
                    if remote.updated > seen && gap > self.skew_window_ms {
                        let conflict = Conflict::new(
                            local.id.clone(),
                            serde_json::to_value(&local)
                                .map_err(|e| SyncError::Protocol(e.to_string()))?,
                            serde_json::to_value(remote)
                                .map_err(|e| SyncError::Protocol(e.to_string()))?,
                            ctx.now_ms,
                            kind,
                        );
                        ctx.conflicts.push(conflict);
                        local.sync_status = SyncStatus::Conflicted;
                        save_entry(ctx.store, &local)?;
                        report.conflicts += 1;
                        ctx.events.emit(SyncEvent::ConflictDetected {
                            entity_id: local.id.clone(),
                        });
                        ctx.events.emit(SyncEvent::EntrySyncStatus {
                            entity_id: local.id.clone(),
                            status: SyncStatus::Conflicted,
                        });
                    }
                    // Else: false positive, keep local pending for push.
                }
            }
        }

        // Remote entries with no local counterpart are new.
        let local_ids: std::collections::HashSet<String> = ctx
            .store
            .get_all(super::ENTRIES)?
            .into_iter()
            .filter_map(|doc| doc.get("id").and_then(|v| v.as_str().map(String::from)))
            .collect();
        for remote in &remotes {
            if !local_ids.contains(&remote.id) {
                let entry = entry_from_remote(remote, ctx.now_ms);
                save_entry(ctx.store, &entry)?;
                report.added += 1;
                ctx.events.emit(SyncEvent::EntrySyncStatus {
                    entity_id: entry.id,
                    status: SyncStatus::Synced,
                });
            }
        }

        info!(
            added = report.added,
            updated = report.updated,
            deleted = report.deleted,
            conflicts = report.conflicts,
            "timestamp reconciliation finished"
        );
        Ok(report)
    }
}
