//! The sync engine facade.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use tracing::{error, info, warn};

use driftlog_protocol::{
    validate_activity, ActivityBatchRequest, ActivityRecord, ConflictResolution, JournalEntry,
    RemoteEntry, SyncStatus, SyncToken, Validated,
};
use driftlog_queue::{prepare_batch, SyncQueue};
use driftlog_store::DurableStore;

use crate::config::{SettingsSource, SyncConfig};
use crate::conflicts::ConflictQueue;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, SyncEvent};
use crate::strategy::{StrategyContext, SyncStateRecord, SyncStrategy, ENTRIES, SYNC_STATE};
use crate::transport::SyncTransport;

/// Collection of durable activity records.
const ACTIVITIES: &str = "activities";

/// Collection mirroring the in-memory queue for crash recovery.
const PENDING_ACTIVITIES: &str = "pending_activities";

/// Id of the single document holding the queue snapshot.
const QUEUE_SNAPSHOT_ID: &str = "snapshot";

/// Id of the activity checkpoint document in the sync state collection.
const ACTIVITY_CHECKPOINT_ID: &str = "activity_checkpoint";

/// Where a sync cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleState {
    /// No cycle running.
    #[default]
    Idle,
    /// Preparing a batch from the queue.
    Preparing,
    /// A request is on the wire.
    Sending,
    /// Backing off before the next attempt.
    RetryWait,
}

/// What a completed sync call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another cycle was already in flight; this call was a no-op.
    AlreadyRunning,
    /// Preconditions (settings, reachability) prevented the cycle.
    Blocked,
    /// Nothing eligible to send or reconcile.
    NothingToSync,
    /// Everything converged.
    Synced(SyncReport),
    /// The server rejected part of the batch; the rest converged.
    Partial(SyncReport),
    /// A conflict was detected or is still blocking.
    Conflicted(SyncReport),
    /// Retries were exhausted; everything was requeued for the next cycle.
    Failed,
}

impl CycleOutcome {
    /// Combines the outcomes of the pull and push halves of one cycle.
    fn merge(self, other: CycleOutcome) -> CycleOutcome {
        use CycleOutcome::*;
        match (self, other) {
            (Failed, _) | (_, Failed) => Failed,
            (Conflicted(a), rest) | (rest, Conflicted(a)) => Conflicted(a.merge(rest.report())),
            (Partial(a), rest) | (rest, Partial(a)) => Partial(a.merge(rest.report())),
            (Synced(a), rest) | (rest, Synced(a)) => Synced(a.merge(rest.report())),
            (NothingToSync, rest) | (rest, NothingToSync) => rest,
            (Blocked, rest) | (rest, Blocked) => rest,
            (AlreadyRunning, AlreadyRunning) => AlreadyRunning,
        }
    }

    fn report(self) -> SyncReport {
        match self {
            CycleOutcome::Synced(r) | CycleOutcome::Partial(r) | CycleOutcome::Conflicted(r) => r,
            _ => SyncReport::default(),
        }
    }
}

/// Counters describing one sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncReport {
    /// Records the server acknowledged.
    pub pushed: usize,
    /// Records put back on the queue.
    pub requeued: usize,
    /// Entries created locally from remote state.
    pub added: usize,
    /// Entries overwritten with remote state.
    pub updated: usize,
    /// Entries deleted locally.
    pub deleted: usize,
    /// Conflicts queued.
    pub conflicts: usize,
}

impl SyncReport {
    fn merge(self, other: SyncReport) -> SyncReport {
        SyncReport {
            pushed: self.pushed + other.pushed,
            requeued: self.requeued + other.requeued,
            added: self.added + other.added,
            updated: self.updated + other.updated,
            deleted: self.deleted + other.deleted,
            conflicts: self.conflicts + other.conflicts,
        }
    }
}

/// Cumulative engine counters, for observability.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Completed cycles (any outcome).
    pub cycles: u64,
    /// Total records acknowledged by the server.
    pub pushed: u64,
    /// Total records requeued after failures.
    pub requeued: u64,
    /// Total retry delays taken.
    pub retries: u64,
    /// Total conflicts queued.
    pub conflicts: u64,
    /// The most recent error, if any.
    pub last_error: Option<String>,
}

/// The sync engine: wires the queue, store, transport, strategy, and
/// conflict queue together behind one facade.
///
/// Activity and journal cycles hold independent mutual-exclusion flags;
/// at most one cycle per collection is ever in flight, and a concurrent
/// call observes [`CycleOutcome::AlreadyRunning`] instead of blocking.
pub struct SyncEngine<T: SyncTransport> {
    config: SyncConfig,
    settings: Box<dyn SettingsSource>,
    transport: Arc<T>,
    store: Arc<dyn DurableStore>,
    queue: Mutex<SyncQueue<ActivityRecord>>,
    conflicts: Mutex<ConflictQueue>,
    strategy: Mutex<Box<dyn SyncStrategy>>,
    events: EventBus,
    state: RwLock<CycleState>,
    stats: RwLock<SyncStats>,
    activities_in_flight: AtomicBool,
    entries_in_flight: AtomicBool,
    /// Epoch millis of the last producer heartbeat; 0 means none yet.
    last_heartbeat: AtomicU64,
}

/// Wall clock in epoch millis, for the scheduler-driven path.
fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl<T: SyncTransport> SyncEngine<T> {
    /// Builds an engine, registering store indexes and restoring the
    /// pending queue from its persisted snapshot.
    pub fn new(
        config: SyncConfig,
        settings: Box<dyn SettingsSource>,
        transport: Arc<T>,
        store: Arc<dyn DurableStore>,
        strategy: Box<dyn SyncStrategy>,
    ) -> SyncResult<Self> {
        store.register_index(ENTRIES, "parent_id")?;
        store.register_index(ENTRIES, "sync_status")?;
        store.register_index(ACTIVITIES, "sync_status")?;

        let mut queue = SyncQueue::with_capacity(config.queue_capacity);
        let snapshot: Vec<ActivityRecord> = store
            .get_by_id(PENDING_ACTIVITIES, QUEUE_SNAPSHOT_ID)?
            .and_then(|doc| doc.get("records").cloned())
            .and_then(|records| records.as_array().cloned())
            .unwrap_or_default()
            .into_iter()
            .filter_map(|doc| match serde_json::from_value::<ActivityRecord>(doc) {
                Ok(record) => match validate_activity(record) {
                    Validated::Valid(record) => Some(record),
                    Validated::Invalid { reason } => {
                        warn!(%reason, "dropping invalid queued record");
                        None
                    }
                },
                Err(e) => {
                    warn!(error = %e, "dropping undecodable queued record");
                    None
                }
            })
            .collect();
        if !snapshot.is_empty() {
            info!(count = snapshot.len(), "restored pending queue");
            queue.restore(snapshot);
        }

        Ok(Self {
            config,
            settings,
            transport,
            store,
            queue: Mutex::new(queue),
            conflicts: Mutex::new(ConflictQueue::new()),
            strategy: Mutex::new(strategy),
            events: EventBus::new(),
            state: RwLock::new(CycleState::Idle),
            stats: RwLock::new(SyncStats::default()),
            activities_in_flight: AtomicBool::new(false),
            entries_in_flight: AtomicBool::new(false),
            last_heartbeat: AtomicU64::new(0),
        })
    }

    /// Registers an observer for sync events.
    pub fn subscribe(&self) -> std::sync::mpsc::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Current cycle state.
    pub fn state(&self) -> CycleState {
        *self.state.read()
    }

    /// A snapshot of the cumulative counters.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// True while an unresolved conflict blocks entry sync.
    pub fn sync_blocked(&self) -> bool {
        self.conflicts.lock().is_blocked()
    }

    /// The conflict that must be resolved next, if any.
    pub fn current_conflict(&self) -> Option<driftlog_protocol::Conflict> {
        self.conflicts.lock().current().cloned()
    }

    /// Number of queued activity records.
    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    // ---- producer surface ------------------------------------------------

    /// Records a producer heartbeat (epoch millis).
    pub fn record_heartbeat(&self, now_ms: u64) {
        self.last_heartbeat.store(now_ms, Ordering::Relaxed);
    }

    /// Designates the currently open activity, or clears it.
    pub fn set_current_activity(&self, id: Option<&str>) {
        self.queue.lock().set_current(id);
    }

    /// Enqueues an activity record for the next cycle. Returns false when
    /// a record with the same logical key is already queued.
    pub fn enqueue_activity(&self, mut record: ActivityRecord) -> SyncResult<bool> {
        if record.sync_status == SyncStatus::Unsynced {
            record.sync_status = SyncStatus::Pending;
        }
        let doc = serde_json::to_value(&record)
            .map_err(|e| SyncError::Protocol(format!("encoding activity: {e}")))?;
        let id = record.id.clone();

        let mut queue = self.queue.lock();
        let enqueued = queue.enqueue(record);
        // A rejected duplicate must not leave an orphan in the store.
        if enqueued {
            self.store.save(ACTIVITIES, &id, &doc)?;
            self.persist_queue(&queue)?;
        }
        Ok(enqueued)
    }

    /// Applies an atomic patch to a queued activity record.
    pub fn update_activity(
        &self,
        id: &str,
        patch: impl FnOnce(&mut ActivityRecord),
    ) -> SyncResult<bool> {
        let mut queue = self.queue.lock();
        if !queue.update(id, patch) {
            return Ok(false);
        }
        if let Some(record) = queue.get(id) {
            let doc = serde_json::to_value(record)
                .map_err(|e| SyncError::Protocol(format!("encoding activity: {e}")))?;
            self.store.save(ACTIVITIES, id, &doc)?;
        }
        self.persist_queue(&queue)?;
        Ok(true)
    }

    /// Saves a journal entry, marking it pending for the next cycle.
    pub fn save_entry(&self, mut entry: JournalEntry) -> SyncResult<()> {
        if entry.sync_status != SyncStatus::Conflicted {
            entry.sync_status = SyncStatus::Pending;
        }
        let status = entry.sync_status;
        let id = entry.id.clone();
        let doc = serde_json::to_value(&entry)
            .map_err(|e| SyncError::Protocol(format!("encoding entry: {e}")))?;
        self.store.save(ENTRIES, &id, &doc)?;
        self.events.emit(SyncEvent::EntrySyncStatus {
            entity_id: id,
            status,
        });
        Ok(())
    }

    /// Fetches a journal entry.
    pub fn get_entry(&self, id: &str) -> SyncResult<Option<JournalEntry>> {
        match self.store.get_by_id(ENTRIES, id)? {
            Some(doc) => serde_json::from_value(doc)
                .map(Some)
                .map_err(|e| SyncError::Protocol(format!("stored entry: {e}"))),
            None => Ok(None),
        }
    }

    /// Deletes a journal entry; with `cascade`, also every descendant
    /// discovered through `parent_id` back-references. Returns the number
    /// of entries removed.
    pub fn delete_entry(&self, id: &str, cascade: bool) -> SyncResult<usize> {
        let mut doomed = vec![id.to_string()];
        if cascade {
            let mut visited: HashSet<String> = doomed.iter().cloned().collect();
            let mut stack = vec![id.to_string()];
            while let Some(current) = stack.pop() {
                let children = self.store.get_by_index(
                    ENTRIES,
                    "parent_id",
                    &serde_json::Value::String(current),
                )?;
                for child in children {
                    if let Some(child_id) = child.get("id").and_then(|v| v.as_str()) {
                        if visited.insert(child_id.to_string()) {
                            stack.push(child_id.to_string());
                            doomed.push(child_id.to_string());
                        }
                    }
                }
            }
        }

        let mut removed = 0;
        for id in &doomed {
            if self.store.delete(ENTRIES, id)? {
                removed += 1;
            }
        }
        info!(root = id, removed, cascade, "deleted journal entries");
        Ok(removed)
    }

    // ---- sync cycles -----------------------------------------------------

    /// Runs the pull-then-push cycle: journal reconciliation first, then
    /// the activity batch push.
    pub fn sync(&self, now_ms: u64) -> SyncResult<CycleOutcome> {
        let entries = self.sync_entries(now_ms)?;
        if matches!(entries, CycleOutcome::Conflicted(_)) {
            return Ok(entries);
        }
        let activities = self.sync_activities(now_ms)?;
        Ok(entries.merge(activities))
    }

    /// Scheduler entry point: consults settings, reachability, and the
    /// conflict queue before running a full cycle on the wall clock.
    pub fn auto_sync(&self) -> SyncResult<CycleOutcome> {
        if !self.settings.load().sync_enabled {
            return Ok(CycleOutcome::Blocked);
        }
        if !self.transport.is_reachable() {
            return Ok(CycleOutcome::Blocked);
        }
        if self.sync_blocked() {
            return Ok(CycleOutcome::Conflicted(SyncReport::default()));
        }
        self.sync(wall_clock_ms())
    }

    /// Pushes the pending activity queue in deduplicated batches.
    pub fn sync_activities(&self, now_ms: u64) -> SyncResult<CycleOutcome> {
        if self
            .activities_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(CycleOutcome::AlreadyRunning);
        }

        let result = self.run_activity_cycle(now_ms);
        *self.state.write() = CycleState::Idle;
        self.activities_in_flight.store(false, Ordering::SeqCst);
        self.finish_cycle(&result);
        result
    }

    /// Reconciles the journal collection through the configured strategy.
    pub fn sync_entries(&self, now_ms: u64) -> SyncResult<CycleOutcome> {
        if self
            .entries_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(CycleOutcome::AlreadyRunning);
        }

        let result = self.run_entry_cycle(now_ms);
        self.entries_in_flight.store(false, Ordering::SeqCst);
        self.finish_cycle(&result);
        result
    }

    /// Resolves the queued conflict for `entity_id`.
    ///
    /// `UseFrontend` marks the local entry pending so the next cycle
    /// pushes it; `UseBackend` applies the remote snapshot when the
    /// conflict carries one, otherwise defers to the next round trip;
    /// `Merge` saves the caller-supplied entity; `Manual` keeps the
    /// conflict queued. Once the queue empties, sync resumes on its own.
    pub fn resolve_conflict(
        &self,
        entity_id: &str,
        resolution: ConflictResolution,
        merged: Option<JournalEntry>,
    ) -> SyncResult<()> {
        let conflict = {
            let mut conflicts = self.conflicts.lock();
            conflicts
                .resolve(entity_id, resolution)
                .ok_or_else(|| SyncError::Protocol(format!("no queued conflict for {entity_id}")))?
        };
        if !conflict.is_resolved() {
            // Manual: deferred, still queued.
            return Ok(());
        }

        match resolution {
            ConflictResolution::UseFrontend => {
                self.mark_entry(entity_id, SyncStatus::Pending)?;
            }
            ConflictResolution::UseBackend => {
                // A timestamp conflict carries the remote entry; apply it.
                // A version conflict only carries collection state, so the
                // next round trip pulls the authoritative copy.
                if let Ok(remote) =
                    serde_json::from_value::<RemoteEntry>(conflict.remote_version.clone())
                {
                    let entry = JournalEntry {
                        id: remote.id,
                        content: remote.content,
                        parent_id: remote.parent_id,
                        version: 1,
                        content_hash: None,
                        hashed_at_version: 0,
                        sync_status: SyncStatus::Synced,
                        last_modified: conflict.detected_at,
                        remote_updated: Some(remote.updated),
                    };
                    let doc = serde_json::to_value(&entry)
                        .map_err(|e| SyncError::Protocol(e.to_string()))?;
                    self.store.save(ENTRIES, &entry.id, &doc)?;
                    self.events.emit(SyncEvent::EntrySyncStatus {
                        entity_id: entry.id,
                        status: SyncStatus::Synced,
                    });
                } else {
                    self.mark_entry(entity_id, SyncStatus::Pending)?;
                }
            }
            ConflictResolution::Merge => {
                let merged = merged.ok_or_else(|| {
                    SyncError::Protocol("merge resolution requires a merged entry".into())
                })?;
                self.save_entry(merged)?;
            }
            ConflictResolution::Manual => {}
        }

        // Record the decision on the persistent sync state.
        let mut state = SyncStateRecord::load(self.store.as_ref())?;
        state.resolution_status = Some(resolution);
        state.save(self.store.as_ref())?;

        info!(entity_id, ?resolution, "conflict resolved");
        Ok(())
    }

    /// Triggers an entry cycle and waits (bounded) until `entity_id` is
    /// confirmed synced. On timeout the background cycle keeps running.
    pub fn ensure_entry_synced(self: &Arc<Self>, entity_id: &str, now_ms: u64) -> SyncResult<()>
    where
        T: 'static,
    {
        if self.entry_status(entity_id)? == Some(SyncStatus::Synced) {
            return Ok(());
        }

        let engine = Arc::clone(self);
        let (tx, rx) = channel();
        thread::spawn(move || {
            let _ = tx.send(engine.sync_entries(now_ms));
        });

        match rx.recv_timeout(self.config.ensure_timeout) {
            Ok(result) => {
                result?;
            }
            Err(RecvTimeoutError::Timeout) => return Err(SyncError::Timeout),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(SyncError::Protocol("sync worker vanished".into()))
            }
        }

        if self.entry_status(entity_id)? == Some(SyncStatus::Synced) {
            Ok(())
        } else {
            Err(SyncError::NotSynced {
                entity_id: entity_id.to_string(),
            })
        }
    }

    // ---- internals -------------------------------------------------------

    fn entry_status(&self, id: &str) -> SyncResult<Option<SyncStatus>> {
        Ok(self.get_entry(id)?.map(|e| e.sync_status))
    }

    fn mark_entry(&self, id: &str, status: SyncStatus) -> SyncResult<()> {
        if let Some(mut entry) = self.get_entry(id)? {
            entry.sync_status = status;
            let doc =
                serde_json::to_value(&entry).map_err(|e| SyncError::Protocol(e.to_string()))?;
            self.store.save(ENTRIES, id, &doc)?;
            self.events.emit(SyncEvent::EntrySyncStatus {
                entity_id: id.to_string(),
                status,
            });
        }
        Ok(())
    }

    /// Mirrors the queue into the durable store as one snapshot document,
    /// so the mirror flips atomically: termination mid-persist leaves the
    /// previous snapshot intact. Always the last write of a
    /// requeue/cleanup path.
    fn persist_queue(&self, queue: &SyncQueue<ActivityRecord>) -> SyncResult<()> {
        let records = serde_json::to_value(queue.iter().collect::<Vec<_>>())
            .map_err(|e| SyncError::Protocol(format!("encoding queue snapshot: {e}")))?;
        let doc = serde_json::json!({ "records": records });
        self.store.save(PENDING_ACTIVITIES, QUEUE_SNAPSHOT_ID, &doc)?;
        Ok(())
    }

    fn load_checkpoint(&self) -> SyncResult<Option<String>> {
        Ok(self
            .store
            .get_by_id(SYNC_STATE, ACTIVITY_CHECKPOINT_ID)?
            .and_then(|doc| {
                doc.get("checkpoint")
                    .and_then(|v| v.as_str().map(String::from))
            }))
    }

    fn save_checkpoint(&self, checkpoint: &str) -> SyncResult<()> {
        let doc = serde_json::json!({ "checkpoint": checkpoint });
        self.store.save(SYNC_STATE, ACTIVITY_CHECKPOINT_ID, &doc)?;
        Ok(())
    }

    fn finish_cycle(&self, result: &SyncResult<CycleOutcome>) {
        {
            let mut stats = self.stats.write();
            match result {
                Ok(CycleOutcome::AlreadyRunning) => {}
                Ok(outcome) => {
                    stats.cycles += 1;
                    let report = outcome.report();
                    stats.pushed += report.pushed as u64;
                    stats.requeued += report.requeued as u64;
                    stats.conflicts += report.conflicts as u64;
                    if !matches!(outcome, CycleOutcome::Failed) {
                        stats.last_error = None;
                    }
                }
                Err(e) => {
                    stats.cycles += 1;
                    stats.last_error = Some(e.to_string());
                    error!(error = %e, "sync cycle failed");
                }
            }
        }
        if let Ok(outcome) = result {
            if !matches!(outcome, CycleOutcome::AlreadyRunning) {
                self.events
                    .emit(SyncEvent::CycleFinished { outcome: *outcome });
            }
        }
    }

    fn run_entry_cycle(&self, now_ms: u64) -> SyncResult<CycleOutcome> {
        let token = SyncToken::parse(&self.config.token)?;

        let mut conflicts = self.conflicts.lock();
        if conflicts.is_blocked() {
            return Ok(CycleOutcome::Conflicted(SyncReport::default()));
        }

        let mut strategy = self.strategy.lock();
        let mut ctx = StrategyContext {
            transport: self.transport.as_ref(),
            store: self.store.as_ref(),
            conflicts: &mut conflicts,
            events: &self.events,
            token: &token,
            now_ms,
        };
        let report = strategy.sync_entries(&mut ctx)?;

        let report = SyncReport {
            pushed: report.pushed,
            requeued: 0,
            added: report.added,
            updated: report.updated,
            deleted: report.deleted,
            conflicts: report.conflicts,
        };
        Ok(if report.conflicts > 0 {
            CycleOutcome::Conflicted(report)
        } else if report == SyncReport::default() {
            CycleOutcome::NothingToSync
        } else {
            CycleOutcome::Synced(report)
        })
    }

    fn run_activity_cycle(&self, now_ms: u64) -> SyncResult<CycleOutcome> {
        // Credential problems are fatal before any queue mutation.
        let token = SyncToken::parse(&self.config.token)?;
        let settings = self.settings.load();
        let batch_config = settings.batch_config();

        let mut outcome = CycleOutcome::NothingToSync;
        loop {
            *self.state.write() = CycleState::Preparing;

            let heartbeat = match self.last_heartbeat.load(Ordering::Relaxed) {
                0 => None,
                ms => Some(ms),
            };

            let (batch, checkpoint) = {
                let mut queue = self.queue.lock();
                if !queue.validate_consistency() {
                    error!("queue index diverged from sequence; rebuilding");
                    queue.rebuild();
                }
                let batch = prepare_batch(&queue, heartbeat, now_ms, &batch_config);
                if batch.is_empty() {
                    return Ok(outcome);
                }
                for record in &batch.records {
                    queue.update(&record.id, |r| r.sync_status = SyncStatus::Syncing);
                }
                self.persist_queue(&queue)?;
                (batch, self.load_checkpoint()?)
            };

            *self.state.write() = CycleState::Sending;
            let request = ActivityBatchRequest::new(checkpoint, batch.records.clone());

            let response = match self.send_with_retry(&token, &request) {
                Ok(response) => response,
                Err(err) => {
                    // Everything in the batch goes back to pending; the
                    // next cycle picks it up from the persisted queue.
                    let requeued = self.requeue_batch(&batch.records)?;
                    self.events
                        .emit(SyncEvent::ActivitiesRequeued { count: requeued });
                    if err.is_retryable() {
                        warn!(error = %err, requeued, "retries exhausted, batch requeued");
                        return Ok(CycleOutcome::Failed);
                    }
                    return Err(err);
                }
            };

            let failed_indexes: HashSet<usize> =
                response.failed_items.iter().map(|f| f.index).collect();
            let mut report = SyncReport::default();
            {
                let mut queue = self.queue.lock();
                let current_id = queue.current_id().map(str::to_string);
                for (i, record) in batch.records.iter().enumerate() {
                    if failed_indexes.contains(&i) {
                        queue.update(&record.id, |r| r.sync_status = SyncStatus::Pending);
                        report.requeued += 1;
                    } else {
                        report.pushed += 1;
                        if current_id.as_deref() == Some(record.id.as_str()) {
                            // The open record got a synthetic end; it stays
                            // queued and will sync again once finalized.
                            queue.update(&record.id, |r| r.sync_status = SyncStatus::Pending);
                        } else {
                            queue.remove(&record.id);
                        }
                        self.mark_activity_synced(&record.id)?;
                    }
                }
                self.save_checkpoint(&response.checkpoint)?;
                self.persist_queue(&queue)?;
            }

            for item in &response.failed_items {
                warn!(index = item.index, url = %item.url, error = %item.error, "item rejected");
            }
            self.events.emit(SyncEvent::ActivitiesSynced {
                count: report.pushed,
            });
            if report.requeued > 0 {
                self.events.emit(SyncEvent::ActivitiesRequeued {
                    count: report.requeued,
                });
            }
            info!(
                pushed = report.pushed,
                requeued = report.requeued,
                checkpoint = %response.checkpoint,
                "batch acknowledged"
            );

            let step = if response.failed_items.is_empty() {
                CycleOutcome::Synced(report)
            } else {
                CycleOutcome::Partial(report)
            };
            outcome = outcome.merge(step);

            if !response.next_batch_recommended {
                return Ok(outcome);
            }
        }
    }

    /// Sends one batch, retrying transient failures with exponential
    /// backoff. Retries are sequential, never parallel.
    fn send_with_retry(
        &self,
        token: &SyncToken,
        request: &ActivityBatchRequest,
    ) -> SyncResult<driftlog_protocol::ActivityBatchResponse> {
        let mut attempt = 1;
        loop {
            match self.transport.push_activities(token, request) {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt < self.config.retry.max_attempts => {
                    let delay = self.config.retry.delay_for_attempt(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "send failed, backing off");
                    self.stats.write().retries += 1;
                    *self.state.write() = CycleState::RetryWait;
                    thread::sleep(delay);
                    *self.state.write() = CycleState::Sending;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn requeue_batch(&self, records: &[ActivityRecord]) -> SyncResult<usize> {
        let mut queue = self.queue.lock();
        let mut requeued = 0;
        for record in records {
            if queue.update(&record.id, |r| r.sync_status = SyncStatus::Pending) {
                requeued += 1;
            }
        }
        self.persist_queue(&queue)?;
        self.stats.write().requeued += requeued as u64;
        Ok(requeued)
    }

    fn mark_activity_synced(&self, id: &str) -> SyncResult<()> {
        if let Some(mut doc) = self.store.get_by_id(ACTIVITIES, id)? {
            if let Some(obj) = doc.as_object_mut() {
                obj.insert(
                    "sync_status".to_string(),
                    serde_json::Value::String("synced".to_string()),
                );
            }
            self.store.save(ACTIVITIES, id, &doc)?;
        }
        Ok(())
    }
}
