//! Bounded pending queue with an id index.

use driftlog_protocol::Queued;
use std::collections::HashMap;

/// Default queue capacity before FIFO eviction kicks in.
pub const DEFAULT_CAPACITY: usize = 1000;

/// An unfinalized entry older than this, and not the current one, is
/// considered stuck and excluded from batches.
pub const STUCK_THRESHOLD_MS: u64 = 1000;

/// An ordered sequence of pending entities plus an id index.
///
/// Insertion order is eviction order. The sequence is the source of
/// truth; the index (and the logical-key map used for dedup) are derived
/// and can always be rebuilt from it via [`SyncQueue::rebuild`].
///
/// The "current" entity is tracked as an id, never a cached copy, so a
/// removal elsewhere can never leave a stale pointer; callers revalidate
/// with [`SyncQueue::ensure_current_valid`] after bulk mutation.
#[derive(Debug)]
pub struct SyncQueue<T: Queued> {
    entries: Vec<T>,
    /// id -> position in `entries`.
    index: HashMap<String, usize>,
    /// logical key -> id, for duplicate suppression.
    keys: HashMap<String, String>,
    capacity: usize,
    current: Option<String>,
}

impl<T: Queued> Default for SyncQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Queued> SyncQueue<T> {
    /// Creates an empty queue with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates an empty queue with an explicit capacity bound.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            keys: HashMap::new(),
            capacity: capacity.max(1),
            current: None,
        }
    }

    /// Number of queued entities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The capacity bound.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterates the sequence in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    /// Looks up an entity by id.
    pub fn get(&self, id: &str) -> Option<&T> {
        self.index.get(id).map(|&pos| &self.entries[pos])
    }

    /// Appends an entity unless an entity with the same logical key is
    /// already queued. Returns false on a duplicate skip.
    ///
    /// Exceeding the capacity bound evicts the oldest entry.
    pub fn enqueue(&mut self, entity: T) -> bool {
        let key = entity.logical_key().as_str().to_string();
        if self.keys.contains_key(&key) {
            tracing::debug!(id = entity.entity_id(), "skipping duplicate enqueue");
            return false;
        }

        if self.entries.len() >= self.capacity {
            let evicted = self.entries.remove(0);
            tracing::debug!(id = evicted.entity_id(), "queue full, evicting oldest");
            self.index.remove(evicted.entity_id());
            self.keys.remove(evicted.logical_key().as_str());
            if self.current.as_deref() == Some(evicted.entity_id()) {
                self.current = None;
            }
            self.reindex_from(0);
        }

        let id = entity.entity_id().to_string();
        self.keys.insert(key, id.clone());
        self.index.insert(id, self.entries.len());
        self.entries.push(entity);
        true
    }

    /// Applies an in-place patch to the entity with the given id.
    ///
    /// Callers must treat the patch as atomic with respect to the whole
    /// entity; there is no per-field locking. Returns false if the id is
    /// not queued.
    pub fn update(&mut self, id: &str, patch: impl FnOnce(&mut T)) -> bool {
        let Some(&pos) = self.index.get(id) else {
            return false;
        };
        let old_key = self.entries[pos].logical_key().as_str().to_string();
        patch(&mut self.entries[pos]);
        let new_key = self.entries[pos].logical_key().as_str().to_string();
        if new_key != old_key {
            self.keys.remove(&old_key);
            self.keys.insert(new_key, id.to_string());
        }
        true
    }

    /// Removes an entity from both structures.
    ///
    /// Clears the current reference if it pointed at the removed entity.
    pub fn remove(&mut self, id: &str) -> Option<T> {
        let pos = self.index.remove(id)?;
        let entity = self.entries.remove(pos);
        self.keys.remove(entity.logical_key().as_str());
        if self.current.as_deref() == Some(id) {
            self.current = None;
        }
        self.reindex_from(pos);
        Some(entity)
    }

    /// Retains entities satisfying the predicate, rebuilding the index.
    ///
    /// Returns the removed set for caller-side bookkeeping.
    pub fn filter(&mut self, predicate: impl Fn(&T) -> bool) -> Vec<T> {
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.entries.len());
        for entity in self.entries.drain(..) {
            if predicate(&entity) {
                kept.push(entity);
            } else {
                removed.push(entity);
            }
        }
        self.entries = kept;
        self.rebuild();
        self.ensure_current_valid();
        removed
    }

    /// Verifies that the index and sequence agree.
    ///
    /// Returns false if the id sets diverge or any indexed position does
    /// not hold the entity it claims to. Callers must call
    /// [`SyncQueue::rebuild`] on failure; this is a self-healing check,
    /// not an assertion.
    pub fn validate_consistency(&self) -> bool {
        if self.index.len() != self.entries.len() {
            return false;
        }
        for (id, &pos) in &self.index {
            match self.entries.get(pos) {
                Some(entity) if entity.entity_id() == id => {}
                _ => return false,
            }
        }
        true
    }

    /// Rebuilds the index and key map from the sequence.
    ///
    /// The sequence is the source of truth; a later duplicate logical key
    /// (should not happen) keeps the earlier entry's claim.
    pub fn rebuild(&mut self) {
        tracing::warn!(len = self.entries.len(), "rebuilding queue index");
        self.index.clear();
        self.keys.clear();
        for (pos, entity) in self.entries.iter().enumerate() {
            self.index.insert(entity.entity_id().to_string(), pos);
            self.keys
                .entry(entity.logical_key().as_str().to_string())
                .or_insert_with(|| entity.entity_id().to_string());
        }
        self.ensure_current_valid();
    }

    /// Designates the current (still-open) entity by id.
    pub fn set_current(&mut self, id: Option<&str>) {
        self.current = id.map(str::to_string);
        self.ensure_current_valid();
    }

    /// The current entity's id, if still queued.
    pub fn current_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// The current entity, resolved through the index on demand.
    pub fn current(&self) -> Option<&T> {
        self.current.as_deref().and_then(|id| self.get(id))
    }

    /// Drops a current reference that no longer resolves.
    pub fn ensure_current_valid(&mut self) {
        if let Some(id) = self.current.as_deref() {
            if !self.index.contains_key(id) {
                self.current = None;
            }
        }
    }

    /// Staleness policy: an unfinalized entity older than
    /// [`STUCK_THRESHOLD_MS`] that is not the current one is stuck and
    /// excluded from batches.
    pub fn is_stuck(&self, entity: &T, now_ms: u64) -> bool {
        !entity.is_finalized()
            && now_ms.saturating_sub(entity.last_modified()) > STUCK_THRESHOLD_MS
            && self.current.as_deref() != Some(entity.entity_id())
    }

    /// Clones the sequence for persistence.
    pub fn snapshot(&self) -> Vec<T> {
        self.entries.clone()
    }

    /// Replaces the queue contents from a persisted snapshot.
    pub fn restore(&mut self, entries: Vec<T>) {
        self.entries = entries;
        self.entries.truncate(self.capacity);
        self.index.clear();
        self.keys.clear();
        for (pos, entity) in self.entries.iter().enumerate() {
            self.index.insert(entity.entity_id().to_string(), pos);
            self.keys
                .entry(entity.logical_key().as_str().to_string())
                .or_insert_with(|| entity.entity_id().to_string());
        }
        self.ensure_current_valid();
    }

    /// Test-only hook: desynchronizes the index to exercise self-healing.
    #[cfg(test)]
    pub(crate) fn corrupt_index_for_test(&mut self) {
        self.index.insert("phantom-id".to_string(), 0);
    }

    fn reindex_from(&mut self, pos: usize) {
        for (offset, entity) in self.entries[pos..].iter().enumerate() {
            self.index
                .insert(entity.entity_id().to_string(), pos + offset);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftlog_protocol::ActivityRecord;
    use proptest::prelude::*;

    fn record(session: &str, url: &str, start: u64) -> ActivityRecord {
        let mut r = ActivityRecord::open(session, url, "title", "example.com", start);
        r.end_time = Some(start + 30_000);
        r.last_modified = start;
        r
    }

    #[test]
    fn enqueue_skips_logical_duplicates() {
        let mut q = SyncQueue::new();
        let a = record("s1", "https://a.example", 10_000);
        let mut b = record("s1", "https://a.example", 12_000); // same 5s bucket
        b.id = "different-id".to_string();

        assert!(q.enqueue(a));
        assert!(!q.enqueue(b));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn eviction_is_fifo() {
        let mut q = SyncQueue::with_capacity(3);
        for i in 0..5u64 {
            q.enqueue(record("s1", &format!("https://{i}.example"), i * 10_000));
        }
        assert_eq!(q.len(), 3);
        // Oldest two (urls 0 and 1) evicted.
        let urls: Vec<_> = q.iter().map(|r| r.url.clone()).collect();
        assert_eq!(
            urls,
            vec!["https://2.example", "https://3.example", "https://4.example"]
        );
        assert!(q.validate_consistency());
    }

    #[test]
    fn update_is_in_place() {
        let mut q = SyncQueue::new();
        let r = record("s1", "https://a.example", 10_000);
        let id = r.id.clone();
        q.enqueue(r);

        assert!(q.update(&id, |r| r.title = "patched".to_string()));
        assert_eq!(q.get(&id).unwrap().title, "patched");
        assert!(!q.update("missing", |_| {}));
    }

    #[test]
    fn remove_clears_current() {
        let mut q = SyncQueue::new();
        let r = record("s1", "https://a.example", 10_000);
        let id = r.id.clone();
        q.enqueue(r);
        q.set_current(Some(&id));
        assert!(q.current().is_some());

        q.remove(&id);
        assert!(q.current_id().is_none());
    }

    #[test]
    fn filter_returns_removed_set() {
        let mut q = SyncQueue::new();
        for i in 0..4u64 {
            q.enqueue(record("s1", &format!("https://{i}.example"), i * 10_000));
        }

        let removed = q.filter(|r| r.start_time >= 20_000);
        assert_eq!(removed.len(), 2);
        assert_eq!(q.len(), 2);
        assert!(q.validate_consistency());
    }

    #[test]
    fn consistency_self_heal() {
        let mut q = SyncQueue::new();
        q.enqueue(record("s1", "https://a.example", 10_000));
        assert!(q.validate_consistency());

        q.corrupt_index_for_test();
        assert!(!q.validate_consistency());

        q.rebuild();
        assert!(q.validate_consistency());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn stuck_detection() {
        let mut q = SyncQueue::new();
        let mut open = record("s1", "https://a.example", 10_000);
        open.end_time = None;
        let id = open.id.clone();
        q.enqueue(open);

        let entity = q.get(&id).unwrap().clone();
        // Not yet past the threshold.
        assert!(!q.is_stuck(&entity, 10_500));
        // Past the threshold and not current.
        assert!(q.is_stuck(&entity, 12_000));
        // Current is never stuck.
        q.set_current(Some(&id));
        let entity = q.get(&id).unwrap().clone();
        assert!(!q.is_stuck(&entity, 12_000));
    }

    #[test]
    fn snapshot_restore_roundtrip() {
        let mut q = SyncQueue::new();
        for i in 0..3u64 {
            q.enqueue(record("s1", &format!("https://{i}.example"), i * 10_000));
        }
        let snap = q.snapshot();

        let mut restored: SyncQueue<ActivityRecord> = SyncQueue::new();
        restored.restore(snap);
        assert_eq!(restored.len(), 3);
        assert!(restored.validate_consistency());
    }

    proptest! {
        #[test]
        fn eviction_bound_holds(n in 1usize..40, cap in 1usize..10) {
            let mut q = SyncQueue::with_capacity(cap);
            for i in 0..n {
                q.enqueue(record("s1", &format!("https://{i}.example"), i as u64 * 10_000));
            }
            prop_assert!(q.len() <= cap);
            prop_assert_eq!(q.len(), n.min(cap));
            prop_assert!(q.validate_consistency());
        }

        #[test]
        fn enqueue_is_idempotent_per_key(dups in 1usize..10) {
            let mut q = SyncQueue::new();
            let base = record("s1", "https://same.example", 10_000);
            for i in 0..dups {
                let mut r = base.clone();
                r.id = format!("id-{i}");
                // Jitter within the same 5 second bucket.
                r.start_time = 10_000 + (i as u64 * 1_000) % 5_000;
                q.enqueue(r);
            }
            prop_assert_eq!(q.len(), 1);
        }
    }
}
