//! Entity model for synced records.

use serde::{Deserialize, Serialize};

/// Width of the time bucket used when matching "the same" activity, in millis.
pub const START_TIME_BUCKET_MS: u64 = 5_000;

/// Sync lifecycle state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Never handed to the sync layer.
    #[default]
    Unsynced,
    /// Queued, waiting for the next cycle.
    Pending,
    /// Part of an in-flight batch.
    Syncing,
    /// Acknowledged by the server.
    Synced,
    /// Last attempt exhausted its retries; requeued as pending.
    Failed,
    /// Diverged from the remote copy; waiting for explicit resolution.
    Conflicted,
}

impl SyncStatus {
    /// Returns true if the record still needs to reach the server.
    pub fn needs_push(&self) -> bool {
        matches!(
            self,
            SyncStatus::Unsynced | SyncStatus::Pending | SyncStatus::Failed
        )
    }
}

/// Composite identity used for deduplication.
///
/// Two queued records with the same logical key describe the same
/// real-world activity and must collapse to one queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalKey(String);

impl LogicalKey {
    /// Builds a key from its parts.
    pub fn new(parts: &[&str]) -> Self {
        Self(parts.join("|"))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Rounds a start time down to its 5-second bucket.
pub fn bucket_start_time(start_time_ms: u64) -> u64 {
    start_time_ms / START_TIME_BUCKET_MS
}

/// The seam between the generic queue and the concrete record types.
pub trait Queued: Clone {
    /// Stable record identifier.
    fn entity_id(&self) -> &str;

    /// Composite key used for duplicate suppression.
    fn logical_key(&self) -> LogicalKey;

    /// Local modification timestamp (epoch millis).
    fn last_modified(&self) -> u64;

    /// True once the record can no longer change (e.g. the tab closed).
    fn is_finalized(&self) -> bool;

    /// Current sync status.
    fn sync_status(&self) -> SyncStatus;

    /// Updates the sync status.
    fn set_sync_status(&mut self, status: SyncStatus);
}

/// One tracked browsing activity (an open tab over a time span).
///
/// The `id` is generated client-side (UUID v4) before the record ever
/// reaches the server; the server matches records by logical key, not id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Client-generated identifier.
    #[serde(rename = "client_id")]
    pub id: String,
    /// Browser session this activity belongs to.
    pub session_id: String,
    /// Page URL.
    pub url: String,
    /// Page title.
    pub title: String,
    /// Page domain.
    pub domain: String,
    /// Browser tab id, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<i64>,
    /// Browser window id, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_id: Option<i64>,
    /// Whether the tab was playing audio.
    #[serde(default)]
    pub audible: bool,
    /// Whether the tab was incognito.
    #[serde(default)]
    pub incognito: bool,
    /// Opaque caller-owned payload; not interpreted by the sync core.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// When the activity started (epoch millis).
    pub start_time: u64,
    /// When the activity ended; `None` while the tab is still open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
    /// Derived duration in whole seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    /// Sync lifecycle state. Local bookkeeping; the server ignores it.
    #[serde(default)]
    pub sync_status: SyncStatus,
    /// Local modification timestamp (epoch millis). Local bookkeeping.
    #[serde(default)]
    pub last_modified: u64,
}

impl ActivityRecord {
    /// Creates a new open activity starting now.
    pub fn open(
        session_id: impl Into<String>,
        url: impl Into<String>,
        title: impl Into<String>,
        domain: impl Into<String>,
        start_time: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            url: url.into(),
            title: title.into(),
            domain: domain.into(),
            tab_id: None,
            window_id: None,
            audible: false,
            incognito: false,
            metadata: serde_json::Value::Null,
            start_time,
            end_time: None,
            duration: None,
            sync_status: SyncStatus::Unsynced,
            last_modified: start_time,
        }
    }

    /// Sets the tab id.
    pub fn with_tab(mut self, tab_id: i64) -> Self {
        self.tab_id = Some(tab_id);
        self
    }

    /// Sets the window id.
    pub fn with_window(mut self, window_id: i64) -> Self {
        self.window_id = Some(window_id);
        self
    }

    /// Recomputes `duration` from the start/end pair.
    ///
    /// Open records (no end time) keep `duration = None`.
    pub fn recompute_duration(&mut self) {
        self.duration = self
            .end_time
            .map(|end| end.saturating_sub(self.start_time) / 1000);
    }

    /// Duration in seconds relative to an explicit end, without mutation.
    pub fn duration_until(&self, end_ms: u64) -> u64 {
        end_ms.saturating_sub(self.start_time) / 1000
    }
}

impl Queued for ActivityRecord {
    fn entity_id(&self) -> &str {
        &self.id
    }

    fn logical_key(&self) -> LogicalKey {
        let tab = self.tab_id.map(|t| t.to_string()).unwrap_or_default();
        let bucket = bucket_start_time(self.start_time).to_string();
        LogicalKey::new(&[&self.session_id, &self.url, &tab, &bucket])
    }

    fn last_modified(&self) -> u64 {
        self.last_modified
    }

    fn is_finalized(&self) -> bool {
        self.end_time.is_some()
    }

    fn sync_status(&self) -> SyncStatus {
        self.sync_status
    }

    fn set_sync_status(&mut self, status: SyncStatus) {
        self.sync_status = status;
    }
}

/// One journal entry.
///
/// Entries carry a monotonically incremented `version` and a content hash
/// recomputed only when the version increases; both feed the version/hash
/// sync protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Client-generated identifier (stable once assigned).
    pub id: String,
    /// Opaque entry content, owned by the caller.
    pub content: String,
    /// Back-reference to a parent entry. Used only for cascade-delete
    /// discovery, resolved by lookup, never a strong pointer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Monotonic local version, starts at 1.
    pub version: u64,
    /// Hex SHA-256 of `content`, cached at the version it was computed for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    /// Version `content_hash` was computed at.
    #[serde(default)]
    pub hashed_at_version: u64,
    /// Sync lifecycle state.
    #[serde(default)]
    pub sync_status: SyncStatus,
    /// Local modification timestamp (epoch millis).
    #[serde(default)]
    pub last_modified: u64,
    /// Remote `updated` timestamp observed at last successful sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_updated: Option<u64>,
}

impl JournalEntry {
    /// Creates a new entry at version 1.
    pub fn new(content: impl Into<String>, now_ms: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            parent_id: None,
            version: 1,
            content_hash: None,
            hashed_at_version: 0,
            sync_status: SyncStatus::Unsynced,
            last_modified: now_ms,
            remote_updated: None,
        }
    }

    /// Sets the parent back-reference.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Replaces the content, bumping the version and invalidating the
    /// cached hash.
    pub fn edit(&mut self, content: impl Into<String>, now_ms: u64) {
        self.content = content.into();
        self.version += 1;
        self.last_modified = now_ms;
        if self.sync_status == SyncStatus::Synced {
            self.sync_status = SyncStatus::Pending;
        }
    }
}

impl Queued for JournalEntry {
    fn entity_id(&self) -> &str {
        &self.id
    }

    fn logical_key(&self) -> LogicalKey {
        // Journal entries dedup by id alone.
        LogicalKey::new(&[&self.id])
    }

    fn last_modified(&self) -> u64 {
        self.last_modified
    }

    fn is_finalized(&self) -> bool {
        true
    }

    fn sync_status(&self) -> SyncStatus {
        self.sync_status
    }

    fn set_sync_status(&mut self, status: SyncStatus) {
        self.sync_status = status;
    }
}

/// A journal entry as seen from the server during a timestamp-protocol pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Server-side record id (matches the client id once synced).
    pub id: String,
    /// Entry content.
    pub content: String,
    /// Parent back-reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Server `updated` timestamp (epoch millis).
    pub updated: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_logical_key_buckets_start_time() {
        let mut a = ActivityRecord::open("s1", "https://a.example", "A", "a.example", 10_000);
        let mut b = a.clone();
        // Same bucket: 10_000 and 13_000 both land in bucket 2.
        b.start_time = 13_000;
        assert_eq!(a.logical_key(), b.logical_key());

        // Next bucket differs.
        a.start_time = 15_000;
        assert_ne!(a.logical_key(), b.logical_key());
    }

    #[test]
    fn activity_duration_recompute() {
        let mut a = ActivityRecord::open("s1", "https://a.example", "A", "a.example", 10_000);
        a.recompute_duration();
        assert_eq!(a.duration, None);

        a.end_time = Some(73_500);
        a.recompute_duration();
        assert_eq!(a.duration, Some(63));
    }

    #[test]
    fn entry_edit_bumps_version() {
        let mut e = JournalEntry::new("first", 1_000);
        assert_eq!(e.version, 1);

        e.sync_status = SyncStatus::Synced;
        e.edit("second", 2_000);
        assert_eq!(e.version, 2);
        assert_eq!(e.sync_status, SyncStatus::Pending);
        assert_eq!(e.last_modified, 2_000);
    }

    #[test]
    fn needs_push_statuses() {
        assert!(SyncStatus::Unsynced.needs_push());
        assert!(SyncStatus::Pending.needs_push());
        assert!(SyncStatus::Failed.needs_push());
        assert!(!SyncStatus::Synced.needs_push());
        assert!(!SyncStatus::Conflicted.needs_push());
    }

    #[test]
    fn activity_roundtrips_through_json() {
        let mut a = ActivityRecord::open("s1", "https://a.example", "A", "a.example", 10_000);
        a.sync_status = SyncStatus::Pending;
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json.get("client_id").unwrap(), &serde_json::json!(a.id));

        let back: ActivityRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, a);
        assert_eq!(back.sync_status, SyncStatus::Pending);
    }
}
