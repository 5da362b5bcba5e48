//! Protocol messages for sync.

use crate::conflict::ConflictDetails;
use crate::entity::{ActivityRecord, JournalEntry};
use serde::{Deserialize, Serialize};

/// Maximum number of items the server accepts in a single batch.
pub const MAX_BATCH_SIZE: usize = 500;

/// Batch push request for activity records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityBatchRequest {
    /// Server checkpoint from the previous push, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    /// Deduplicated, duration-filtered, time-ordered batch.
    pub activities: Vec<ActivityRecord>,
}

impl ActivityBatchRequest {
    /// Creates a new batch request.
    pub fn new(checkpoint: Option<String>, activities: Vec<ActivityRecord>) -> Self {
        Self {
            checkpoint,
            activities,
        }
    }
}

/// One per-item failure reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    /// Index into the request's `activities` array.
    pub index: usize,
    /// URL of the failed item (for log readability).
    pub url: String,
    /// Server-side error message.
    pub error: String,
}

/// Batch push response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityBatchResponse {
    /// True when every item was accepted.
    pub success: bool,
    /// Number of items processed.
    pub processed: usize,
    /// Number of items created.
    pub created: usize,
    /// Number of items that updated an existing record.
    pub updated: usize,
    /// Number of server-side duplicate suppressions.
    #[serde(default)]
    pub duplicates: usize,
    /// Number of failed items.
    #[serde(default)]
    pub failed: usize,
    /// Per-item failures; empty on full success.
    #[serde(default)]
    pub failed_items: Vec<FailedItem>,
    /// New checkpoint to resume from.
    pub checkpoint: String,
    /// Server hint that another batch should follow immediately.
    #[serde(default)]
    pub next_batch_recommended: bool,
}

impl ActivityBatchResponse {
    /// Creates a full-success response (used by tests and mocks).
    pub fn success(processed: usize, created: usize, checkpoint: impl Into<String>) -> Self {
        Self {
            success: true,
            processed,
            created,
            updated: processed - created,
            duplicates: 0,
            failed: 0,
            failed_items: Vec::new(),
            checkpoint: checkpoint.into(),
            next_batch_recommended: false,
        }
    }

    /// Creates a partial-failure response (used by tests and mocks).
    pub fn partial(
        processed: usize,
        failed_items: Vec<FailedItem>,
        checkpoint: impl Into<String>,
    ) -> Self {
        let failed = failed_items.len();
        Self {
            success: false,
            processed,
            created: processed - failed,
            updated: 0,
            duplicates: 0,
            failed,
            failed_items,
            checkpoint: checkpoint.into(),
            next_batch_recommended: false,
        }
    }
}

/// Outcome of a version-protocol round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Local and remote converged.
    Synced,
    /// Divergence the server refuses to merge; blocks further sync.
    Conflicted,
}

/// Whole-collection sync request for journal entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrySyncRequest {
    /// Client-side collection version.
    pub frontend_version: u64,
    /// Aggregate hex SHA-256 over the local entry set.
    pub frontend_hash: String,
    /// Number of entries in the request.
    pub entry_count: usize,
    /// The full local entry set.
    pub entries: Vec<JournalEntry>,
}

/// Whole-collection sync response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrySyncResponse {
    /// Converged or conflicted.
    pub sync_status: SyncOutcome,
    /// Entries the client is missing.
    #[serde(default)]
    pub entries_to_add: Vec<JournalEntry>,
    /// Entries the client holds stale copies of.
    #[serde(default)]
    pub entries_to_update: Vec<JournalEntry>,
    /// Ids of entries deleted server-side.
    #[serde(default)]
    pub entries_to_delete: Vec<String>,
    /// New backend collection version.
    pub backend_version: u64,
    /// New backend aggregate hash.
    pub backend_hash: String,
    /// Structured details when `sync_status` is `Conflicted`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_details: Option<ConflictDetails>,
}

impl EntrySyncResponse {
    /// Creates a converged response with no delta (used by tests and mocks).
    pub fn in_sync(backend_version: u64, backend_hash: impl Into<String>) -> Self {
        Self {
            sync_status: SyncOutcome::Synced,
            entries_to_add: Vec::new(),
            entries_to_update: Vec::new(),
            entries_to_delete: Vec::new(),
            backend_version,
            backend_hash: backend_hash.into(),
            conflict_details: None,
        }
    }

    /// Creates a conflicted response (used by tests and mocks).
    pub fn conflicted(details: ConflictDetails) -> Self {
        Self {
            sync_status: SyncOutcome::Conflicted,
            entries_to_add: Vec::new(),
            entries_to_update: Vec::new(),
            entries_to_delete: Vec::new(),
            backend_version: 0,
            backend_hash: String::new(),
            conflict_details: Some(details),
        }
    }
}

/// Pull request for the timestamp protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryListRequest {
    /// Only return entries updated after this timestamp (epoch millis).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_since: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_response_partial_counts() {
        let resp = ActivityBatchResponse::partial(
            3,
            vec![FailedItem {
                index: 1,
                url: "https://a.example".into(),
                error: "bad record".into(),
            }],
            "cp-1",
        );
        assert!(!resp.success);
        assert_eq!(resp.failed, 1);
        assert_eq!(resp.created, 2);
    }

    #[test]
    fn batch_response_decodes_with_missing_optionals() {
        let json = r#"{
            "success": true,
            "processed": 2,
            "created": 2,
            "updated": 0,
            "checkpoint": "2024-01-01 00:00:00"
        }"#;
        let resp: ActivityBatchResponse = serde_json::from_str(json).unwrap();
        assert!(resp.success);
        assert!(resp.failed_items.is_empty());
        assert!(!resp.next_batch_recommended);
    }

    #[test]
    fn sync_outcome_wire_names() {
        assert_eq!(
            serde_json::to_string(&SyncOutcome::Conflicted).unwrap(),
            "\"conflicted\""
        );
        let outcome: SyncOutcome = serde_json::from_str("\"synced\"").unwrap();
        assert_eq!(outcome, SyncOutcome::Synced);
    }
}
