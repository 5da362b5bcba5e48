//! Conflict detection and resolution types.

use serde::{Deserialize, Serialize};

/// Which facet of an entity diverged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// The content payload differs.
    Content,
    /// Only metadata (parent reference etc.) differs.
    Metadata,
    /// Collection versions diverged (version/hash protocol).
    Version,
}

/// How a conflict was resolved.
///
/// Resolution is always an explicit external decision; the core never
/// auto-merges content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Keep the local (frontend) version.
    UseFrontend,
    /// Accept the remote (backend) version.
    UseBackend,
    /// Apply a caller-supplied merged entity.
    Merge,
    /// Defer; the conflict stays queued.
    Manual,
}

/// A detected divergence between local and remote versions of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Entity the conflict concerns.
    pub entity_id: String,
    /// Local snapshot at detection time.
    pub local_version: serde_json::Value,
    /// Remote snapshot at detection time.
    pub remote_version: serde_json::Value,
    /// When the conflict was detected (epoch millis).
    pub detected_at: u64,
    /// Which facet diverged.
    pub conflict_type: ConflictType,
    /// Resolution, once decided.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ConflictResolution>,
}

impl Conflict {
    /// Creates a new unresolved conflict.
    pub fn new(
        entity_id: impl Into<String>,
        local_version: serde_json::Value,
        remote_version: serde_json::Value,
        detected_at: u64,
        conflict_type: ConflictType,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            local_version,
            remote_version,
            detected_at,
            conflict_type,
            resolution: None,
        }
    }

    /// Records a resolution.
    pub fn resolve(&mut self, resolution: ConflictResolution) {
        self.resolution = Some(resolution);
    }

    /// Returns true once a resolution has been recorded.
    pub fn is_resolved(&self) -> bool {
        // Manual defers; the conflict stays live.
        !matches!(self.resolution, None | Some(ConflictResolution::Manual))
    }
}

/// Structured conflict details carried by a conflicted version-protocol
/// response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictDetails {
    /// Frontend collection version at the time of the request.
    pub frontend_version: u64,
    /// Backend collection version.
    pub backend_version: u64,
    /// Frontend aggregate hash.
    pub frontend_hash: String,
    /// Backend aggregate hash.
    pub backend_hash: String,
    /// Ids of the entries the server considers diverged.
    #[serde(default)]
    pub diverged_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn conflict_resolution_lifecycle() {
        let mut c = Conflict::new(
            "e1",
            json!({"content": "local"}),
            json!({"content": "remote"}),
            1_000,
            ConflictType::Content,
        );
        assert!(!c.is_resolved());

        c.resolve(ConflictResolution::Manual);
        assert!(!c.is_resolved());

        c.resolve(ConflictResolution::UseBackend);
        assert!(c.is_resolved());
    }

    #[test]
    fn resolution_wire_names() {
        assert_eq!(
            serde_json::to_string(&ConflictResolution::UseFrontend).unwrap(),
            "\"use_frontend\""
        );
        assert_eq!(
            serde_json::to_string(&ConflictResolution::UseBackend).unwrap(),
            "\"use_backend\""
        );
        let r: ConflictResolution = serde_json::from_str("\"merge\"").unwrap();
        assert_eq!(r, ConflictResolution::Merge);
    }

    #[test]
    fn conflict_roundtrip() {
        let c = Conflict::new(
            "e2",
            json!({"v": 1}),
            json!({"v": 2}),
            42,
            ConflictType::Metadata,
        );
        let text = serde_json::to_string(&c).unwrap();
        let decoded: Conflict = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded, c);
    }
}
