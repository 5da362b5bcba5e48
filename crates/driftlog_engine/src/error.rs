//! Error types for the sync engine.

use driftlog_protocol::TokenError;
use driftlog_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Malformed sync token. Fatal to the cycle, never retried.
    #[error("invalid sync token: {0}")]
    InvalidToken(#[from] TokenError),

    /// Server rejected the request.
    #[error("server error: {0}")]
    ServerError(String),

    /// Durable store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Malformed message or unexpected response shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A bounded wait elapsed; the underlying attempt keeps running.
    #[error("operation timed out")]
    Timeout,

    /// `ensure_entry_synced` completed a cycle but the entity still is
    /// not synced.
    #[error("entity {entity_id} is still not synced")]
    NotSynced {
        /// The entity that was awaited.
        entity_id: String,
    },
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can consume a retry slot.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::ServerError(_) => true,
            SyncError::Timeout => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection reset").is_retryable());
        assert!(!SyncError::transport_fatal("401 unauthorized").is_retryable());
        assert!(SyncError::ServerError("internal".into()).is_retryable());
        assert!(!SyncError::InvalidToken(TokenError::Empty).is_retryable());
        assert!(!SyncError::NotSynced {
            entity_id: "e1".into()
        }
        .is_retryable());
    }

    #[test]
    fn token_error_converts() {
        let err: SyncError = TokenError::MissingSeparator.into();
        assert!(matches!(err, SyncError::InvalidToken(_)));
        assert!(err.to_string().contains("sync token"));
    }
}
