//! Error types for the durable store.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the durable store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem error.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Document failed to encode or decode.
    #[error("store codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Another process holds the store directory lock.
    #[error("store directory {path} is locked by another process")]
    Locked {
        /// The locked directory.
        path: String,
    },

    /// A collection file held something other than an object of documents.
    #[error("collection {collection} is corrupt: {reason}")]
    CorruptCollection {
        /// Collection name.
        collection: String,
        /// What was wrong.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StoreError::Locked {
            path: "/tmp/driftlog".into(),
        };
        assert!(err.to_string().contains("/tmp/driftlog"));

        let err = StoreError::CorruptCollection {
            collection: "entries".into(),
            reason: "expected object".into(),
        };
        assert!(err.to_string().contains("entries"));
    }
}
