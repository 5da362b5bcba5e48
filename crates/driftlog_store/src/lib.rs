//! # driftlog Durable Store
//!
//! Key-indexed local persistence for the driftlog sync engine.
//!
//! A [`DurableStore`] maps an entity id to its latest local JSON document,
//! with declared secondary indexes (by sync status, by parent, ...) for
//! O(1)-ish lookups. Two implementations are provided:
//!
//! - [`MemoryStore`] — in-memory, for tests and ephemeral use
//! - [`FileStore`] — one JSON file per collection under a locked
//!   directory; survives process restarts
//!
//! All mutation goes through the trait; callers never touch the files.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod error;
mod file;
mod memory;

pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use memory::MemoryStore;

use serde_json::Value;

/// Generic indexed local persistence contract.
///
/// Documents are JSON values keyed by `(collection, id)`. Secondary
/// indexes must be registered before use; `get_by_index` on an
/// unregistered field falls back to a full scan.
pub trait DurableStore: Send + Sync {
    /// Registers a secondary index on `field`, backfilling from existing
    /// documents.
    fn register_index(&self, collection: &str, field: &str) -> StoreResult<()>;

    /// Inserts or replaces a document.
    fn save(&self, collection: &str, id: &str, doc: &Value) -> StoreResult<()>;

    /// Returns every document in a collection, ordered by id.
    fn get_all(&self, collection: &str) -> StoreResult<Vec<Value>>;

    /// Looks up a single document.
    fn get_by_id(&self, collection: &str, id: &str) -> StoreResult<Option<Value>>;

    /// Returns documents whose `field` equals `value`.
    fn get_by_index(&self, collection: &str, field: &str, value: &Value) -> StoreResult<Vec<Value>>;

    /// Deletes a document. Returns true if it existed.
    fn delete(&self, collection: &str, id: &str) -> StoreResult<bool>;

    /// Removes every document in a collection.
    fn clear(&self, collection: &str) -> StoreResult<()>;
}
