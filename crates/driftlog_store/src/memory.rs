//! In-memory store for tests and ephemeral databases.

use crate::collection::Collection;
use crate::error::StoreResult;
use crate::DurableStore;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

/// An in-memory durable store.
///
/// Nothing survives the process; suitable for unit tests, integration
/// tests, and callers that only need the indexed lookup contract.
///
/// # Thread safety
///
/// All methods take `&self`; the store can be shared across threads.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableStore for MemoryStore {
    fn register_index(&self, collection: &str, field: &str) -> StoreResult<()> {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .register_index(field);
        Ok(())
    }

    fn save(&self, collection: &str, id: &str, doc: &Value) -> StoreResult<()> {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .save(id, doc.clone());
        Ok(())
    }

    fn get_all(&self, collection: &str) -> StoreResult<Vec<Value>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(Collection::all)
            .unwrap_or_default())
    }

    fn get_by_id(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|c| c.get(id).cloned()))
    }

    fn get_by_index(&self, collection: &str, field: &str, value: &Value) -> StoreResult<Vec<Value>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|c| c.by_index(field, value))
            .unwrap_or_default())
    }

    fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        Ok(self
            .collections
            .write()
            .get_mut(collection)
            .is_some_and(|c| c.delete(id)))
    }

    fn clear(&self, collection: &str) -> StoreResult<()> {
        if let Some(c) = self.collections.write().get_mut(collection) {
            c.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn save_and_get() {
        let store = MemoryStore::new();
        store
            .save("entries", "e1", &json!({"content": "hello"}))
            .unwrap();

        let doc = store.get_by_id("entries", "e1").unwrap().unwrap();
        assert_eq!(doc["content"], "hello");
        assert!(store.get_by_id("entries", "missing").unwrap().is_none());
    }

    #[test]
    fn get_all_is_id_ordered() {
        let store = MemoryStore::new();
        store.save("entries", "b", &json!({"n": 2})).unwrap();
        store.save("entries", "a", &json!({"n": 1})).unwrap();

        let all = store.get_all("entries").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0]["n"], 1);
    }

    #[test]
    fn indexed_lookup() {
        let store = MemoryStore::new();
        store.register_index("entries", "parent_id").unwrap();
        store
            .save("entries", "child", &json!({"parent_id": "root"}))
            .unwrap();
        store
            .save("entries", "other", &json!({"parent_id": "elsewhere"}))
            .unwrap();

        let children = store
            .get_by_index("entries", "parent_id", &json!("root"))
            .unwrap();
        assert_eq!(children.len(), 1);
    }

    #[test]
    fn delete_and_clear() {
        let store = MemoryStore::new();
        store.save("entries", "e1", &json!({})).unwrap();

        assert!(store.delete("entries", "e1").unwrap());
        assert!(!store.delete("entries", "e1").unwrap());

        store.save("entries", "e2", &json!({})).unwrap();
        store.clear("entries").unwrap();
        assert!(store.get_all("entries").unwrap().is_empty());
    }

    #[test]
    fn missing_collection_reads_are_empty() {
        let store = MemoryStore::new();
        assert!(store.get_all("nope").unwrap().is_empty());
        assert!(store
            .get_by_index("nope", "f", &json!(1))
            .unwrap()
            .is_empty());
    }
}
