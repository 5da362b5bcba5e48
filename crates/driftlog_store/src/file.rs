//! File-backed store: one JSON file per collection.

use crate::collection::Collection;
use crate::error::{StoreError, StoreResult};
use crate::DurableStore;
use fs2::FileExt;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";

/// A durable store persisting each collection as a JSON file.
///
/// Layout: `<dir>/<collection>.json` holding an object of id -> document,
/// plus a `LOCK` file held exclusively for the lifetime of the store so
/// two processes cannot write the same directory.
///
/// Every mutation rewrites the collection file through a temp-file rename,
/// so a crash mid-write leaves the previous file intact. Writes happen
/// before `save`/`delete` return; a requeue that reached the store is on
/// disk when the caller sees `Ok`.
pub struct FileStore {
    dir: PathBuf,
    collections: RwLock<HashMap<String, Collection>>,
    // Held for the lifetime of the store; dropping releases the lock.
    _lock: File,
}

impl FileStore {
    /// Opens (creating if needed) a store directory, loading every
    /// existing collection file.
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let lock = File::create(dir.join(LOCK_FILE))?;
        lock.try_lock_exclusive().map_err(|_| StoreError::Locked {
            path: dir.display().to_string(),
        })?;

        let mut collections = HashMap::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let docs = Self::load_collection(name, &path)?;
            collections.insert(name.to_string(), Collection::from_docs(docs));
        }

        tracing::debug!(dir = %dir.display(), collections = collections.len(), "opened file store");

        Ok(Self {
            dir,
            collections: RwLock::new(collections),
            _lock: lock,
        })
    }

    fn load_collection(name: &str, path: &Path) -> StoreResult<BTreeMap<String, Value>> {
        let bytes = fs::read(path)?;
        if bytes.is_empty() {
            return Ok(BTreeMap::new());
        }
        let value: Value = serde_json::from_slice(&bytes)?;
        let Value::Object(map) = value else {
            return Err(StoreError::CorruptCollection {
                collection: name.to_string(),
                reason: "expected a top-level object of documents".to_string(),
            });
        };
        Ok(map.into_iter().collect())
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}.json"))
    }

    /// Rewrites one collection file via temp-file rename.
    fn persist(&self, collection: &str, docs: &BTreeMap<String, Value>) -> StoreResult<()> {
        let map: serde_json::Map<String, Value> =
            docs.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let bytes = serde_json::to_vec_pretty(&Value::Object(map))?;

        let path = self.collection_path(collection);
        let tmp = self.dir.join(format!("{collection}.json.tmp"));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

impl DurableStore for FileStore {
    fn register_index(&self, collection: &str, field: &str) -> StoreResult<()> {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .register_index(field);
        Ok(())
    }

    fn save(&self, collection: &str, id: &str, doc: &Value) -> StoreResult<()> {
        let mut collections = self.collections.write();
        let c = collections.entry(collection.to_string()).or_default();
        c.save(id, doc.clone());
        self.persist(collection, c.docs())
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
        let mut collections = self.collections.write();
        let Some(c) = collections.get_mut(collection) else {
            return Ok(false);
        };
        let existed = c.delete(id);
        if existed {
            self.persist(collection, c.docs())?;
        }
        Ok(existed)
    }

    fn clear(&self, collection: &str) -> StoreResult<()> {
        let mut collections = self.collections.write();
        if let Some(c) = collections.get_mut(collection) {
            c.clear();
            self.persist(collection, c.docs())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store
                .save("entries", "e1", &json!({"content": "persisted"}))
                .unwrap();
        }

        let store = FileStore::open(dir.path()).unwrap();
        let doc = store.get_by_id("entries", "e1").unwrap().unwrap();
        assert_eq!(doc["content"], "persisted");
    }

    #[test]
    fn second_open_is_rejected_while_locked() {
        let dir = tempfile::tempdir().unwrap();
        let _store = FileStore::open(dir.path()).unwrap();

        let result = FileStore::open(dir.path());
        assert!(matches!(result, Err(StoreError::Locked { .. })));
    }

    #[test]
    fn delete_persists() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.save("entries", "e1", &json!({})).unwrap();
            store.save("entries", "e2", &json!({})).unwrap();
            assert!(store.delete("entries", "e1").unwrap());
        }

        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.get_by_id("entries", "e1").unwrap().is_none());
        assert!(store.get_by_id("entries", "e2").unwrap().is_some());
    }

    #[test]
    fn corrupt_collection_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("entries.json"), b"[1,2,3]").unwrap();

        let result = FileStore::open(dir.path());
        assert!(matches!(
            result,
            Err(StoreError::CorruptCollection { .. })
        ));
    }

    #[test]
    fn indexes_rebuild_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store
                .save("entries", "child", &json!({"parent_id": "root"}))
                .unwrap();
        }

        let store = FileStore::open(dir.path()).unwrap();
        store.register_index("entries", "parent_id").unwrap();
        let children = store
            .get_by_index("entries", "parent_id", &json!("root"))
            .unwrap();
        assert_eq!(children.len(), 1);
    }
}
