//! Indexed document collection shared by the store implementations.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// One collection of documents plus its secondary indexes.
///
/// The document map is the source of truth; indexes are derived and are
/// rebuilt whenever an index is registered.
#[derive(Debug, Default)]
pub(crate) struct Collection {
    docs: BTreeMap<String, Value>,
    /// field -> (value key -> ids)
    indexes: HashMap<String, HashMap<String, BTreeSet<String>>>,
}

/// Canonical key for an indexed value. Scalars serialize stably.
fn value_key(value: &Value) -> String {
    value.to_string()
}

impl Collection {
    pub(crate) fn register_index(&mut self, field: &str) {
        if self.indexes.contains_key(field) {
            return;
        }
        let mut by_value: HashMap<String, BTreeSet<String>> = HashMap::new();
        for (id, doc) in &self.docs {
            if let Some(v) = doc.get(field) {
                by_value.entry(value_key(v)).or_default().insert(id.clone());
            }
        }
        self.indexes.insert(field.to_string(), by_value);
    }

    pub(crate) fn save(&mut self, id: &str, doc: Value) {
        if let Some(old) = self.docs.get(id).cloned() {
            self.unindex(id, &old);
        }
        for (field, by_value) in &mut self.indexes {
            if let Some(v) = doc.get(field) {
                by_value
                    .entry(value_key(v))
                    .or_default()
                    .insert(id.to_string());
            }
        }
        self.docs.insert(id.to_string(), doc);
    }

    pub(crate) fn delete(&mut self, id: &str) -> bool {
        match self.docs.remove(id) {
            Some(old) => {
                self.unindex(id, &old);
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.docs.clear();
        for by_value in self.indexes.values_mut() {
            by_value.clear();
        }
    }

    pub(crate) fn get(&self, id: &str) -> Option<&Value> {
        self.docs.get(id)
    }

    pub(crate) fn all(&self) -> Vec<Value> {
        self.docs.values().cloned().collect()
    }

    pub(crate) fn by_index(&self, field: &str, value: &Value) -> Vec<Value> {
        match self.indexes.get(field) {
            Some(by_value) => by_value
                .get(&value_key(value))
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| self.docs.get(id).cloned())
                        .collect()
                })
                .unwrap_or_default(),
            // Unregistered field: scan.
            None => self
                .docs
                .values()
                .filter(|doc| doc.get(field) == Some(value))
                .cloned()
                .collect(),
        }
    }

    pub(crate) fn docs(&self) -> &BTreeMap<String, Value> {
        &self.docs
    }

    pub(crate) fn from_docs(docs: BTreeMap<String, Value>) -> Self {
        Self {
            docs,
            indexes: HashMap::new(),
        }
    }

    fn unindex(&mut self, id: &str, old: &Value) {
        for (field, by_value) in &mut self.indexes {
            if let Some(v) = old.get(field) {
                let key = value_key(v);
                if let Some(ids) = by_value.get_mut(&key) {
                    ids.remove(id);
                    if ids.is_empty() {
                        by_value.remove(&key);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn index_tracks_saves_and_deletes() {
        let mut c = Collection::default();
        c.register_index("sync_status");

        c.save("a", json!({"sync_status": "pending"}));
        c.save("b", json!({"sync_status": "pending"}));
        c.save("c", json!({"sync_status": "synced"}));

        assert_eq!(c.by_index("sync_status", &json!("pending")).len(), 2);

        c.save("a", json!({"sync_status": "synced"}));
        assert_eq!(c.by_index("sync_status", &json!("pending")).len(), 1);

        c.delete("b");
        assert!(c.by_index("sync_status", &json!("pending")).is_empty());
    }

    #[test]
    fn unregistered_field_scans() {
        let mut c = Collection::default();
        c.save("a", json!({"parent_id": "root"}));
        c.save("b", json!({"parent_id": "other"}));

        assert_eq!(c.by_index("parent_id", &json!("root")).len(), 1);
    }

    #[test]
    fn register_backfills_existing_docs() {
        let mut c = Collection::default();
        c.save("a", json!({"parent_id": "root"}));
        c.register_index("parent_id");
        assert_eq!(c.by_index("parent_id", &json!("root")).len(), 1);
    }
}
