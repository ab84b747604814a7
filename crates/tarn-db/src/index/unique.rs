use std::collections::HashMap;

use bson::{Bson, Document};
use tarn_query::{FieldPath, ScalarKey};

use crate::document::doc_id;
use crate::error::DbError;

/// Uniqueness constraint: field value → `$id`, plus the reverse map so a
/// document's old key can be found without re-reading it. Null and missing
/// values are not constrained. Keys are `$id`s rather than data positions,
/// so removes elsewhere in the collection never touch this map.
#[derive(Debug, Clone)]
pub struct UniqueIndex {
    field: String,
    path: FieldPath,
    key_map: HashMap<ScalarKey, i64>,
    id_map: HashMap<i64, ScalarKey>,
}

impl UniqueIndex {
    pub fn new(field: &str) -> UniqueIndex {
        UniqueIndex {
            field: field.to_string(),
            path: FieldPath::parse(field),
            key_map: HashMap::new(),
            id_map: HashMap::new(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    fn key_for(&self, doc: &Document) -> Option<ScalarKey> {
        let value = self.path.resolve(doc)?;
        let key = ScalarKey::from_bson(value)?;
        (!key.is_null()).then_some(key)
    }

    /// Register a document. Fails on a duplicate non-null key.
    pub fn set(&mut self, doc: &Document) -> Result<(), DbError> {
        let Some(id) = doc_id(doc) else {
            return Err(DbError::UnsyncedDocument);
        };
        let Some(key) = self.key_for(doc) else {
            return Ok(());
        };
        if let Some(&existing) = self.key_map.get(&key) {
            if existing != id {
                return Err(DbError::DuplicateKey(format!(
                    "{}: {key}",
                    self.field
                )));
            }
            return Ok(());
        }
        self.key_map.insert(key.clone(), id);
        self.id_map.insert(id, key);
        Ok(())
    }

    /// Re-register a document whose field may have changed.
    pub fn update(&mut self, old: &Document, new: &Document) -> Result<(), DbError> {
        let Some(id) = doc_id(old).or_else(|| doc_id(new)) else {
            return Err(DbError::UnsyncedDocument);
        };
        let new_key = self.key_for(new);
        if let Some(prev) = self.id_map.get(&id) {
            if Some(prev) == new_key.as_ref() {
                return Ok(());
            }
        }
        // reject the new key before dropping the old mapping
        if let Some(key) = &new_key {
            if let Some(&existing) = self.key_map.get(key) {
                if existing != id {
                    return Err(DbError::DuplicateKey(format!("{}: {key}", self.field)));
                }
            }
        }
        if let Some(prev) = self.id_map.remove(&id) {
            self.key_map.remove(&prev);
        }
        if let Some(key) = new_key {
            self.key_map.insert(key.clone(), id);
            self.id_map.insert(id, key);
        }
        Ok(())
    }

    /// Drop a document's mapping by id.
    pub fn remove_id(&mut self, id: i64) {
        if let Some(key) = self.id_map.remove(&id) {
            self.key_map.remove(&key);
        }
    }

    /// Point lookup: the `$id` registered under a field value.
    pub fn get(&self, value: &Bson) -> Option<i64> {
        let key = ScalarKey::from_bson(value)?;
        self.key_map.get(&key).copied()
    }

    pub fn clear(&mut self) {
        self.key_map.clear();
        self.id_map.clear();
    }

    /// Rebuild from scratch by scanning the data vector (used on load).
    pub fn rebuild(&mut self, data: &[Document]) -> Result<(), DbError> {
        self.clear();
        for doc in data {
            self.set(doc)?;
        }
        Ok(())
    }
}
