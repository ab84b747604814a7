use std::collections::HashMap;

use bson::{Bson, Document};
use tarn_query::{FieldPath, ScalarKey};

use crate::document::doc_id;

/// Equality lookup with bag semantics: field value → the `$id`s of every
/// document carrying it. No uniqueness enforcement, no sort order.
#[derive(Debug, Clone)]
pub struct ExactIndex {
    field: String,
    path: FieldPath,
    table: HashMap<ScalarKey, Vec<i64>>,
}

impl ExactIndex {
    pub fn new(field: &str) -> ExactIndex {
        ExactIndex {
            field: field.to_string(),
            path: FieldPath::parse(field),
            table: HashMap::new(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    fn key_for(&self, doc: &Document) -> Option<ScalarKey> {
        ScalarKey::from_bson(self.path.resolve(doc)?)
    }

    pub fn add(&mut self, doc: &Document) {
        let (Some(key), Some(id)) = (self.key_for(doc), doc_id(doc)) else {
            return;
        };
        self.table.entry(key).or_default().push(id);
    }

    pub fn update(&mut self, old: &Document, new: &Document) {
        self.remove(old);
        self.add(new);
    }

    pub fn remove(&mut self, doc: &Document) {
        let (Some(key), Some(id)) = (self.key_for(doc), doc_id(doc)) else {
            return;
        };
        if let Some(bag) = self.table.get_mut(&key) {
            bag.retain(|&entry| entry != id);
            if bag.is_empty() {
                self.table.remove(&key);
            }
        }
    }

    /// All `$id`s stored under a value.
    pub fn get(&self, value: &Bson) -> &[i64] {
        ScalarKey::from_bson(value)
            .and_then(|key| self.table.get(&key))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }

    pub fn rebuild(&mut self, data: &[Document]) {
        self.clear();
        for doc in data {
            self.add(doc);
        }
    }
}
