use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

/// Operation tag of a change record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOp {
    #[serde(rename = "I")]
    Insert,
    #[serde(rename = "U")]
    Update,
    #[serde(rename = "R")]
    Remove,
}

/// One entry in a collection's change log, suitable for replaying the
/// mutation stream against another store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Collection name.
    pub name: String,
    pub operation: ChangeOp,
    /// The full document, or just the changed fields when delta changes
    /// are enabled for updates.
    pub obj: Document,
}

/// Recursive field diff: every field of `new` whose value differs from
/// `old`, with nested documents diffed field-by-field. `$id` is always
/// carried so the record stays addressable.
pub fn change_delta(old: &Document, new: &Document) -> Document {
    let mut delta = diff_documents(old, new);
    if let Some(id) = new.get(crate::document::ID_FIELD) {
        delta.insert(crate::document::ID_FIELD, id.clone());
    }
    delta
}

fn diff_documents(old: &Document, new: &Document) -> Document {
    let mut delta = Document::new();
    for (key, new_val) in new {
        match (old.get(key), new_val) {
            (Some(Bson::Document(od)), Bson::Document(nd)) => {
                let nested = diff_documents(od, nd);
                if !nested.is_empty() {
                    delta.insert(key, nested);
                }
            }
            (Some(old_val), _) if old_val == new_val => {}
            _ => {
                delta.insert(key, new_val.clone());
            }
        }
    }
    delta
}
