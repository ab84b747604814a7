use bson::{Bson, Document};

/// Primary key field, assigned by the collection on insert.
pub const ID_FIELD: &str = "$id";
/// Bookkeeping subdocument: `created`, `updated`, `revision`, `version`.
pub const META_FIELD: &str = "meta";

pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Integer read tolerating both widths and doubles, since JSON round-trips
/// do not preserve the original BSON integer kind.
fn as_int(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int64(i) => Some(*i),
        Bson::Int32(i) => Some(i64::from(*i)),
        Bson::Double(d) if d.fract() == 0.0 => Some(*d as i64),
        _ => None,
    }
}

/// Read a document's `$id`.
pub fn doc_id(doc: &Document) -> Option<i64> {
    as_int(doc.get(ID_FIELD)?)
}

pub fn set_doc_id(doc: &mut Document, id: i64) {
    doc.insert(ID_FIELD, Bson::Int64(id));
}

/// Stamp creation metadata. Overwrites any caller-supplied `meta` fields for
/// `revision` and `version` but preserves a pre-set `created` (documents
/// arriving from another store keep their history).
pub fn stamp_created(doc: &mut Document, now: i64) {
    let meta = meta_mut(doc);
    if meta.get("created").and_then(as_int).unwrap_or(0) == 0 {
        meta.insert("created", Bson::Int64(now));
    }
    meta.insert("revision", Bson::Int64(0));
    meta.insert("version", Bson::Int64(0));
}

/// Bump revision and set the update timestamp.
pub fn stamp_updated(doc: &mut Document, now: i64) {
    let meta = meta_mut(doc);
    let revision = meta.get("revision").and_then(as_int).unwrap_or(0);
    meta.insert("revision", Bson::Int64(revision + 1));
    meta.insert("updated", Bson::Int64(now));
}

/// The timestamp TTL expiration measures from: last update, else creation.
pub fn age_reference(doc: &Document) -> Option<i64> {
    let meta = doc.get_document(META_FIELD).ok()?;
    meta.get("updated")
        .and_then(as_int)
        .or_else(|| meta.get("created").and_then(as_int))
}

fn meta_mut(doc: &mut Document) -> &mut Document {
    if !matches!(doc.get(META_FIELD), Some(Bson::Document(_))) {
        doc.insert(META_FIELD, Document::new());
    }
    match doc.get_mut(META_FIELD) {
        Some(Bson::Document(meta)) => meta,
        _ => unreachable!("meta was just inserted"),
    }
}

/// Strip the reserved fields from a clone-out, for callers that want clean
/// user data.
pub fn without_reserved(doc: &Document) -> Document {
    let mut out = doc.clone();
    out.remove(ID_FIELD);
    out.remove(META_FIELD);
    out
}
