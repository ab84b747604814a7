mod common;
use common::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bson::doc;
use tarn_db::{doc_id, Collection, CollectionOptions, DbError, EventKind, EventPayload};

// ── Insert tests ────────────────────────────────────────────────

#[test]
fn insert_assigns_sequential_ids() {
    let mut col = plain_collection();
    let a = col.insert(doc! { "name": "a" }).unwrap();
    let b = col.insert(doc! { "name": "b" }).unwrap();
    assert_eq!(doc_id(&a), Some(1));
    assert_eq!(doc_id(&b), Some(2));
    assert_eq!(col.max_id(), 2);
}

#[test]
fn insert_stamps_meta() {
    let mut col = plain_collection();
    let d = col.insert(doc! { "name": "a" }).unwrap();
    let meta = d.get_document("meta").unwrap();
    assert!(meta.get_i64("created").unwrap() > 0);
    assert_eq!(meta.get_i64("revision").unwrap(), 0);
}

#[test]
fn insert_with_meta_disabled_skips_stamping() {
    let options = CollectionOptions {
        disable_meta: true,
        ..Default::default()
    };
    let mut col = Collection::new(COLLECTION, options);
    let d = col.insert(doc! { "name": "a" }).unwrap();
    assert!(d.get_document("meta").is_err());
}

#[test]
fn insert_rejects_document_with_id() {
    let mut col = plain_collection();
    let err = col.insert(doc! { "$id": 9_i64, "name": "a" }).unwrap_err();
    assert!(matches!(err, DbError::InvalidArgument(_)));
    assert_eq!(col.len(), 0);
}

#[test]
fn ids_are_never_reused() {
    let mut col = plain_collection();
    let a = col.insert(doc! { "name": "a" }).unwrap();
    col.remove(doc_id(&a).unwrap()).unwrap();
    let b = col.insert(doc! { "name": "b" }).unwrap();
    assert_eq!(doc_id(&b), Some(2));
}

#[test]
fn batch_insert_returns_all_documents() {
    let mut col = plain_collection();
    seed_people(&mut col);
    assert_eq!(col.len(), 5);
    assert_eq!(col.count(None).unwrap(), 5);
}

#[test]
fn large_batch_insert_keeps_index_consistent() {
    let mut col = age_indexed_collection();
    let docs: Vec<_> = (0..250)
        .map(|i| doc! { "name": format!("p{i}"), "age": (250 - i) })
        .collect();
    col.insert_batch(docs).unwrap();
    assert!(col.check_index("age", Default::default()).unwrap());
    let young = col.find(&doc! { "age": { "$lt": 10 } }).unwrap();
    assert_eq!(young.len(), 9);
}

#[test]
fn pre_insert_fires_before_insert() {
    let mut col = plain_collection();
    let order = Arc::new(Mutex::new(Vec::new()));
    let pre = Arc::clone(&order);
    let post = Arc::clone(&order);
    col.on(EventKind::PreInsert, move |_| {
        pre.lock().unwrap().push("pre-insert");
    });
    col.on(EventKind::Insert, move |_| {
        post.lock().unwrap().push("insert");
    });
    col.insert(doc! { "name": "a" }).unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["pre-insert", "insert"]);
}

#[test]
fn insert_event_sees_assigned_id() {
    let mut col = plain_collection();
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_in_event = Arc::clone(&seen);
    col.on(EventKind::Insert, move |payload| {
        if let EventPayload::Document(doc) = payload {
            if doc_id(doc).is_some() {
                seen_in_event.fetch_add(1, Ordering::SeqCst);
            }
        }
    });
    col.insert(doc! { "name": "a" }).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn insert_records_change_when_enabled() {
    let mut col = plain_collection();
    col.set_changes_api(true);
    col.insert(doc! { "name": "a" }).unwrap();
    let changes = col.changes();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].name, COLLECTION);
    assert_eq!(changes[0].obj.get_str("name").unwrap(), "a");
}
