mod common;
use common::*;

use bson::doc;
use tarn_db::{doc_id, DbError};

// ── Update tests ────────────────────────────────────────────────

#[test]
fn update_replaces_the_stored_document() {
    let mut col = plain_collection();
    let mut d = col.insert(doc! { "name": "a", "age": 30 }).unwrap();
    d.insert("age", 31);
    col.update(d).unwrap();
    let stored = col.get(1).unwrap();
    assert_eq!(stored.get_i32("age").unwrap(), 31);
    assert_eq!(col.len(), 1);
}

#[test]
fn update_bumps_revision_and_sets_updated() {
    let mut col = plain_collection();
    let mut d = col.insert(doc! { "name": "a" }).unwrap();
    d.insert("name", "b");
    let updated = col.update(d).unwrap();
    let meta = updated.get_document("meta").unwrap();
    assert_eq!(meta.get_i64("revision").unwrap(), 1);
    assert!(meta.get_i64("updated").unwrap() > 0);
}

#[test]
fn update_without_id_is_unsynced() {
    let mut col = plain_collection();
    col.insert(doc! { "name": "a" }).unwrap();
    let err = col.update(doc! { "name": "b" }).unwrap_err();
    assert!(matches!(err, DbError::UnsyncedDocument));
}

#[test]
fn update_unknown_id_is_not_found() {
    let mut col = plain_collection();
    let err = col.update(doc! { "$id": 42_i64, "name": "b" }).unwrap_err();
    assert!(matches!(err, DbError::NotFound(_)));
}

#[test]
fn update_keeps_id_index_parallel() {
    let mut col = plain_collection();
    seed_people(&mut col);
    let mut d = col.find_one(&doc! { "name": "carol" }).unwrap().unwrap();
    d.insert("age", 41);
    col.update(d).unwrap();
    assert_eq!(col.len(), 5);
    // every document is still found at its own position
    for (i, doc) in col.data().iter().enumerate() {
        let id = doc_id(doc).unwrap();
        let (_, pos) = col.get_with_position(id).unwrap();
        assert_eq!(pos, i);
    }
}

#[test]
fn update_maintains_adaptive_binary_index() {
    let mut col = age_indexed_collection();
    seed_people(&mut col);
    let mut d = col.find_one(&doc! { "name": "bob" }).unwrap().unwrap();
    d.insert("age", 99);
    col.update(d).unwrap();
    assert!(col.check_index("age", Default::default()).unwrap());
    let oldest = col.chain().simple_sort("age").data();
    assert_eq!(names(&oldest).last().map(String::as_str), Some("bob"));
}

#[test]
fn find_and_update_applies_to_all_matches() {
    let mut col = plain_collection();
    seed_people(&mut col);
    let touched = col
        .find_and_update(&doc! { "country": "fr" }, |d| {
            d.insert("flagged", true);
        })
        .unwrap();
    assert_eq!(touched, 3);
    let flagged = col.find(&doc! { "flagged": true }).unwrap();
    assert_eq!(name_set(&flagged), vec!["alice", "carol", "erin"]);
}

#[test]
fn update_where_uses_predicate() {
    let mut col = plain_collection();
    seed_people(&mut col);
    let touched = col
        .update_where(
            |d| d.get_i32("age").unwrap_or(0) >= 35,
            |d| {
                d.insert("senior", true);
            },
        )
        .unwrap();
    assert_eq!(touched, 2);
}

#[test]
fn delta_changes_record_only_modified_fields() {
    let mut col = plain_collection();
    col.set_changes_api(true);
    let mut d = col.insert(doc! { "name": "a", "age": 30 }).unwrap();
    col.flush_changes();
    col.set_delta_changes(true);
    d.insert("age", 31);
    col.update(d).unwrap();
    let changes = col.changes();
    assert_eq!(changes.len(), 1);
    assert!(changes[0].obj.get("age").is_some());
    assert!(changes[0].obj.get("name").is_none());
}
