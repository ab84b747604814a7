mod common;
use common::*;

use bson::doc;
use tarn_db::{Collection, CollectionOptions, DynamicViewOptions};

// ── Transaction tests ───────────────────────────────────────────

#[test]
fn rollback_restores_count() {
    let mut col = plain_collection();
    seed_people(&mut col);
    col.start_transaction();
    col.insert(doc! { "name": "zoe", "age": 1 }).unwrap();
    assert_eq!(col.count(None).unwrap(), 6);
    col.rollback();
    assert_eq!(col.count(None).unwrap(), 5);
    assert!(col.find_one(&doc! { "name": "zoe" }).unwrap().is_none());
}

#[test]
fn commit_keeps_changes() {
    let mut col = plain_collection();
    seed_people(&mut col);
    col.start_transaction();
    col.insert(doc! { "name": "zoe", "age": 1 }).unwrap();
    col.commit();
    assert_eq!(col.count(None).unwrap(), 6);
}

#[test]
fn rollback_restores_updates_and_removes() {
    let mut col = plain_collection();
    seed_people(&mut col);
    col.start_transaction();
    let mut d = col.find_one(&doc! { "name": "alice" }).unwrap().unwrap();
    d.insert("age", 99);
    col.update(d).unwrap();
    col.remove(2).unwrap();
    col.rollback();
    let alice = col.find_one(&doc! { "name": "alice" }).unwrap().unwrap();
    assert_eq!(alice.get_i32("age").unwrap(), 30);
    assert!(col.get(2).is_some());
}

#[test]
fn rollback_restores_binary_indices() {
    let mut col = age_indexed_collection();
    seed_people(&mut col);
    col.start_transaction();
    col.insert(doc! { "name": "zoe", "age": 1 }).unwrap();
    col.remove(3).unwrap();
    col.rollback();
    assert!(col.check_index("age", Default::default()).unwrap());
    assert_eq!(
        names(&col.chain().simple_sort("age").data()),
        vec!["bob", "dave", "alice", "erin", "carol"]
    );
}

#[test]
fn transactional_collection_rolls_back_failed_insert() {
    let options = CollectionOptions {
        unique: vec!["name".to_string()],
        transactional: true,
        ..Default::default()
    };
    let mut col = Collection::new(COLLECTION, options);
    col.insert(doc! { "name": "a" }).unwrap();
    let before = col.count(None).unwrap();
    assert!(col.insert(doc! { "name": "a" }).is_err());
    assert_eq!(col.count(None).unwrap(), before);
    // the collection still accepts distinct values afterwards
    col.insert(doc! { "name": "b" }).unwrap();
    assert_eq!(col.count(None).unwrap(), 2);
}

#[test]
fn views_follow_rollback() {
    let mut col = plain_collection();
    seed_people(&mut col);
    let view = col.add_dynamic_view("french", DynamicViewOptions::default());
    view.apply_find(&doc! { "country": "fr" }).unwrap();
    assert_eq!(col.view_count("french").unwrap(), 3);

    col.start_transaction();
    col.insert(doc! { "name": "zoe", "country": "fr", "age": 20 }).unwrap();
    assert_eq!(col.view_count("french").unwrap(), 4);
    col.rollback();
    assert_eq!(col.view_count("french").unwrap(), 3);
}
