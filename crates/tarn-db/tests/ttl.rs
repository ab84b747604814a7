mod common;
use common::*;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use bson::doc;
use tarn_db::{now_millis, spawn_ttl_sweep, CollectionOptions, Database};

// ── TTL tests ───────────────────────────────────────────────────

#[test]
fn sweep_removes_documents_past_their_age() {
    let mut col = plain_collection();
    let now = now_millis();
    col.insert(doc! { "name": "stale", "meta": { "created": now - 200 } })
        .unwrap();
    col.set_ttl(100, 50);
    let removed = col.ttl_sweep_at(now).unwrap();
    assert_eq!(removed, 1);
    assert_eq!(col.count(None).unwrap(), 0);
}

#[test]
fn sweep_keeps_fresh_documents() {
    let mut col = plain_collection();
    col.set_ttl(60_000, 50);
    col.insert(doc! { "name": "fresh" }).unwrap();
    let removed = col.ttl_sweep_at(now_millis()).unwrap();
    assert_eq!(removed, 0);
    assert_eq!(col.count(None).unwrap(), 1);
}

#[test]
fn sweep_without_ttl_configured_is_a_no_op() {
    let mut col = plain_collection();
    seed_people(&mut col);
    let removed = col.ttl_sweep_at(now_millis() + 1_000_000).unwrap();
    assert_eq!(removed, 0);
    assert_eq!(col.count(None).unwrap(), 5);
}

#[test]
fn update_refreshes_the_expiration_clock() {
    let mut col = plain_collection();
    col.set_ttl(100, 50);
    let now = now_millis();
    let mut d = col
        .insert(doc! { "name": "a", "meta": { "created": now - 200 } })
        .unwrap();
    d.insert("touched", true);
    col.update(d).unwrap();
    // updated just now, so the old created timestamp no longer applies
    let removed = col.ttl_sweep_at(now).unwrap();
    assert_eq!(removed, 0);
}

#[test]
fn expired_documents_leave_indices_consistent() {
    let mut col = age_indexed_collection();
    col.set_ttl(100, 50);
    let now = now_millis();
    col.insert(doc! { "name": "old1", "age": 70, "meta": { "created": now - 500 } })
        .unwrap();
    col.insert(doc! { "name": "young", "age": 20 }).unwrap();
    col.insert(doc! { "name": "old2", "age": 80, "meta": { "created": now - 900 } })
        .unwrap();
    let removed = col.ttl_sweep_at(now).unwrap();
    assert_eq!(removed, 2);
    assert!(col.check_index("age", Default::default()).unwrap());
    assert_eq!(name_set(&col.data().to_vec()), vec!["young"]);
}

#[test]
fn sweep_daemon_purges_in_background() {
    let mut db = Database::new("ttl-test.db");
    let col = db.add_collection(COLLECTION, CollectionOptions::default());
    col.set_ttl(100, 10);
    let now = now_millis();
    col.insert(doc! { "name": "stale", "meta": { "created": now - 10_000 } })
        .unwrap();

    let db = Arc::new(RwLock::new(db));
    let handle = spawn_ttl_sweep(Arc::clone(&db), 10);
    let mut handle = handle.expect("sweep enabled");

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        {
            let db = db.read().unwrap();
            let count = db.get_collection(COLLECTION).unwrap().count(None).unwrap();
            if count == 0 {
                break;
            }
        }
        assert!(std::time::Instant::now() < deadline, "sweep never ran");
        std::thread::sleep(Duration::from_millis(20));
    }
    handle.stop();
}
