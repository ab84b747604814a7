mod common;
use common::*;

use bson::doc;
use tarn_db::{doc_id, Collection, DynamicViewOptions, SimpleSortOptions, SortCriterion, SortPriority};

// ── Dynamic view tests ──────────────────────────────────────────

fn with_fr_view(col: &mut Collection) {
    let view = col.add_dynamic_view("french", DynamicViewOptions::default());
    view.apply_find(&doc! { "country": "fr" }).unwrap();
}

/// The view's member set must always equal a fresh evaluation of its
/// filter against the collection.
fn assert_view_matches_fresh_eval(col: &mut Collection) {
    let fresh = name_set(&col.find(&doc! { "country": "fr" }).unwrap());
    let through_view = name_set(&col.view_data("french").unwrap());
    assert_eq!(through_view, fresh);
}

#[test]
fn view_sees_existing_documents() {
    let mut col = plain_collection();
    seed_people(&mut col);
    with_fr_view(&mut col);
    assert_eq!(col.view_count("french").unwrap(), 3);
    assert_view_matches_fresh_eval(&mut col);
}

#[test]
fn view_tracks_inserts_incrementally() {
    let mut col = plain_collection();
    with_fr_view(&mut col);
    seed_people(&mut col);
    col.insert(doc! { "name": "zoe", "country": "fr", "age": 22 }).unwrap();
    assert_eq!(col.view_count("french").unwrap(), 4);
    assert_view_matches_fresh_eval(&mut col);
}

#[test]
fn view_tracks_updates_in_and_out() {
    let mut col = plain_collection();
    with_fr_view(&mut col);
    seed_people(&mut col);
    // force the initial materialization, then mutate
    col.view_data("french").unwrap();

    let mut bob = col.find_one(&doc! { "name": "bob" }).unwrap().unwrap();
    bob.insert("country", "fr");
    col.update(bob).unwrap();
    assert_view_matches_fresh_eval(&mut col);

    let mut alice = col.find_one(&doc! { "name": "alice" }).unwrap().unwrap();
    alice.insert("country", "it");
    col.update(alice).unwrap();
    assert_view_matches_fresh_eval(&mut col);
}

#[test]
fn view_tracks_removes_with_position_shifts() {
    let mut col = plain_collection();
    with_fr_view(&mut col);
    seed_people(&mut col);
    col.view_data("french").unwrap();

    // removing a non-member before the members shifts their positions
    let bob = col.find_one(&doc! { "name": "bob" }).unwrap().unwrap();
    col.remove(doc_id(&bob).unwrap()).unwrap();
    assert_view_matches_fresh_eval(&mut col);

    // removing a member drops it from the view
    let carol = col.find_one(&doc! { "name": "carol" }).unwrap().unwrap();
    col.remove(doc_id(&carol).unwrap()).unwrap();
    assert_view_matches_fresh_eval(&mut col);
    assert_eq!(col.view_count("french").unwrap(), 2);
}

#[test]
fn view_batch_remove() {
    let mut col = plain_collection();
    with_fr_view(&mut col);
    seed_people(&mut col);
    col.view_data("french").unwrap();
    col.remove_batch(&[1, 2, 4]).unwrap();
    assert_view_matches_fresh_eval(&mut col);
}

#[test]
fn sorted_view_orders_members() {
    let mut col = plain_collection();
    seed_people(&mut col);
    let view = col.add_dynamic_view("by_age", DynamicViewOptions::default());
    view.apply_find(&doc! { "country": "fr" }).unwrap();
    view.apply_simple_sort("age", SimpleSortOptions::default());
    assert_eq!(names(&col.view_data("by_age").unwrap()), vec!["alice", "erin", "carol"]);

    // a new member lands in sort position on the next read
    col.insert(doc! { "name": "zoe", "country": "fr", "age": 33 }).unwrap();
    assert_eq!(
        names(&col.view_data("by_age").unwrap()),
        vec!["alice", "zoe", "erin", "carol"]
    );
}

#[test]
fn active_sort_priority_sorts_on_mutation() {
    let mut col = plain_collection();
    seed_people(&mut col);
    let view = col.add_dynamic_view(
        "active",
        DynamicViewOptions {
            sort_priority: SortPriority::Active,
            ..Default::default()
        },
    );
    view.apply_find(&doc! { "country": "fr" }).unwrap();
    view.apply_sort_criteria(vec![SortCriterion::desc("age")]);
    col.view_data("active").unwrap();
    col.insert(doc! { "name": "zoe", "country": "fr", "age": 55 }).unwrap();
    assert_eq!(
        names(&col.view_data("active").unwrap()),
        vec!["zoe", "carol", "erin", "alice"]
    );
}

#[test]
fn view_where_filters_compose() {
    let mut col = plain_collection();
    seed_people(&mut col);
    let view = col.add_dynamic_view("young_fr", DynamicViewOptions::default());
    view.apply_find(&doc! { "country": "fr" }).unwrap();
    view.apply_where(|d| d.get_i32("age").unwrap_or(0) < 36);
    assert_eq!(name_set(&col.view_data("young_fr").unwrap()), vec!["alice", "erin"]);
}

#[test]
fn filters_replace_by_uid_and_remove() {
    let mut col = plain_collection();
    seed_people(&mut col);
    let view = col.add_dynamic_view("v", DynamicViewOptions::default());
    view.apply_find_uid(&doc! { "country": "fr" }, Some("country")).unwrap();
    assert_eq!(col.view_count("v").unwrap(), 3);

    let view = col.get_dynamic_view_mut("v").unwrap();
    view.apply_find_uid(&doc! { "country": "de" }, Some("country")).unwrap();
    assert_eq!(col.view_count("v").unwrap(), 1);

    let view = col.get_dynamic_view_mut("v").unwrap();
    view.remove_filter("country").unwrap();
    assert_eq!(col.view_count("v").unwrap(), 5);
}

#[test]
fn persistent_view_caches_result_data() {
    let mut col = plain_collection();
    seed_people(&mut col);
    let view = col.add_dynamic_view(
        "cached",
        DynamicViewOptions {
            persistent: true,
            ..Default::default()
        },
    );
    view.apply_find(&doc! { "country": "fr" }).unwrap();
    let first = col.view_data("cached").unwrap();
    let second = col.view_data("cached").unwrap();
    assert_eq!(name_set(&first), name_set(&second));
    col.insert(doc! { "name": "zoe", "country": "fr", "age": 1 }).unwrap();
    assert_eq!(col.view_data("cached").unwrap().len(), 4);
}

#[test]
fn rematerialize_rebuilds_from_scratch() {
    let mut col = plain_collection();
    seed_people(&mut col);
    with_fr_view(&mut col);
    col.view_data("french").unwrap();
    col.rematerialize_view("french").unwrap();
    assert_view_matches_fresh_eval(&mut col);
}

#[test]
fn view_branch_chains_from_members() {
    let mut col = plain_collection();
    seed_people(&mut col);
    with_fr_view(&mut col);
    let youngest = col
        .view_branch("french")
        .unwrap()
        .simple_sort("age")
        .limit(1)
        .data();
    assert_eq!(names(&youngest), vec!["alice"]);
}

#[test]
fn removing_a_view_stops_maintenance() {
    let mut col = plain_collection();
    seed_people(&mut col);
    with_fr_view(&mut col);
    assert!(col.remove_dynamic_view("french").is_some());
    assert!(col.get_dynamic_view("french").is_none());
    assert!(col.view_data("french").is_err());
}
