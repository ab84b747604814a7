mod common;
use common::*;

use bson::doc;
use tarn_db::{Collection, CollectionOptions, SimpleSortOptions, SortCriterion};

// ── Resultset pipeline tests ────────────────────────────────────

#[test]
fn uninitialized_resultset_yields_whole_collection() {
    let mut col = plain_collection();
    seed_people(&mut col);
    let rs = col.chain();
    assert_eq!(rs.count(), 5);
    assert_eq!(rs.data().len(), 5);
}

#[test]
fn initialized_empty_resultset_means_no_matches() {
    let mut col = plain_collection();
    seed_people(&mut col);
    let rs = col.chain().find(&doc! { "country": "jp" }).unwrap();
    assert_eq!(rs.count(), 0);
    assert!(rs.data().is_empty());
}

#[test]
fn chained_find_sort_limit() {
    let mut col = plain_collection();
    seed_people(&mut col);
    let results = col
        .chain()
        .find(&doc! { "country": "fr" })
        .unwrap()
        .simple_sort("age")
        .limit(2)
        .data();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|d| d.get_str("country") == Ok("fr")));
    assert_eq!(names(&results), vec!["alice", "erin"]);
}

#[test]
fn simple_sort_is_idempotent() {
    let mut col = plain_collection();
    seed_people(&mut col);
    let once = names(&col.chain().simple_sort("age").data());
    let twice = names(&col.chain().simple_sort("age").simple_sort("age").data());
    assert_eq!(once, twice);
}

#[test]
fn simple_sort_descending() {
    let mut col = plain_collection();
    seed_people(&mut col);
    let results = col.chain().simple_sort_opts(
        "age",
        SimpleSortOptions {
            desc: true,
            ..Default::default()
        },
    );
    assert_eq!(
        names(&results.data()),
        vec!["carol", "erin", "alice", "dave", "bob"]
    );
}

#[test]
fn indexed_sort_shortcut_matches_comparator_sort() {
    let mut indexed = age_indexed_collection();
    let mut plain = plain_collection();
    seed_people(&mut indexed);
    seed_people(&mut plain);
    assert_eq!(
        names(&indexed.chain().simple_sort("age").data()),
        names(&plain.chain().simple_sort("age").data())
    );
    // filtered pipelines agree too (index intersection path)
    let filter = doc! { "age": { "$gte": 28 } };
    assert_eq!(
        names(&indexed.chain().find(&filter).unwrap().simple_sort("age").data()),
        names(&plain.chain().find(&filter).unwrap().simple_sort("age").data())
    );
}

#[test]
fn compound_sort_breaks_ties() {
    let mut col = plain_collection();
    col.insert_batch(vec![
        doc! { "name": "a", "group": 2, "age": 30 },
        doc! { "name": "b", "group": 1, "age": 40 },
        doc! { "name": "c", "group": 1, "age": 20 },
        doc! { "name": "d", "group": 2, "age": 10 },
    ])
    .unwrap();
    let results = col
        .chain()
        .compound_sort(&[SortCriterion::asc("group"), SortCriterion::desc("age")])
        .data();
    assert_eq!(names(&results), vec!["b", "c", "a", "d"]);
}

#[test]
fn custom_sort_comparator() {
    let mut col = plain_collection();
    seed_people(&mut col);
    let results = col
        .chain()
        .sort(|a, b| a.get_str("name").unwrap_or("").len().cmp(&b.get_str("name").unwrap_or("").len()))
        .data();
    assert_eq!(results.len(), 5);
    assert_eq!(results[0].get_str("name").unwrap(), "bob");
}

#[test]
fn limit_and_offset_page_through_rows() {
    let mut col = plain_collection();
    seed_people(&mut col);
    let page = col.chain().simple_sort("age").offset(1).limit(2).data();
    assert_eq!(names(&page), vec!["dave", "alice"]);
    let rest = col.chain().simple_sort("age").offset(4).data();
    assert_eq!(names(&rest), vec!["carol"]);
    // offset past the end leaves nothing
    assert!(col.chain().offset(99).data().is_empty());
}

#[test]
fn branch_runs_parallel_pipelines() {
    let mut col = plain_collection();
    seed_people(&mut col);
    let base = col.chain().find(&doc! { "country": "fr" }).unwrap();
    let young = base.branch().find(&doc! { "age": { "$lt": 32 } }).unwrap();
    let old = base.branch().find(&doc! { "age": { "$gte": 32 } }).unwrap();
    assert_eq!(young.count() + old.count(), base.count());
}

#[test]
fn find_or_preserves_first_occurrence_order() {
    let mut col = plain_collection();
    seed_people(&mut col);
    let rs = col
        .chain()
        .find_or(&[doc! { "country": "fr" }, doc! { "age": { "$lt": 29 } }])
        .unwrap();
    // branch one in data order, then branch-two members not already present
    assert_eq!(names(&rs.data()), vec!["alice", "carol", "erin", "bob", "dave"]);
}

#[test]
fn find_and_narrows_sequentially() {
    let mut col = plain_collection();
    seed_people(&mut col);
    let rs = col
        .chain()
        .find_and(&[doc! { "country": "fr" }, doc! { "age": { "$gt": 32 } }])
        .unwrap();
    assert_eq!(name_set(&rs.data()), vec!["carol", "erin"]);
}

#[test]
fn eq_join_pairs_orders_with_products() {
    let mut products = plain_collection();
    products
        .insert_batch(vec![
            doc! { "productId": 1, "label": "anvil" },
            doc! { "productId": 2, "label": "rope" },
        ])
        .unwrap();
    let mut orders = Collection::new("orders", CollectionOptions::default());
    orders
        .insert_batch(vec![
            doc! { "orderId": 10, "prodId": 1, "qty": 2 },
            doc! { "orderId": 11, "prodId": 2, "qty": 1 },
            doc! { "orderId": 12, "prodId": 1, "qty": 5 },
        ])
        .unwrap();
    let joined = orders
        .chain()
        .eq_join(&products, "prodId", "productId", None)
        .unwrap()
        .data();
    assert_eq!(joined.len(), 3);
    for row in &joined {
        let left = row.get_document("left").unwrap();
        let right = row.get_document("right").unwrap();
        assert_eq!(
            left.get_i32("prodId").unwrap(),
            right.get_i32("productId").unwrap()
        );
        assert!(right.get_str("label").is_ok());
    }
}

#[test]
fn eq_join_with_map_fn_shapes_rows() {
    let mut products = plain_collection();
    products
        .insert_batch(vec![doc! { "productId": 1, "label": "anvil" }])
        .unwrap();
    let orders = vec![doc! { "prodId": 1, "qty": 2 }];
    let mut left = plain_collection();
    left.insert_batch(orders).unwrap();
    let joined = left
        .chain()
        .eq_join(
            &products,
            "prodId",
            "productId",
            Some(&|l, r| doc! { "qty": l.get_i32("qty").unwrap_or(0), "label": r.get_str("label").unwrap_or("") }),
        )
        .unwrap()
        .data();
    assert_eq!(joined.len(), 1);
    assert_eq!(joined[0].get_str("label").unwrap(), "anvil");
    assert_eq!(joined[0].get_i32("qty").unwrap(), 2);
}

#[test]
fn map_rebinds_to_projected_rows() {
    let mut col = plain_collection();
    seed_people(&mut col);
    let projected = col
        .chain()
        .find(&doc! { "country": "fr" })
        .unwrap()
        .map(|d| doc! { "n": d.get_str("name").unwrap_or("") })
        .unwrap()
        .find(&doc! { "n": { "$regex": "^[ac]" } })
        .unwrap()
        .data();
    assert_eq!(projected.len(), 2);
}

#[test]
fn map_reduce_computes_aggregate() {
    let mut col = plain_collection();
    seed_people(&mut col);
    let avg_age = col.chain().map_reduce(
        |d| f64::from(d.get_i32("age").unwrap_or(0)),
        |ages| ages.iter().sum::<f64>() / ages.len() as f64,
    );
    assert!((avg_age - 31.6).abs() < 1e-9);
}

