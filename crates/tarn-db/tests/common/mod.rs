use bson::doc;
use tarn_db::{Collection, CollectionOptions};

pub const COLLECTION: &str = "people";

pub fn plain_collection() -> Collection {
    Collection::new(COLLECTION, CollectionOptions::default())
}

pub fn age_indexed_collection() -> Collection {
    let options = CollectionOptions {
        indices: vec!["age".to_string()],
        ..Default::default()
    };
    Collection::new(COLLECTION, options)
}

/// Insert 5 seed records.
pub fn seed_people(col: &mut Collection) {
    col.insert_batch(vec![
        doc! { "name": "alice", "age": 30, "country": "fr" },
        doc! { "name": "bob", "age": 25, "country": "de" },
        doc! { "name": "carol", "age": 40, "country": "fr" },
        doc! { "name": "dave", "age": 28, "country": "us" },
        doc! { "name": "erin", "age": 35, "country": "fr" },
    ])
    .unwrap();
}

/// Names of the given documents, sorted, for set comparisons.
pub fn name_set(docs: &[bson::Document]) -> Vec<String> {
    let mut names: Vec<String> = docs
        .iter()
        .map(|d| d.get_str("name").unwrap().to_string())
        .collect();
    names.sort();
    names
}

/// Names in document order, for order-sensitive assertions.
pub fn names(docs: &[bson::Document]) -> Vec<String> {
    docs.iter()
        .map(|d| d.get_str("name").unwrap().to_string())
        .collect()
}
