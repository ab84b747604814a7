use std::fmt;

use tarn_persist::AdapterError;
use tarn_query::FilterParseError;

#[derive(Debug)]
pub enum DbError {
    /// Malformed input: non-document insert, bad id, invalid sort key.
    InvalidArgument(String),
    /// A unique constraint saw an existing key.
    DuplicateKey(String),
    /// `update` was called with a document that has no `$id`.
    UnsyncedDocument,
    /// An `$id` that is not present in the collection.
    NotFound(String),
    CollectionNotFound(String),
    /// A binary index that does not exist, or failed validation.
    InvalidIndex(String),
    /// Unknown transform reference or malformed transform step.
    Transform(String),
    Query(FilterParseError),
    Serialization(String),
    Adapter(AdapterError),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            DbError::DuplicateKey(key) => write!(f, "duplicate key: {key}"),
            DbError::UnsyncedDocument => {
                write!(f, "document has no $id; it was never inserted into this collection")
            }
            DbError::NotFound(id) => write!(f, "not found: {id}"),
            DbError::CollectionNotFound(name) => write!(f, "collection not found: {name}"),
            DbError::InvalidIndex(name) => write!(f, "invalid index: {name}"),
            DbError::Transform(msg) => write!(f, "transform error: {msg}"),
            DbError::Query(e) => write!(f, "{e}"),
            DbError::Serialization(msg) => write!(f, "serialization error: {msg}"),
            DbError::Adapter(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for DbError {}

impl From<FilterParseError> for DbError {
    fn from(e: FilterParseError) -> Self {
        DbError::Query(e)
    }
}

impl From<AdapterError> for DbError {
    fn from(e: AdapterError) -> Self {
        DbError::Adapter(e)
    }
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Serialization(e.to_string())
    }
}
