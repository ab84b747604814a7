mod changes;
mod collection;
mod daemon;
mod database;
mod document;
mod error;
mod events;
mod index;
mod resultset;
mod transform;
mod view;

pub use bson::{Bson, Document};

pub use changes::{change_delta, ChangeOp, ChangeRecord};
pub use collection::{CheckIndexOptions, Collection, CollectionOptions};
pub use daemon::{spawn_autosave, spawn_ttl_sweep, DaemonHandle};
pub use database::{
    CollectionSnapshot, Database, DatabaseSnapshot, SerializationFormat, DESTRUCTURED_DELIMITER,
    ENGINE_VERSION,
};
pub use document::{doc_id, now_millis, without_reserved, ID_FIELD, META_FIELD};
pub use error::DbError;
pub use events::{EventKind, EventPayload, EventRegistry};
pub use index::{BinaryIndex, ExactIndex, IndexRange, UniqueIndex};
pub use resultset::{JoinSource, Resultset};
pub use transform::{
    DocComparator, DocExtractor, DocMapper, DocMutator, DocPredicate, TransformStep,
    TransformStepRepr, ValuesReducer, PARAM_TOKEN,
};
pub use view::{
    DynamicView, DynamicViewOptions, SortPriority, ViewFilterSnapshot, ViewSnapshot, ViewSortRepr,
};

pub use tarn_persist::{Adapter, AdapterError, FsAdapter, MemoryAdapter};
pub use tarn_query::{
    Expr, FieldPath, FilterParseError, QueryOp, ScalarKey, SimpleSortOptions, SortCriterion,
    SortDirection,
};
