use std::collections::HashMap;

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tarn_query::{
    cmp_values, compare_documents, compare_on, to_number, Expr, FieldPath, ScalarKey,
};

use crate::changes::{change_delta, ChangeOp, ChangeRecord};
use crate::document::{
    age_reference, doc_id, now_millis, set_doc_id, stamp_created, stamp_updated, without_reserved,
};
use crate::error::DbError;
use crate::events::{EventKind, EventPayload, EventRegistry};
use crate::index::{BinaryIndex, ExactIndex, UniqueIndex};
use crate::resultset::{join_rows, Resultset};
use crate::transform::TransformStep;
use crate::view::{DynamicView, DynamicViewOptions, SortPriority};

fn default_true() -> bool {
    true
}

/// Batch inserts at least this large flag adaptive indices dirty and
/// rebuild once at the end instead of splicing per document.
const BATCH_REBUILD_THRESHOLD: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionOptions {
    /// Fields carrying a uniqueness constraint.
    #[serde(default)]
    pub unique: Vec<String>,
    /// Fields carrying an exact-match index.
    #[serde(default)]
    pub exact: Vec<String>,
    /// Properties to binary-index up front.
    #[serde(default)]
    pub indices: Vec<String>,
    /// Splice binary indices on every mutation instead of flagging dirty.
    #[serde(default = "default_true")]
    pub adaptive_binary_indices: bool,
    /// Wrap every mutation in an implicit transaction.
    #[serde(default)]
    pub transactional: bool,
    #[serde(default = "default_true")]
    pub disable_changes_api: bool,
    #[serde(default = "default_true")]
    pub disable_delta_changes_api: bool,
    /// Skip `meta` stamping entirely.
    #[serde(default)]
    pub disable_meta: bool,
    /// Documents older than this many milliseconds expire.
    #[serde(default)]
    pub ttl_age_ms: Option<i64>,
    /// How often the sweep daemon visits this collection.
    #[serde(default)]
    pub ttl_interval_ms: Option<u64>,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            unique: Vec::new(),
            exact: Vec::new(),
            indices: Vec::new(),
            adaptive_binary_indices: true,
            transactional: false,
            disable_changes_api: true,
            disable_delta_changes_api: true,
            disable_meta: false,
            ttl_age_ms: None,
            ttl_interval_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CheckIndexOptions {
    /// Validate a random sample of adjacent pairs instead of all of them.
    pub random_sampling: bool,
    /// Fraction of adjacent pairs to sample (default 0.1).
    pub sampling_factor: Option<f64>,
    /// Rebuild the index when validation fails.
    pub repair: bool,
}

#[derive(Debug, Clone)]
struct TxnSnapshot {
    data: Vec<Document>,
    id_index: Vec<i64>,
    binary_indices: HashMap<String, BinaryIndex>,
    dirty_ids: Vec<i64>,
    max_id: i64,
}

/// A named set of schemaless documents plus everything derived from them:
/// the `$id` index, binary/unique/exact indices, named transforms, dynamic
/// views, the change log.
///
/// `data` and `id_index` are parallel: `id_index[i] == data[i].$id` always,
/// and `id_index` stays ascending because ids are assigned monotonically
/// and never reused, so `get` is a binary search.
#[derive(Debug, Clone)]
pub struct Collection {
    pub name: String,
    pub(crate) data: Vec<Document>,
    pub(crate) id_index: Vec<i64>,
    pub(crate) max_id: i64,
    pub(crate) binary_indices: HashMap<String, BinaryIndex>,
    pub(crate) unique_indices: HashMap<String, UniqueIndex>,
    pub(crate) exact_indices: HashMap<String, ExactIndex>,
    pub(crate) transforms: HashMap<String, Vec<TransformStep>>,
    pub(crate) views: Vec<DynamicView>,
    pub(crate) options: CollectionOptions,
    pub(crate) changes: Vec<ChangeRecord>,
    pub(crate) dirty_ids: Vec<i64>,
    /// Set on any mutation; cleared by a successful database save.
    pub(crate) dirty: bool,
    pub(crate) events: EventRegistry,
    txn: Option<TxnSnapshot>,
}

impl Collection {
    pub fn new(name: &str, options: CollectionOptions) -> Collection {
        let mut collection = Collection {
            name: name.to_string(),
            data: Vec::new(),
            id_index: Vec::new(),
            max_id: 0,
            binary_indices: HashMap::new(),
            unique_indices: HashMap::new(),
            exact_indices: HashMap::new(),
            transforms: HashMap::new(),
            views: Vec::new(),
            options,
            changes: Vec::new(),
            dirty_ids: Vec::new(),
            dirty: false,
            events: EventRegistry::default(),
            txn: None,
        };
        for field in collection.options.unique.clone() {
            collection
                .unique_indices
                .insert(field.clone(), UniqueIndex::new(&field));
        }
        for field in collection.options.exact.clone() {
            collection
                .exact_indices
                .insert(field.clone(), ExactIndex::new(&field));
        }
        for property in collection.options.indices.clone() {
            let mut idx = BinaryIndex::new(&property);
            idx.rebuild(&collection.data);
            collection.binary_indices.insert(property, idx);
        }
        collection
    }

    /// Detached collection backing `map`/`eqJoin` results. Incoming rows
    /// are stripped of reserved fields and re-inserted from scratch.
    pub(crate) fn anonymous(name: &str, rows: Vec<Document>) -> Result<Collection, DbError> {
        let mut collection = Collection::new(name, CollectionOptions::default());
        for row in rows {
            collection.insert(without_reserved(&row))?;
        }
        Ok(collection)
    }

    // ── Accessors ───────────────────────────────────────────────

    /// The document vector, in insertion order. Read-only: all mutation
    /// goes through `insert`/`update`/`remove` so indices stay consistent.
    pub fn data(&self) -> &[Document] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn max_id(&self) -> i64 {
        self.max_id
    }

    pub(crate) fn binary_index(&self, property: &str) -> Option<&BinaryIndex> {
        self.binary_indices.get(property)
    }

    /// Register an event listener.
    pub fn on<F>(&mut self, kind: EventKind, listener: F)
    where
        F: Fn(&EventPayload<'_>) + Send + Sync + 'static,
    {
        self.events.on(kind, listener);
    }

    // ── Insert ──────────────────────────────────────────────────

    /// Insert a document, assigning its `$id` and stamping `meta`. The
    /// inserted form (ids and meta included) is returned.
    pub fn insert(&mut self, doc: Document) -> Result<Document, DbError> {
        self.events
            .emit(EventKind::PreInsert, &EventPayload::Document(&doc));
        let implicit = self.options.transactional && self.txn.is_none();
        if implicit {
            self.start_transaction();
        }
        match self.insert_inner(doc) {
            Ok(inserted) => {
                if implicit {
                    self.commit();
                }
                self.events
                    .emit(EventKind::Insert, &EventPayload::Document(&inserted));
                Ok(inserted)
            }
            Err(e) => {
                if implicit {
                    self.rollback();
                }
                self.events.emit(EventKind::Error, &EventPayload::Error(&e));
                Err(e)
            }
        }
    }

    /// Insert many documents. Large batches defer adaptive index
    /// maintenance to a single rebuild.
    pub fn insert_batch(&mut self, docs: Vec<Document>) -> Result<Vec<Document>, DbError> {
        let batch_rebuild = self.options.adaptive_binary_indices
            && docs.len() >= BATCH_REBUILD_THRESHOLD
            && !self.binary_indices.is_empty();
        if batch_rebuild {
            for idx in self.binary_indices.values_mut() {
                idx.dirty = true;
            }
        }
        let mut inserted = Vec::with_capacity(docs.len());
        for doc in docs {
            inserted.push(self.insert(doc)?);
        }
        if batch_rebuild {
            self.ensure_all_indexes(false);
        }
        Ok(inserted)
    }

    fn insert_inner(&mut self, mut doc: Document) -> Result<Document, DbError> {
        if doc_id(&doc).is_some() {
            return Err(DbError::InvalidArgument(
                "document already has an $id; use update".into(),
            ));
        }
        let id = self.max_id + 1;
        set_doc_id(&mut doc, id);
        if !self.options.disable_meta {
            stamp_created(&mut doc, now_millis());
        }

        // unique constraints first, unwinding on failure
        let unique_names: Vec<String> = self.unique_indices.keys().cloned().collect();
        for (i, name) in unique_names.iter().enumerate() {
            let result = match self.unique_indices.get_mut(name) {
                Some(idx) => idx.set(&doc),
                None => Ok(()),
            };
            if let Err(e) = result {
                for prior in &unique_names[..i] {
                    if let Some(idx) = self.unique_indices.get_mut(prior) {
                        idx.remove_id(id);
                    }
                }
                return Err(e);
            }
        }
        for idx in self.exact_indices.values_mut() {
            idx.add(&doc);
        }

        let pos = self.data.len();
        self.data.push(doc);
        self.id_index.push(id);
        self.max_id = id;

        let adaptive = self.options.adaptive_binary_indices;
        for idx in self.binary_indices.values_mut() {
            if adaptive && !idx.dirty {
                idx.insert(&self.data, pos);
            } else {
                idx.dirty = true;
            }
        }

        let (data, views) = (&self.data, &mut self.views);
        for view in views.iter_mut() {
            view.evaluate_document(data, pos, true);
            if view.sort_priority() == SortPriority::Active {
                view.ensure_sorted(data);
            }
        }

        self.dirty = true;
        self.dirty_ids.push(id);
        if !self.options.disable_changes_api {
            self.changes.push(ChangeRecord {
                name: self.name.clone(),
                operation: ChangeOp::Insert,
                obj: self.data[pos].clone(),
            });
        }
        Ok(self.data[pos].clone())
    }

    // ── Update ──────────────────────────────────────────────────

    /// Replace the stored document carrying the same `$id`. The document
    /// must have been obtained from this collection.
    pub fn update(&mut self, doc: Document) -> Result<Document, DbError> {
        self.events
            .emit(EventKind::PreUpdate, &EventPayload::Document(&doc));
        let implicit = self.options.transactional && self.txn.is_none();
        if implicit {
            self.start_transaction();
        }
        match self.update_inner(doc) {
            Ok(updated) => {
                if implicit {
                    self.commit();
                }
                self.events
                    .emit(EventKind::Update, &EventPayload::Document(&updated));
                Ok(updated)
            }
            Err(e) => {
                if implicit {
                    self.rollback();
                }
                self.events.emit(EventKind::Error, &EventPayload::Error(&e));
                Err(e)
            }
        }
    }

    fn update_inner(&mut self, mut doc: Document) -> Result<Document, DbError> {
        let id = doc_id(&doc).ok_or(DbError::UnsyncedDocument)?;
        let pos = self
            .position_of(id)
            .ok_or_else(|| DbError::NotFound(id.to_string()))?;
        let old = self.data[pos].clone();

        let unique_names: Vec<String> = self.unique_indices.keys().cloned().collect();
        for (i, name) in unique_names.iter().enumerate() {
            let result = match self.unique_indices.get_mut(name) {
                Some(idx) => idx.update(&old, &doc),
                None => Ok(()),
            };
            if let Err(e) = result {
                for prior in &unique_names[..i] {
                    if let Some(idx) = self.unique_indices.get_mut(prior) {
                        let _ = idx.update(&doc, &old);
                    }
                }
                return Err(e);
            }
        }
        for idx in self.exact_indices.values_mut() {
            idx.update(&old, &doc);
        }

        if !self.options.disable_meta {
            stamp_updated(&mut doc, now_millis());
        }
        self.data[pos] = doc;

        let adaptive = self.options.adaptive_binary_indices;
        for idx in self.binary_indices.values_mut() {
            if adaptive && !idx.dirty {
                idx.update(&self.data, pos, &old);
            } else {
                idx.dirty = true;
            }
        }

        let (data, views) = (&self.data, &mut self.views);
        for view in views.iter_mut() {
            view.evaluate_document(data, pos, false);
            if view.sort_priority() == SortPriority::Active {
                view.ensure_sorted(data);
            }
        }

        self.dirty = true;
        self.dirty_ids.push(id);
        if !self.options.disable_changes_api {
            let obj = if self.options.disable_delta_changes_api {
                self.data[pos].clone()
            } else {
                change_delta(&old, &self.data[pos])
            };
            self.changes.push(ChangeRecord {
                name: self.name.clone(),
                operation: ChangeOp::Update,
                obj,
            });
        }
        Ok(self.data[pos].clone())
    }

    // ── Remove ──────────────────────────────────────────────────

    /// Remove one document by `$id`, returning it.
    pub fn remove(&mut self, id: i64) -> Result<Document, DbError> {
        let pos = self
            .position_of(id)
            .ok_or_else(|| DbError::NotFound(id.to_string()))?;
        let mut removed = self.remove_positions(vec![pos])?;
        removed
            .pop()
            .ok_or_else(|| DbError::NotFound(id.to_string()))
    }

    /// Remove a document previously returned by this collection.
    pub fn remove_doc(&mut self, doc: &Document) -> Result<Document, DbError> {
        let id = doc_id(doc).ok_or(DbError::UnsyncedDocument)?;
        self.remove(id)
    }

    /// Remove many documents by `$id`.
    pub fn remove_batch(&mut self, ids: &[i64]) -> Result<Vec<Document>, DbError> {
        let mut positions = Vec::with_capacity(ids.len());
        for &id in ids {
            positions.push(
                self.position_of(id)
                    .ok_or_else(|| DbError::NotFound(id.to_string()))?,
            );
        }
        self.remove_positions(positions)
    }

    /// Remove the documents at the given data positions (the resultset
    /// terminator path).
    pub fn remove_batch_by_positions(
        &mut self,
        positions: Vec<usize>,
    ) -> Result<Vec<Document>, DbError> {
        self.remove_positions(positions)
    }

    fn remove_positions(&mut self, mut positions: Vec<usize>) -> Result<Vec<Document>, DbError> {
        let implicit = self.options.transactional && self.txn.is_none();
        if implicit {
            self.start_transaction();
        }
        match self.remove_positions_inner(&mut positions) {
            Ok(removed) => {
                if implicit {
                    self.commit();
                }
                for doc in &removed {
                    self.events
                        .emit(EventKind::Delete, &EventPayload::Document(doc));
                }
                Ok(removed)
            }
            Err(e) => {
                if implicit {
                    self.rollback();
                }
                self.events.emit(EventKind::Error, &EventPayload::Error(&e));
                Err(e)
            }
        }
    }

    fn remove_positions_inner(
        &mut self,
        positions: &mut Vec<usize>,
    ) -> Result<Vec<Document>, DbError> {
        positions.sort_unstable();
        positions.dedup();
        if let Some(&last) = positions.last() {
            if last >= self.data.len() {
                return Err(DbError::InvalidArgument(format!(
                    "position {last} out of range"
                )));
            }
        }
        if positions.is_empty() {
            return Ok(Vec::new());
        }

        // views see the whole batch before any compaction
        for view in &mut self.views {
            view.remove_document(positions);
        }

        let adaptive = self.options.adaptive_binary_indices;
        for idx in self.binary_indices.values_mut() {
            if adaptive && !idx.dirty {
                idx.remove_batch(positions);
            } else {
                idx.dirty = true;
            }
        }

        for &pos in positions.iter() {
            let doc = &self.data[pos];
            if let Some(id) = doc_id(doc) {
                for idx in self.unique_indices.values_mut() {
                    idx.remove_id(id);
                }
            }
            let doc = doc.clone();
            for idx in self.exact_indices.values_mut() {
                idx.remove(&doc);
            }
        }

        let mut removed = Vec::with_capacity(positions.len());
        for &pos in positions.iter().rev() {
            removed.push(self.data.remove(pos));
            self.id_index.remove(pos);
        }
        removed.reverse();

        self.dirty = true;
        for doc in &removed {
            if let Some(id) = doc_id(doc) {
                self.dirty_ids.push(id);
            }
            if !self.options.disable_changes_api {
                self.changes.push(ChangeRecord {
                    name: self.name.clone(),
                    operation: ChangeOp::Remove,
                    obj: doc.clone(),
                });
            }
        }
        Ok(removed)
    }

    // ── Lookup ──────────────────────────────────────────────────

    /// Binary search `id_index` for a data position.
    pub(crate) fn position_of(&self, id: i64) -> Option<usize> {
        self.id_index.binary_search(&id).ok()
    }

    /// Fetch by `$id`.
    pub fn get(&self, id: i64) -> Option<&Document> {
        self.position_of(id).map(|pos| &self.data[pos])
    }

    /// Fetch by `$id` along with the data position.
    pub fn get_with_position(&self, id: i64) -> Option<(&Document, usize)> {
        self.position_of(id).map(|pos| (&self.data[pos], pos))
    }

    /// Unique-index point lookup.
    pub fn by(&self, field: &str, value: &Bson) -> Option<&Document> {
        let id = self.unique_indices.get(field)?.get(value)?;
        self.get(id)
    }

    // ── Query entry points ──────────────────────────────────────

    /// Begin a chained pipeline.
    pub fn chain(&self) -> Resultset<'_> {
        Resultset::new(self)
    }

    pub fn find(&self, filter: &Document) -> Result<Vec<Document>, DbError> {
        Ok(self.chain().find(filter)?.data())
    }

    pub fn find_one(&self, filter: &Document) -> Result<Option<Document>, DbError> {
        Ok(self.chain().find_first(filter)?.data().pop())
    }

    pub fn count(&self, filter: Option<&Document>) -> Result<usize, DbError> {
        match filter {
            Some(f) => Ok(self.chain().find(f)?.count()),
            None => Ok(self.data.len()),
        }
    }

    pub fn where_<F>(&self, pred: F) -> Vec<Document>
    where
        F: Fn(&Document) -> bool,
    {
        self.chain().where_(pred).data()
    }

    /// Find matching documents, apply `f` to each, and write them back.
    pub fn find_and_update<F>(&mut self, filter: &Document, f: F) -> Result<usize, DbError>
    where
        F: Fn(&mut Document),
    {
        let ids = self.chain().find(filter)?.ids();
        for &id in &ids {
            let mut doc = self
                .get(id)
                .cloned()
                .ok_or_else(|| DbError::NotFound(id.to_string()))?;
            f(&mut doc);
            self.update(doc)?;
        }
        Ok(ids.len())
    }

    /// Remove every document matching the filter.
    pub fn find_and_remove(&mut self, filter: &Document) -> Result<usize, DbError> {
        let positions = self.chain().find(filter)?.positions();
        Ok(self.remove_batch_by_positions(positions)?.len())
    }

    /// Apply `f` to every document satisfying the predicate.
    pub fn update_where<P, F>(&mut self, pred: P, f: F) -> Result<usize, DbError>
    where
        P: Fn(&Document) -> bool,
        F: Fn(&mut Document),
    {
        let ids = self.chain().where_(&pred).ids();
        for &id in &ids {
            let mut doc = self
                .get(id)
                .cloned()
                .ok_or_else(|| DbError::NotFound(id.to_string()))?;
            f(&mut doc);
            self.update(doc)?;
        }
        Ok(ids.len())
    }

    /// Remove every document satisfying the predicate.
    pub fn remove_where<P>(&mut self, pred: P) -> Result<usize, DbError>
    where
        P: Fn(&Document) -> bool,
    {
        let positions = self.chain().where_(&pred).positions();
        Ok(self.remove_batch_by_positions(positions)?.len())
    }

    // ── Binary index management ─────────────────────────────────

    /// Create or rebuild a binary index. A clean existing index is a no-op
    /// unless `force` is set.
    pub fn ensure_index(&mut self, property: &str, force: bool) {
        match self.binary_indices.get_mut(property) {
            Some(idx) => {
                if force || idx.dirty {
                    idx.rebuild(&self.data);
                }
            }
            None => {
                let mut idx = BinaryIndex::new(property);
                idx.rebuild(&self.data);
                self.binary_indices.insert(property.to_string(), idx);
                self.dirty = true;
            }
        }
    }

    /// Flag every binary index for a lazy rebuild.
    pub fn flag_binary_indexes_dirty(&mut self) {
        for idx in self.binary_indices.values_mut() {
            idx.dirty = true;
        }
    }

    /// Rebuild every dirty index (or all of them with `force`).
    pub fn ensure_all_indexes(&mut self, force: bool) {
        let properties: Vec<String> = self.binary_indices.keys().cloned().collect();
        for property in properties {
            self.ensure_index(&property, force);
        }
    }

    /// Validate a binary index against its sort invariant.
    pub fn check_index(
        &mut self,
        property: &str,
        options: CheckIndexOptions,
    ) -> Result<bool, DbError> {
        if !self.binary_indices.contains_key(property) {
            return Err(DbError::InvalidIndex(property.to_string()));
        }
        self.ensure_index(property, false);
        let sampling = options
            .random_sampling
            .then(|| options.sampling_factor.unwrap_or(0.1));
        let valid = match self.binary_indices.get(property) {
            Some(idx) => idx.validate(&self.data, sampling),
            None => false,
        };
        if !valid {
            warn!(collection = %self.name, property, "binary index failed validation");
            if options.repair {
                debug!(collection = %self.name, property, "rebuilding index");
                self.ensure_index(property, true);
            }
        }
        Ok(valid)
    }

    /// Validate every binary index; returns the properties that failed.
    pub fn check_all_indexes(&mut self, options: CheckIndexOptions) -> Result<Vec<String>, DbError> {
        let properties: Vec<String> = self.binary_indices.keys().cloned().collect();
        let mut failed = Vec::new();
        for property in properties {
            if !self.check_index(&property, options)? {
                failed.push(property);
            }
        }
        Ok(failed)
    }

    /// Register a uniqueness constraint, indexing existing documents.
    pub fn ensure_unique_index(&mut self, field: &str) -> Result<(), DbError> {
        let mut idx = UniqueIndex::new(field);
        idx.rebuild(&self.data)?;
        self.unique_indices.insert(field.to_string(), idx);
        if !self.options.unique.iter().any(|f| f == field) {
            self.options.unique.push(field.to_string());
        }
        Ok(())
    }

    /// Register an exact-match index, indexing existing documents.
    pub fn ensure_exact_index(&mut self, field: &str) {
        let mut idx = ExactIndex::new(field);
        idx.rebuild(&self.data);
        self.exact_indices.insert(field.to_string(), idx);
        if !self.options.exact.iter().any(|f| f == field) {
            self.options.exact.push(field.to_string());
        }
    }

    // ── Dynamic views ───────────────────────────────────────────

    /// Create a named view. Configure its pipeline through
    /// [`Collection::get_dynamic_view_mut`]; reads go through
    /// [`Collection::view_data`].
    pub fn add_dynamic_view(
        &mut self,
        name: &str,
        options: DynamicViewOptions,
    ) -> &mut DynamicView {
        if let Some(i) = self.views.iter().position(|v| v.name == name) {
            warn!(collection = %self.name, view = name, "dynamic view already exists");
            return &mut self.views[i];
        }
        self.views.push(DynamicView::new(name, options));
        let i = self.views.len() - 1;
        &mut self.views[i]
    }

    pub fn get_dynamic_view(&self, name: &str) -> Option<&DynamicView> {
        self.views.iter().find(|v| v.name == name)
    }

    pub fn get_dynamic_view_mut(&mut self, name: &str) -> Option<&mut DynamicView> {
        self.views.iter_mut().find(|v| v.name == name)
    }

    pub fn remove_dynamic_view(&mut self, name: &str) -> Option<DynamicView> {
        let i = self.views.iter().position(|v| v.name == name)?;
        Some(self.views.remove(i))
    }

    /// Materialize a view's documents, re-running its pipeline and sort if
    /// they are stale.
    pub fn view_data(&mut self, name: &str) -> Result<Vec<Document>, DbError> {
        let i = self.ensure_view_fresh(name)?;
        let (data, views) = (&self.data, &mut self.views);
        let view = &mut views[i];
        view.ensure_sorted(data);
        if view.options.persistent {
            if !view.result_data_valid {
                view.result_data = view.positions().iter().map(|&p| data[p].clone()).collect();
                view.result_data_valid = true;
            }
            return Ok(view.result_data.clone());
        }
        Ok(view.positions().iter().map(|&p| data[p].clone()).collect())
    }

    /// Member count of a view, re-running its pipeline if stale.
    pub fn view_count(&mut self, name: &str) -> Result<usize, DbError> {
        let i = self.ensure_view_fresh(name)?;
        Ok(self.views[i].count())
    }

    /// Branch an ad-hoc pipeline off a view's current members.
    pub fn view_branch(&mut self, name: &str) -> Result<Resultset<'_>, DbError> {
        let i = self.ensure_view_fresh(name)?;
        let positions = self.views[i].positions().to_vec();
        Ok(self.chain().with_rows(positions))
    }

    /// Force a full pipeline re-evaluation of a view.
    pub fn rematerialize_view(&mut self, name: &str) -> Result<(), DbError> {
        let i = self
            .views
            .iter()
            .position(|v| v.name == name)
            .ok_or_else(|| DbError::NotFound(format!("dynamic view: {name}")))?;
        self.rebuild_view(i);
        Ok(())
    }

    fn ensure_view_fresh(&mut self, name: &str) -> Result<usize, DbError> {
        let i = self
            .views
            .iter()
            .position(|v| v.name == name)
            .ok_or_else(|| DbError::NotFound(format!("dynamic view: {name}")))?;
        if self.views[i].results_dirty() {
            self.rebuild_view(i);
        }
        Ok(i)
    }

    /// Take-and-restore so the view can evaluate its pipeline against the
    /// collection that owns it.
    fn rebuild_view(&mut self, i: usize) {
        let mut view = std::mem::replace(&mut self.views[i], DynamicView::placeholder());
        view.rebuild(self);
        self.views[i] = view;
    }

    // ── Transforms ──────────────────────────────────────────────

    /// Register a named transform. Fails if the name is taken.
    pub fn add_transform(&mut self, name: &str, steps: Vec<TransformStep>) -> Result<(), DbError> {
        if self.transforms.contains_key(name) {
            return Err(DbError::Transform(format!(
                "a transform named {name} already exists"
            )));
        }
        self.transforms.insert(name.to_string(), steps);
        Ok(())
    }

    /// Register or replace a named transform.
    pub fn set_transform(&mut self, name: &str, steps: Vec<TransformStep>) {
        self.transforms.insert(name.to_string(), steps);
    }

    pub fn get_transform(&self, name: &str) -> Option<&[TransformStep]> {
        self.transforms.get(name).map(Vec::as_slice)
    }

    pub fn remove_transform(&mut self, name: &str) -> Option<Vec<TransformStep>> {
        self.transforms.remove(name)
    }

    /// Run a named transform, including mutating steps.
    pub fn transform_by_name(
        &mut self,
        name: &str,
        params: Option<&Document>,
    ) -> Result<Vec<Document>, DbError> {
        let steps = self
            .transforms
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::Transform(format!("unknown transform: {name}")))?;
        self.apply_transform(&steps, params)
    }

    /// Run a transform pipeline against this collection. Mutating steps
    /// (`Update`, `Remove`) are applied through the normal mutation paths;
    /// everything downstream of them sees the post-mutation state. The
    /// pipeline tracks rows by `$id` so mutations cannot invalidate it.
    pub fn apply_transform(
        &mut self,
        steps: &[TransformStep],
        params: Option<&Document>,
    ) -> Result<Vec<Document>, DbError> {
        enum State {
            /// Rows still bound to the collection, by stable id. `None`
            /// means "no filter yet" (the whole collection).
            Rows(Option<Vec<i64>>),
            /// Detached rows produced by a map or join step.
            Docs(Vec<Document>),
        }

        let mut state = State::Rows(None);
        for step in steps {
            let step = match params {
                Some(p) => step.with_params(p),
                None => step.clone(),
            };
            state = match state {
                State::Rows(ids) => match step {
                    TransformStep::Find { filter } => match ids {
                        None => State::Rows(Some(self.chain().find(&filter)?.ids())),
                        Some(ids) => {
                            let expr = Expr::parse(&filter)?;
                            State::Rows(Some(self.filter_ids(ids, |doc| expr.matches(doc))))
                        }
                    },
                    TransformStep::Where { pred } => {
                        let ids = self.ids_or_all(ids);
                        State::Rows(Some(self.filter_ids(ids, |doc| pred(doc))))
                    }
                    TransformStep::SimpleSort { property, options } => {
                        let mut ids = self.ids_or_all(ids);
                        let path = FieldPath::parse(&property);
                        self.sort_ids(&mut ids, |a, b| compare_on(a, b, &path));
                        if options.desc {
                            ids.reverse();
                        }
                        State::Rows(Some(ids))
                    }
                    TransformStep::CompoundSort { criteria } => {
                        let mut ids = self.ids_or_all(ids);
                        let compiled: Vec<_> = criteria
                            .iter()
                            .map(|c| (FieldPath::parse(&c.field), c.direction))
                            .collect();
                        self.sort_ids(&mut ids, |a, b| compare_documents(a, b, &compiled));
                        State::Rows(Some(ids))
                    }
                    TransformStep::Sort { cmp } => {
                        let mut ids = self.ids_or_all(ids);
                        self.sort_ids(&mut ids, |a, b| cmp(a, b));
                        State::Rows(Some(ids))
                    }
                    TransformStep::Limit { count } => {
                        let mut ids = self.ids_or_all(ids);
                        ids.truncate(count);
                        State::Rows(Some(ids))
                    }
                    TransformStep::Offset { count } => {
                        let mut ids = self.ids_or_all(ids);
                        ids.drain(..count.min(ids.len()));
                        State::Rows(Some(ids))
                    }
                    TransformStep::Map { f } => {
                        State::Docs(self.docs_for(&self.ids_or_all(ids)).iter().map(|d| f(d)).collect())
                    }
                    TransformStep::EqJoin { right, left_key, right_key } => {
                        let left = self.docs_for(&self.ids_or_all(ids));
                        State::Docs(join_rows(&left, &right, &left_key, &right_key, None))
                    }
                    TransformStep::MapReduce { map, reduce } => {
                        let mapped: Vec<Bson> = self
                            .docs_for(&self.ids_or_all(ids))
                            .iter()
                            .map(|d| map(d))
                            .collect();
                        State::Docs(vec![bson::doc! { "value": reduce(&mapped) }])
                    }
                    TransformStep::Update { f } => {
                        let ids = self.ids_or_all(ids);
                        for &id in &ids {
                            let mut doc = self
                                .get(id)
                                .cloned()
                                .ok_or_else(|| DbError::NotFound(id.to_string()))?;
                            f(&mut doc);
                            self.update(doc)?;
                        }
                        State::Rows(Some(ids))
                    }
                    TransformStep::Remove => {
                        let ids = self.ids_or_all(ids);
                        self.remove_batch(&ids)?;
                        State::Rows(Some(Vec::new()))
                    }
                },
                State::Docs(mut docs) => match step {
                    TransformStep::Find { filter } => {
                        let expr = Expr::parse(&filter)?;
                        docs.retain(|d| expr.matches(d));
                        State::Docs(docs)
                    }
                    TransformStep::Where { pred } => {
                        docs.retain(|d| pred(d));
                        State::Docs(docs)
                    }
                    TransformStep::SimpleSort { property, options } => {
                        let path = FieldPath::parse(&property);
                        docs.sort_by(|a, b| compare_on(a, b, &path));
                        if options.desc {
                            docs.reverse();
                        }
                        State::Docs(docs)
                    }
                    TransformStep::CompoundSort { criteria } => {
                        let compiled: Vec<_> = criteria
                            .iter()
                            .map(|c| (FieldPath::parse(&c.field), c.direction))
                            .collect();
                        docs.sort_by(|a, b| compare_documents(a, b, &compiled));
                        State::Docs(docs)
                    }
                    TransformStep::Sort { cmp } => {
                        docs.sort_by(|a, b| cmp(a, b));
                        State::Docs(docs)
                    }
                    TransformStep::Limit { count } => {
                        docs.truncate(count);
                        State::Docs(docs)
                    }
                    TransformStep::Offset { count } => {
                        docs.drain(..count.min(docs.len()));
                        State::Docs(docs)
                    }
                    TransformStep::Map { f } => State::Docs(docs.iter().map(|d| f(d)).collect()),
                    TransformStep::EqJoin { right, left_key, right_key } => {
                        State::Docs(join_rows(&docs, &right, &left_key, &right_key, None))
                    }
                    TransformStep::MapReduce { map, reduce } => {
                        let mapped: Vec<Bson> = docs.iter().map(|d| map(d)).collect();
                        State::Docs(vec![bson::doc! { "value": reduce(&mapped) }])
                    }
                    TransformStep::Update { .. } | TransformStep::Remove => {
                        return Err(DbError::Transform(
                            "cannot mutate after a map or join step".into(),
                        ));
                    }
                },
            };
        }
        Ok(match state {
            State::Rows(ids) => self.docs_for(&self.ids_or_all(ids)),
            State::Docs(docs) => docs,
        })
    }

    fn ids_or_all(&self, ids: Option<Vec<i64>>) -> Vec<i64> {
        ids.unwrap_or_else(|| self.id_index.clone())
    }

    fn docs_for(&self, ids: &[i64]) -> Vec<Document> {
        ids.iter().filter_map(|&id| self.get(id).cloned()).collect()
    }

    fn filter_ids<P>(&self, ids: Vec<i64>, pred: P) -> Vec<i64>
    where
        P: Fn(&Document) -> bool,
    {
        ids.into_iter()
            .filter(|&id| self.get(id).is_some_and(&pred))
            .collect()
    }

    fn sort_ids<C>(&self, ids: &mut [i64], cmp: C)
    where
        C: Fn(&Document, &Document) -> std::cmp::Ordering,
    {
        ids.sort_by(|&a, &b| match (self.get(a), self.get(b)) {
            (Some(da), Some(db)) => cmp(da, db),
            _ => std::cmp::Ordering::Equal,
        });
    }

    // ── TTL ─────────────────────────────────────────────────────

    /// Configure document expiration.
    pub fn set_ttl(&mut self, age_ms: i64, interval_ms: u64) {
        self.options.ttl_age_ms = Some(age_ms);
        self.options.ttl_interval_ms = Some(interval_ms);
    }

    pub fn ttl_interval_ms(&self) -> Option<u64> {
        self.options.ttl_interval_ms
    }

    /// Remove every document whose age (since last update, else creation)
    /// exceeds the configured TTL, through the standard remove path.
    pub fn ttl_sweep_at(&mut self, now: i64) -> Result<usize, DbError> {
        let Some(age) = self.options.ttl_age_ms else {
            return Ok(0);
        };
        let expired: Vec<usize> = self
            .data
            .iter()
            .enumerate()
            .filter(|(_, doc)| match age_reference(doc) {
                Some(reference) => now - reference > age,
                None => false,
            })
            .map(|(pos, _)| pos)
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }
        debug!(collection = %self.name, count = expired.len(), "ttl sweep removing expired documents");
        Ok(self.remove_batch_by_positions(expired)?.len())
    }

    // ── Transactions ────────────────────────────────────────────

    /// Snapshot the mutable state. Nested calls are no-ops until the
    /// matching commit or rollback.
    pub fn start_transaction(&mut self) {
        if self.txn.is_some() {
            return;
        }
        self.txn = Some(TxnSnapshot {
            data: self.data.clone(),
            id_index: self.id_index.clone(),
            binary_indices: self.binary_indices.clone(),
            dirty_ids: self.dirty_ids.clone(),
            max_id: self.max_id,
        });
        for view in &mut self.views {
            view.start_transaction();
        }
    }

    /// Discard the snapshot, keeping all changes since `start_transaction`.
    pub fn commit(&mut self) {
        self.txn = None;
        for view in &mut self.views {
            view.commit();
        }
    }

    /// Restore the snapshot taken by `start_transaction`. Unique and exact
    /// indices are rebuilt from the restored data.
    pub fn rollback(&mut self) {
        if let Some(snapshot) = self.txn.take() {
            self.data = snapshot.data;
            self.id_index = snapshot.id_index;
            self.binary_indices = snapshot.binary_indices;
            self.dirty_ids = snapshot.dirty_ids;
            self.max_id = snapshot.max_id;
            for idx in self.unique_indices.values_mut() {
                if idx.rebuild(&self.data).is_err() {
                    warn!(collection = %self.name, field = idx.field(), "unique index inconsistent after rollback");
                }
            }
            for idx in self.exact_indices.values_mut() {
                idx.rebuild(&self.data);
            }
        }
        for view in &mut self.views {
            view.rollback();
        }
    }

    // ── Changes API ─────────────────────────────────────────────

    pub fn set_changes_api(&mut self, enabled: bool) {
        self.options.disable_changes_api = !enabled;
    }

    /// Record field deltas instead of full documents for updates.
    pub fn set_delta_changes(&mut self, enabled: bool) {
        self.options.disable_delta_changes_api = !enabled;
    }

    pub fn changes(&self) -> &[ChangeRecord] {
        &self.changes
    }

    pub fn flush_changes(&mut self) {
        self.changes.clear();
    }

    pub fn serialize_changes(&self) -> Result<String, DbError> {
        Ok(serde_json::to_string(&self.changes)?)
    }

    pub fn dirty_ids(&self) -> &[i64] {
        &self.dirty_ids
    }

    pub fn flush_dirty_ids(&mut self) {
        self.dirty_ids.clear();
    }

    // ── Statistics helpers ──────────────────────────────────────

    /// Values of one property across the collection, in data order.
    pub fn extract(&self, field: &str) -> Vec<Bson> {
        let path = FieldPath::parse(field);
        self.data
            .iter()
            .map(|doc| path.resolve(doc).cloned().unwrap_or(Bson::Null))
            .collect()
    }

    /// Numeric coercions of one property, skipping values with none.
    pub fn extract_numeric(&self, field: &str) -> Vec<f64> {
        let path = FieldPath::parse(field);
        self.data
            .iter()
            .filter_map(|doc| path.resolve(doc).and_then(to_number))
            .collect()
    }

    /// Greatest value of a property under the comparator.
    pub fn max(&self, field: &str) -> Option<Bson> {
        self.extract(field).into_iter().max_by(|a, b| cmp_values(a, b))
    }

    /// Least value of a property under the comparator.
    pub fn min(&self, field: &str) -> Option<Bson> {
        self.extract(field).into_iter().min_by(|a, b| cmp_values(a, b))
    }

    pub fn avg(&self, field: &str) -> Option<f64> {
        let values = self.extract_numeric(field);
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }

    pub fn median(&self, field: &str) -> Option<f64> {
        let mut values = self.extract_numeric(field);
        if values.is_empty() {
            return None;
        }
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let mid = values.len() / 2;
        Some(if values.len() % 2 == 0 {
            (values[mid - 1] + values[mid]) / 2.0
        } else {
            values[mid]
        })
    }

    /// Most frequent value of a property.
    pub fn mode(&self, field: &str) -> Option<Bson> {
        let mut counts: HashMap<ScalarKey, (usize, Bson)> = HashMap::new();
        for value in self.extract(field) {
            if let Some(key) = ScalarKey::from_bson(&value) {
                let entry = counts.entry(key).or_insert((0, value));
                entry.0 += 1;
            }
        }
        counts
            .into_values()
            .max_by_key(|(count, _)| *count)
            .map(|(_, value)| value)
    }

    /// Population standard deviation of a property's numeric coercions.
    pub fn stdev(&self, field: &str) -> Option<f64> {
        let values = self.extract_numeric(field);
        if values.is_empty() {
            return None;
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance =
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
        Some(variance.sqrt())
    }

    // ── Reset ───────────────────────────────────────────────────

    /// Drop every document. Index definitions survive (emptied) unless
    /// `remove_indices` is set; views are flagged for re-materialization.
    pub fn clear(&mut self, remove_indices: bool) {
        self.data.clear();
        self.id_index.clear();
        self.max_id = 0;
        self.changes.clear();
        self.dirty_ids.clear();
        self.dirty = true;
        if remove_indices {
            self.binary_indices.clear();
            self.unique_indices.clear();
            self.exact_indices.clear();
            self.options.indices.clear();
            self.options.unique.clear();
            self.options.exact.clear();
        } else {
            for idx in self.binary_indices.values_mut() {
                idx.rebuild(&self.data);
            }
            for idx in self.unique_indices.values_mut() {
                idx.clear();
            }
            for idx in self.exact_indices.values_mut() {
                idx.clear();
            }
        }
        for view in &mut self.views {
            view.mark_results_dirty();
        }
    }

}
