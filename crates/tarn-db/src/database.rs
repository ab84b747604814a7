use std::collections::HashMap;

use bson::Document;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tarn_persist::{Adapter, AdapterError, ThrottledSaves};

use crate::collection::{Collection, CollectionOptions};
use crate::changes::ChangeRecord;
use crate::document::doc_id;
use crate::error::DbError;
use crate::transform::{TransformStep, TransformStepRepr};
use crate::view::{DynamicView, ViewSnapshot};

/// Version written into every snapshot. Snapshots from engines older than
/// this force a full index rebuild on load.
pub const ENGINE_VERSION: f64 = 1.5;

/// Segment separator of the destructured serialization format.
pub const DESTRUCTURED_DELIMITER: &str = "$<\n";

fn default_version() -> f64 {
    ENGINE_VERSION
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializationFormat {
    /// Canonical JSON of the whole database.
    Normal,
    /// As `Normal`, indented.
    Pretty,
    /// Delimited line-oriented format: shell first, then each collection's
    /// documents as individual segments.
    Destructured,
}

/// Persisted form of a collection: documents plus index *definitions* —
/// binary index permutations, unique and exact maps are all rebuilt on
/// load from the data itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    pub name: String,
    #[serde(default)]
    pub data: Vec<Document>,
    #[serde(default)]
    pub id_index: Vec<i64>,
    #[serde(default)]
    pub max_id: i64,
    #[serde(default)]
    pub binary_indices: Vec<String>,
    #[serde(default)]
    pub options: CollectionOptions,
    #[serde(default)]
    pub transforms: HashMap<String, Vec<TransformStepRepr>>,
    #[serde(default)]
    pub dynamic_views: Vec<ViewSnapshot>,
    #[serde(default)]
    pub changes: Vec<ChangeRecord>,
    #[serde(default)]
    pub dirty_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSnapshot {
    #[serde(default)]
    pub filename: String,
    #[serde(default = "default_version")]
    pub database_version: f64,
    #[serde(default = "default_version")]
    pub engine_version: f64,
    #[serde(default)]
    pub collections: Vec<CollectionSnapshot>,
}

impl Collection {
    pub(crate) fn to_snapshot(&self) -> CollectionSnapshot {
        let mut transforms = HashMap::new();
        'transforms: for (name, steps) in &self.transforms {
            let mut reprs = Vec::with_capacity(steps.len());
            for step in steps {
                match TransformStepRepr::try_from(step) {
                    Ok(repr) => reprs.push(repr),
                    Err(_) => {
                        warn!(
                            collection = %self.name,
                            transform = %name,
                            "skipping transform with closure steps from snapshot"
                        );
                        continue 'transforms;
                    }
                }
            }
            transforms.insert(name.clone(), reprs);
        }
        CollectionSnapshot {
            name: self.name.clone(),
            data: self.data.clone(),
            id_index: self.id_index.clone(),
            max_id: self.max_id,
            binary_indices: self.binary_indices.keys().cloned().collect(),
            options: self.options.clone(),
            transforms,
            dynamic_views: self.views.iter().map(DynamicView::to_snapshot).collect(),
            changes: self.changes.clone(),
            dirty_ids: self.dirty_ids.clone(),
        }
    }

    pub(crate) fn from_snapshot(snapshot: CollectionSnapshot) -> Result<Collection, DbError> {
        let mut collection = Collection::new(&snapshot.name, snapshot.options);
        collection.data = snapshot.data;
        collection.id_index = if snapshot.id_index.len() == collection.data.len() {
            snapshot.id_index
        } else {
            collection.data.iter().filter_map(doc_id).collect()
        };
        if collection.id_index.len() != collection.data.len() {
            return Err(DbError::Serialization(format!(
                "collection {}: id index and data are not parallel",
                snapshot.name
            )));
        }
        let loaded_max = collection.id_index.iter().copied().max().unwrap_or(0);
        collection.max_id = snapshot.max_id.max(loaded_max);

        for idx in collection.unique_indices.values_mut() {
            idx.rebuild(&collection.data)?;
        }
        for idx in collection.exact_indices.values_mut() {
            idx.rebuild(&collection.data);
        }
        for property in snapshot.binary_indices {
            collection.ensure_index(&property, true);
        }
        collection.ensure_all_indexes(true);

        for (name, reprs) in snapshot.transforms {
            let steps: Vec<TransformStep> = reprs.into_iter().map(TransformStep::from).collect();
            collection.transforms.insert(name, steps);
        }
        for view_snapshot in snapshot.dynamic_views {
            collection.views.push(DynamicView::from_snapshot(view_snapshot)?);
        }
        collection.changes = snapshot.changes;
        collection.dirty_ids = snapshot.dirty_ids;
        collection.dirty = false;
        Ok(collection)
    }
}

/// A named container of collections and the persistence boundary: snapshot
/// serialization in three formats, adapter-driven save/load/delete with
/// save coalescing, and autosave dirty tracking.
pub struct Database {
    pub filename: String,
    collections: Vec<Collection>,
    database_version: f64,
    engine_version: f64,
    adapter: Option<Box<dyn Adapter + Send + Sync>>,
    throttled: ThrottledSaves,
    autosave_interval_ms: Option<u64>,
}

impl Database {
    pub fn new(filename: &str) -> Database {
        Database {
            filename: filename.to_string(),
            collections: Vec::new(),
            database_version: ENGINE_VERSION,
            engine_version: ENGINE_VERSION,
            adapter: None,
            throttled: ThrottledSaves::new(),
            autosave_interval_ms: None,
        }
    }

    pub fn with_adapter(filename: &str, adapter: Box<dyn Adapter + Send + Sync>) -> Database {
        let mut db = Database::new(filename);
        db.adapter = Some(adapter);
        db
    }

    pub fn set_adapter(&mut self, adapter: Box<dyn Adapter + Send + Sync>) {
        self.adapter = Some(adapter);
    }

    /// Enable autosave bookkeeping. The interval is consumed by the
    /// autosave daemon (`daemon::spawn_autosave`).
    pub fn configure_autosave(&mut self, interval_ms: u64) {
        self.autosave_interval_ms = Some(interval_ms);
    }

    pub fn autosave_interval_ms(&self) -> Option<u64> {
        self.autosave_interval_ms
    }

    /// Whether any collection has unsaved mutations.
    pub fn autosave_dirty(&self) -> bool {
        self.collections.iter().any(|c| c.dirty)
    }

    // ── Collection registry ─────────────────────────────────────

    /// Create a collection. Returns the existing one (with a warning) when
    /// the name is already taken.
    pub fn add_collection(&mut self, name: &str, options: CollectionOptions) -> &mut Collection {
        if let Some(i) = self.collections.iter().position(|c| c.name == name) {
            warn!(collection = name, "collection already exists");
            return &mut self.collections[i];
        }
        self.collections.push(Collection::new(name, options));
        let i = self.collections.len() - 1;
        &mut self.collections[i]
    }

    pub fn get_collection(&self, name: &str) -> Option<&Collection> {
        let found = self.collections.iter().find(|c| c.name == name);
        if found.is_none() {
            warn!(collection = name, "collection not found");
        }
        found
    }

    pub fn get_collection_mut(&mut self, name: &str) -> Option<&mut Collection> {
        let found = self.collections.iter_mut().find(|c| c.name == name);
        if found.is_none() {
            warn!(collection = name, "collection not found");
        }
        found
    }

    pub fn get_or_add_collection(
        &mut self,
        name: &str,
        options: CollectionOptions,
    ) -> &mut Collection {
        match self.collections.iter().position(|c| c.name == name) {
            Some(i) => &mut self.collections[i],
            None => self.add_collection(name, options),
        }
    }

    pub fn remove_collection(&mut self, name: &str) -> Option<Collection> {
        let i = self.collections.iter().position(|c| c.name == name)?;
        Some(self.collections.remove(i))
    }

    pub fn rename_collection(&mut self, old: &str, new: &str) -> Result<(), DbError> {
        if self.collections.iter().any(|c| c.name == new) {
            return Err(DbError::InvalidArgument(format!(
                "collection {new} already exists"
            )));
        }
        let collection = self
            .collections
            .iter_mut()
            .find(|c| c.name == old)
            .ok_or_else(|| DbError::CollectionNotFound(old.to_string()))?;
        collection.name = new.to_string();
        Ok(())
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.collections.iter().map(|c| c.name.clone()).collect()
    }

    pub fn collections(&self) -> impl Iterator<Item = &Collection> {
        self.collections.iter()
    }

    pub fn collections_mut(&mut self) -> impl Iterator<Item = &mut Collection> {
        self.collections.iter_mut()
    }

    // ── Snapshots ───────────────────────────────────────────────

    pub fn to_snapshot(&self) -> DatabaseSnapshot {
        DatabaseSnapshot {
            filename: self.filename.clone(),
            database_version: self.database_version,
            engine_version: self.engine_version,
            collections: self.collections.iter().map(Collection::to_snapshot).collect(),
        }
    }

    pub fn serialize(&self, format: SerializationFormat) -> Result<String, DbError> {
        match format {
            SerializationFormat::Normal => Ok(serde_json::to_string(&self.to_snapshot())?),
            SerializationFormat::Pretty => Ok(serde_json::to_string_pretty(&self.to_snapshot())?),
            SerializationFormat::Destructured => self.serialize_destructured(),
        }
    }

    /// Replace this database's collections from serialized JSON.
    pub fn load_json(&mut self, payload: &str) -> Result<(), DbError> {
        let snapshot: DatabaseSnapshot = serde_json::from_str(payload)?;
        self.load_json_object(snapshot)
    }

    /// Replace this database's collections from a parsed snapshot.
    /// Snapshots written by engines older than 1.5 get every binary index
    /// rebuilt and are flagged dirty for the next save.
    pub fn load_json_object(&mut self, snapshot: DatabaseSnapshot) -> Result<(), DbError> {
        let upgrade = snapshot.database_version < ENGINE_VERSION;
        if upgrade {
            warn!(
                from = snapshot.database_version,
                to = ENGINE_VERSION,
                "upgrading database snapshot; rebuilding all indices"
            );
        }
        let mut collections = Vec::with_capacity(snapshot.collections.len());
        for cs in snapshot.collections {
            let mut collection = Collection::from_snapshot(cs)?;
            if upgrade {
                collection.ensure_all_indexes(true);
                collection.dirty = true;
            }
            collections.push(collection);
        }
        self.collections = collections;
        self.database_version = ENGINE_VERSION;
        Ok(())
    }

    // ── Destructured format ─────────────────────────────────────

    /// Delimited destructured serialization: the shell (collections with
    /// emptied data) first, then one segment per document. An empty segment
    /// ends a collection; the final two consecutive empty segments end the
    /// payload.
    pub fn serialize_destructured(&self) -> Result<String, DbError> {
        let mut shell = self.to_snapshot();
        let partitions: Vec<Vec<Document>> = shell
            .collections
            .iter_mut()
            .map(|c| std::mem::take(&mut c.data))
            .collect();
        let mut segments = vec![serde_json::to_string(&shell)?];
        for docs in &partitions {
            for doc in docs {
                segments.push(serde_json::to_string(doc)?);
            }
            segments.push(String::new());
        }
        segments.push(String::new());
        Ok(segments.join(DESTRUCTURED_DELIMITER))
    }

    /// Parse a delimited destructured payload back into a snapshot. The
    /// shell's collection count drives the walk, so empty collections are
    /// unambiguous.
    pub fn deserialize_destructured(payload: &str) -> Result<DatabaseSnapshot, DbError> {
        let mut segments = payload.split(DESTRUCTURED_DELIMITER);
        let shell_text = segments
            .next()
            .ok_or_else(|| DbError::Serialization("empty destructured payload".into()))?;
        let mut shell: DatabaseSnapshot = serde_json::from_str(shell_text)?;
        for collection in &mut shell.collections {
            let mut docs = Vec::new();
            for segment in segments.by_ref() {
                if segment.is_empty() {
                    break;
                }
                docs.push(serde_json::from_str::<Document>(segment)?);
            }
            collection.data = docs;
        }
        Ok(shell)
    }

    /// Partitioned destructured serialization: element 0 is the shell,
    /// element `i + 1` holds collection `i`'s documents joined by the
    /// delimiter.
    pub fn serialize_destructured_partitioned(&self) -> Result<Vec<String>, DbError> {
        let mut shell = self.to_snapshot();
        let partitions: Vec<Vec<Document>> = shell
            .collections
            .iter_mut()
            .map(|c| std::mem::take(&mut c.data))
            .collect();
        let mut parts = vec![serde_json::to_string(&shell)?];
        for docs in &partitions {
            let lines = docs
                .iter()
                .map(serde_json::to_string)
                .collect::<Result<Vec<_>, _>>()?;
            parts.push(lines.join(DESTRUCTURED_DELIMITER));
        }
        Ok(parts)
    }

    pub fn deserialize_destructured_partitioned(
        parts: &[String],
    ) -> Result<DatabaseSnapshot, DbError> {
        let shell_text = parts
            .first()
            .ok_or_else(|| DbError::Serialization("empty partitioned payload".into()))?;
        let mut shell: DatabaseSnapshot = serde_json::from_str(shell_text)?;
        for (i, collection) in shell.collections.iter_mut().enumerate() {
            let Some(part) = parts.get(i + 1) else {
                return Err(DbError::Serialization(format!(
                    "missing partition for collection {}",
                    collection.name
                )));
            };
            collection.data = part
                .split(DESTRUCTURED_DELIMITER)
                .filter(|s| !s.is_empty())
                .map(serde_json::from_str::<Document>)
                .collect::<Result<Vec<_>, _>>()?;
        }
        Ok(shell)
    }

    // ── Adapter-backed persistence ──────────────────────────────

    /// Serialize and hand the payload to the adapter. Re-entrant requests
    /// while a save runs coalesce into one follow-up save. Clears every
    /// collection's dirty flag on success.
    pub fn save_database(&mut self) -> Result<(), DbError> {
        if self.adapter.is_none() {
            return Err(DbError::Adapter(AdapterError(
                "no adapter configured".into(),
            )));
        }
        if !self.throttled.begin() {
            return Ok(());
        }
        loop {
            let payload = match self.serialize(SerializationFormat::Normal) {
                Ok(p) => p,
                Err(e) => {
                    self.release_throttle();
                    return Err(e);
                }
            };
            let result = match self.adapter.as_mut() {
                Some(adapter) => adapter.save(&self.filename, &payload),
                None => Err(AdapterError("no adapter configured".into())),
            };
            let follow_up = self.throttled.finish();
            if let Err(e) = result {
                if follow_up {
                    self.release_throttle();
                }
                return Err(e.into());
            }
            debug!(filename = %self.filename, bytes = payload.len(), "database saved");
            for collection in &mut self.collections {
                collection.dirty = false;
                collection.flush_dirty_ids();
            }
            if !follow_up {
                return Ok(());
            }
        }
    }

    /// Load the database from the adapter. A missing payload leaves this
    /// database empty (a fresh store); a present one replaces collections.
    /// Accepts both normal-JSON and destructured payloads.
    pub fn load_database(&mut self) -> Result<(), DbError> {
        let payload = match self.adapter.as_ref() {
            Some(adapter) => adapter.load(&self.filename)?,
            None => {
                return Err(DbError::Adapter(AdapterError(
                    "no adapter configured".into(),
                )));
            }
        };
        let Some(payload) = payload else {
            debug!(filename = %self.filename, "no stored database; starting empty");
            return Ok(());
        };
        match serde_json::from_str::<DatabaseSnapshot>(&payload) {
            Ok(snapshot) => self.load_json_object(snapshot),
            Err(_) => {
                let snapshot = Database::deserialize_destructured(&payload)?;
                self.load_json_object(snapshot)
            }
        }
    }

    /// Drain the coalescing queue after an aborted save so later saves can
    /// run.
    fn release_throttle(&mut self) {
        while self.throttled.finish() {}
    }

    pub fn delete_database(&mut self) -> Result<(), DbError> {
        match self.adapter.as_mut() {
            Some(adapter) => Ok(adapter.delete(&self.filename)?),
            None => Err(DbError::Adapter(AdapterError(
                "no adapter configured".into(),
            ))),
        }
    }

    /// Flush unsaved changes (when an adapter is configured) and drop it.
    pub fn close(&mut self) -> Result<(), DbError> {
        if self.adapter.is_some() && self.autosave_dirty() {
            self.save_database()?;
        }
        self.adapter = None;
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("filename", &self.filename)
            .field("collections", &self.collection_names())
            .field("has_adapter", &self.adapter.is_some())
            .finish()
    }
}
