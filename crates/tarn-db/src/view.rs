use bson::Document;
use serde::{Deserialize, Serialize};
use tracing::warn;

use tarn_query::{
    compare_documents, compare_on, Expr, FieldPath, SimpleSortOptions, SortCriterion,
    SortDirection,
};

use crate::collection::Collection;
use crate::error::DbError;
use crate::transform::{DocComparator, DocPredicate};

/// When a sorted view re-sorts: lazily on read, or eagerly after every
/// mutation that could disturb the order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortPriority {
    #[default]
    Passive,
    Active,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DynamicViewOptions {
    /// Keep a materialized document cache alongside the position set.
    #[serde(default)]
    pub persistent: bool,
    #[serde(default)]
    pub sort_priority: SortPriority,
}

#[derive(Clone)]
enum ViewFilterKind {
    Find { filter: Document, expr: Expr },
    Where { pred: DocPredicate },
}

#[derive(Clone)]
struct ViewFilter {
    uid: Option<String>,
    kind: ViewFilterKind,
}

#[derive(Clone)]
enum ViewSort {
    Simple {
        property: String,
        options: SimpleSortOptions,
    },
    Criteria(Vec<SortCriterion>),
    Comparator(DocComparator),
}

/// A persistent, auto-maintained filtered (and optionally sorted) position
/// set over its collection. The collection owns its views and pushes every
/// mutation through [`DynamicView::evaluate_document`] /
/// [`DynamicView::remove_document`]; reads go through the collection so the
/// full pipeline can be re-run when it has been edited.
#[derive(Clone)]
pub struct DynamicView {
    pub name: String,
    pub(crate) options: DynamicViewOptions,
    filters: Vec<ViewFilter>,
    sort: Option<ViewSort>,
    positions: Vec<usize>,
    /// The pipeline changed (or was just loaded) and the position set no
    /// longer reflects it; the next read runs a full re-evaluation.
    results_dirty: bool,
    sort_dirty: bool,
    pub(crate) result_data: Vec<Document>,
    pub(crate) result_data_valid: bool,
    txn_positions: Option<Vec<usize>>,
}

impl DynamicView {
    pub(crate) fn new(name: &str, options: DynamicViewOptions) -> DynamicView {
        DynamicView {
            name: name.to_string(),
            options,
            filters: Vec::new(),
            sort: None,
            positions: Vec::new(),
            results_dirty: true,
            sort_dirty: false,
            result_data: Vec::new(),
            result_data_valid: false,
            txn_positions: None,
        }
    }

    /// Cheap stand-in used while a view is temporarily moved out of its
    /// collection for re-materialization.
    pub(crate) fn placeholder() -> DynamicView {
        DynamicView::new("", DynamicViewOptions::default())
    }

    // ── Pipeline configuration ──────────────────────────────────

    pub fn apply_find(&mut self, filter: &Document) -> Result<(), DbError> {
        self.apply_find_uid(filter, None)
    }

    /// Add (or, when `uid` matches an existing filter, replace) a find
    /// filter. Takes effect on the next read.
    pub fn apply_find_uid(&mut self, filter: &Document, uid: Option<&str>) -> Result<(), DbError> {
        let expr = Expr::parse(filter)?;
        self.push_filter(ViewFilter {
            uid: uid.map(str::to_string),
            kind: ViewFilterKind::Find {
                filter: filter.clone(),
                expr,
            },
        });
        Ok(())
    }

    pub fn apply_where<F>(&mut self, pred: F)
    where
        F: Fn(&Document) -> bool + Send + Sync + 'static,
    {
        self.apply_where_uid(pred, None);
    }

    pub fn apply_where_uid<F>(&mut self, pred: F, uid: Option<&str>)
    where
        F: Fn(&Document) -> bool + Send + Sync + 'static,
    {
        self.push_filter(ViewFilter {
            uid: uid.map(str::to_string),
            kind: ViewFilterKind::Where {
                pred: std::sync::Arc::new(pred),
            },
        });
    }

    fn push_filter(&mut self, filter: ViewFilter) {
        if let Some(uid) = &filter.uid {
            if let Some(existing) = self
                .filters
                .iter_mut()
                .find(|f| f.uid.as_deref() == Some(uid))
            {
                *existing = filter;
                self.invalidate();
                return;
            }
        }
        self.filters.push(filter);
        self.invalidate();
    }

    /// Remove the filter registered under `uid`.
    pub fn remove_filter(&mut self, uid: &str) -> Result<(), DbError> {
        let before = self.filters.len();
        self.filters.retain(|f| f.uid.as_deref() != Some(uid));
        if self.filters.len() == before {
            return Err(DbError::NotFound(format!("view filter: {uid}")));
        }
        self.invalidate();
        Ok(())
    }

    /// Drop every filter (and optionally the sort) and start over.
    pub fn remove_filters(&mut self, remove_sort: bool) {
        self.filters.clear();
        if remove_sort {
            self.sort = None;
            self.sort_dirty = false;
        }
        self.invalidate();
    }

    pub fn apply_simple_sort(&mut self, property: &str, options: SimpleSortOptions) {
        self.sort = Some(ViewSort::Simple {
            property: property.to_string(),
            options,
        });
        self.sort_dirty = true;
        self.result_data_valid = false;
    }

    pub fn apply_sort_criteria(&mut self, criteria: Vec<SortCriterion>) {
        self.sort = Some(ViewSort::Criteria(criteria));
        self.sort_dirty = true;
        self.result_data_valid = false;
    }

    pub fn apply_sort(&mut self, cmp: DocComparator) {
        self.sort = Some(ViewSort::Comparator(cmp));
        self.sort_dirty = true;
        self.result_data_valid = false;
    }

    fn invalidate(&mut self) {
        self.results_dirty = true;
        self.result_data_valid = false;
    }

    // ── Incremental maintenance (driven by the collection) ──────

    pub(crate) fn matches_doc(&self, doc: &Document) -> bool {
        self.filters.iter().all(|f| match &f.kind {
            ViewFilterKind::Find { expr, .. } => expr.matches(doc),
            ViewFilterKind::Where { pred } => pred(doc),
        })
    }

    /// Re-test one document position after an insert or in-place update.
    pub(crate) fn evaluate_document(&mut self, data: &[Document], pos: usize, is_new: bool) {
        if self.results_dirty {
            // the whole pipeline re-runs on next read anyway
            return;
        }
        let matched = self.matches_doc(&data[pos]);
        let existing = self.positions.iter().position(|&p| p == pos);
        match (matched, existing) {
            (true, None) => {
                self.positions.push(pos);
                if self.sort.is_some() {
                    self.sort_dirty = true;
                }
            }
            (true, Some(_)) => {
                if !is_new && self.sort.is_some() {
                    self.sort_dirty = true;
                }
            }
            (false, Some(i)) => {
                self.positions.remove(i);
            }
            (false, None) => return,
        }
        self.result_data_valid = false;
    }

    /// Drop removed positions and shift the survivors. `removed` must be
    /// sorted ascending; runs before the collection compacts its data.
    pub(crate) fn remove_document(&mut self, removed: &[usize]) {
        if self.results_dirty {
            return;
        }
        let before = self.positions.len();
        self.positions.retain(|p| removed.binary_search(p).is_err());
        for p in &mut self.positions {
            *p -= removed.partition_point(|&r| r < *p);
        }
        if self.positions.len() != before {
            self.result_data_valid = false;
        }
    }

    /// Full pipeline re-evaluation against the collection.
    pub(crate) fn rebuild(&mut self, collection: &Collection) {
        let mut rs = collection.chain();
        for f in &self.filters {
            rs = match &f.kind {
                ViewFilterKind::Find { expr, .. } => rs.find_expr(expr),
                ViewFilterKind::Where { pred } => {
                    let pred = std::sync::Arc::clone(pred);
                    rs.where_(move |doc| pred(doc))
                }
            };
        }
        self.positions = rs.positions();
        self.results_dirty = false;
        self.sort_dirty = self.sort.is_some();
        self.result_data_valid = false;
        self.ensure_sorted(collection.data());
    }

    /// Apply the sort if it is stale.
    pub(crate) fn ensure_sorted(&mut self, data: &[Document]) {
        if !self.sort_dirty {
            return;
        }
        match &self.sort {
            None => {}
            Some(ViewSort::Simple { property, options }) => {
                let path = FieldPath::parse(property);
                self.positions
                    .sort_by(|&a, &b| compare_on(&data[a], &data[b], &path));
                if options.desc {
                    self.positions.reverse();
                }
            }
            Some(ViewSort::Criteria(criteria)) => {
                let compiled: Vec<(FieldPath, SortDirection)> = criteria
                    .iter()
                    .map(|c| (FieldPath::parse(&c.field), c.direction))
                    .collect();
                self.positions
                    .sort_by(|&a, &b| compare_documents(&data[a], &data[b], &compiled));
            }
            Some(ViewSort::Comparator(cmp)) => {
                self.positions.sort_by(|&a, &b| cmp(&data[a], &data[b]));
            }
        }
        self.sort_dirty = false;
        self.result_data_valid = false;
    }

    // ── State ───────────────────────────────────────────────────

    pub(crate) fn positions(&self) -> &[usize] {
        &self.positions
    }

    pub(crate) fn results_dirty(&self) -> bool {
        self.results_dirty
    }

    pub(crate) fn mark_results_dirty(&mut self) {
        self.invalidate();
    }

    pub fn sort_priority(&self) -> SortPriority {
        self.options.sort_priority
    }

    /// Number of member documents. Only meaningful once the pipeline has
    /// been applied; prefer `Collection::view_count`.
    pub fn count(&self) -> usize {
        self.positions.len()
    }

    // ── Transaction mirroring ───────────────────────────────────

    pub(crate) fn start_transaction(&mut self) {
        self.txn_positions = Some(self.positions.clone());
    }

    pub(crate) fn commit(&mut self) {
        self.txn_positions = None;
    }

    pub(crate) fn rollback(&mut self) {
        if let Some(saved) = self.txn_positions.take() {
            self.positions = saved;
            self.result_data_valid = false;
        }
    }

    // ── Persistence ─────────────────────────────────────────────

    pub(crate) fn to_snapshot(&self) -> ViewSnapshot {
        let mut filters = Vec::new();
        for f in &self.filters {
            match &f.kind {
                ViewFilterKind::Find { filter, .. } => filters.push(ViewFilterSnapshot {
                    uid: f.uid.clone(),
                    filter: filter.clone(),
                }),
                ViewFilterKind::Where { .. } => {
                    warn!(view = %self.name, "dropping where-filter from persisted view");
                }
            }
        }
        let sort = match &self.sort {
            Some(ViewSort::Simple { property, options }) => Some(ViewSortRepr::Simple {
                property: property.clone(),
                options: *options,
            }),
            Some(ViewSort::Criteria(criteria)) => Some(ViewSortRepr::Criteria {
                criteria: criteria.clone(),
            }),
            Some(ViewSort::Comparator(_)) => {
                warn!(view = %self.name, "dropping comparator sort from persisted view");
                None
            }
            None => None,
        };
        ViewSnapshot {
            name: self.name.clone(),
            options: self.options,
            filters,
            sort,
        }
    }

    pub(crate) fn from_snapshot(snapshot: ViewSnapshot) -> Result<DynamicView, DbError> {
        let mut view = DynamicView::new(&snapshot.name, snapshot.options);
        for f in snapshot.filters {
            view.apply_find_uid(&f.filter, f.uid.as_deref())?;
        }
        match snapshot.sort {
            Some(ViewSortRepr::Simple { property, options }) => {
                view.apply_simple_sort(&property, options);
            }
            Some(ViewSortRepr::Criteria { criteria }) => view.apply_sort_criteria(criteria),
            None => {}
        }
        Ok(view)
    }
}

impl std::fmt::Debug for DynamicView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicView")
            .field("name", &self.name)
            .field("filters", &self.filters.len())
            .field("sorted", &self.sort.is_some())
            .field("positions", &self.positions.len())
            .field("results_dirty", &self.results_dirty)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewFilterSnapshot {
    #[serde(default)]
    pub uid: Option<String>,
    pub filter: Document,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViewSortRepr {
    Simple {
        property: String,
        #[serde(default)]
        options: SimpleSortOptions,
    },
    Criteria {
        criteria: Vec<SortCriterion>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewSnapshot {
    pub name: String,
    #[serde(default)]
    pub options: DynamicViewOptions,
    #[serde(default)]
    pub filters: Vec<ViewFilterSnapshot>,
    #[serde(default)]
    pub sort: Option<ViewSortRepr>,
}
