use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use bson::Document;

use tarn_query::{
    compare_documents, compare_on, Expr, FieldPath, QueryOp, ScalarKey, SimpleSortOptions,
    SortCriterion, SortDirection,
};

use crate::collection::Collection;
use crate::document::doc_id;
use crate::error::DbError;
use crate::transform::TransformStep;

/// Minimum filtered/total density at which a sort re-walks a binary index
/// and intersects, instead of sorting the filtered rows directly.
const INDEX_SORT_INTERSECT_RATIO: f64 = 0.1;

/// A chainable query pipeline over a collection.
///
/// Holds only data positions, never documents. Before any filter applies,
/// `filter_initialized` is false and the empty position vector means "the
/// whole collection"; after the first filter an empty vector means "matched
/// nothing". Combinators consume and return the resultset; `eq_join` and
/// `map` rebind it to an owned anonymous collection of derived rows.
#[derive(Debug, Clone)]
pub struct Resultset<'a> {
    collection: Cow<'a, Collection>,
    filtered_rows: Vec<usize>,
    filter_initialized: bool,
}

impl<'a> Resultset<'a> {
    pub(crate) fn new(collection: &'a Collection) -> Resultset<'a> {
        Resultset {
            collection: Cow::Borrowed(collection),
            filtered_rows: Vec::new(),
            filter_initialized: false,
        }
    }

    fn owned(collection: Collection) -> Resultset<'a> {
        Resultset {
            collection: Cow::Owned(collection),
            filtered_rows: Vec::new(),
            filter_initialized: false,
        }
    }

    // ── Filtering ───────────────────────────────────────────────

    /// Apply a filter document. The first eligible single-clause filter on
    /// an indexed property is served by a binary-index range; subsequent
    /// filters narrow the current rows by linear scan.
    pub fn find(self, filter: &Document) -> Result<Resultset<'a>, DbError> {
        let expr = Expr::parse(filter)?;
        Ok(self.find_expr(&expr))
    }

    /// Apply a filter, keeping at most the first match.
    pub fn find_first(self, filter: &Document) -> Result<Resultset<'a>, DbError> {
        let expr = Expr::parse(filter)?;
        Ok(self.apply_expr(&expr, true))
    }

    /// Apply a pre-compiled expression.
    pub fn find_expr(self, expr: &Expr) -> Resultset<'a> {
        self.apply_expr(expr, false)
    }

    fn apply_expr(mut self, expr: &Expr, first_only: bool) -> Resultset<'a> {
        let base = self.filter_initialized.then_some(self.filtered_rows.as_slice());
        self.filtered_rows = eval_expr(&self.collection, base, expr, first_only);
        self.filter_initialized = true;
        self
    }

    /// Apply a user predicate.
    pub fn where_<F>(mut self, pred: F) -> Resultset<'a>
    where
        F: Fn(&Document) -> bool,
    {
        let data = self.collection.data();
        self.filtered_rows = match self.filter_initialized {
            true => self
                .filtered_rows
                .iter()
                .copied()
                .filter(|&p| pred(&data[p]))
                .collect(),
            false => (0..data.len()).filter(|&p| pred(&data[p])).collect(),
        };
        self.filter_initialized = true;
        self
    }

    /// Union of the given filter expressions, preserving first-occurrence
    /// order across branches.
    pub fn find_or(self, filters: &[Document]) -> Result<Resultset<'a>, DbError> {
        let children = filters
            .iter()
            .map(Expr::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.find_expr(&Expr::Or(children)))
    }

    /// Sequential application of the given filter expressions.
    pub fn find_and(self, filters: &[Document]) -> Result<Resultset<'a>, DbError> {
        let children = filters
            .iter()
            .map(Expr::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.find_expr(&Expr::And(children)))
    }

    // ── Sorting ─────────────────────────────────────────────────

    /// Sort by an arbitrary document comparator.
    pub fn sort<F>(mut self, cmp: F) -> Resultset<'a>
    where
        F: Fn(&Document, &Document) -> Ordering,
    {
        self.materialize_rows();
        let Resultset {
            collection,
            filtered_rows,
            ..
        } = &mut self;
        let data = collection.data();
        filtered_rows.sort_by(|&a, &b| cmp(&data[a], &data[b]));
        self
    }

    pub fn simple_sort(self, property: &str) -> Resultset<'a> {
        self.simple_sort_opts(property, SimpleSortOptions::default())
    }

    /// Sort on one property under the comparator. Unfiltered resultsets
    /// copy a clean binary index outright; densely filtered ones intersect
    /// against it; everything else falls back to an array sort.
    pub fn simple_sort_opts(mut self, property: &str, options: SimpleSortOptions) -> Resultset<'a> {
        if !options.disable_indexed_sort {
            if let Some(idx) = self.collection.binary_index(property) {
                if !idx.dirty {
                    if !self.filter_initialized {
                        self.filtered_rows = idx.values.clone();
                        if options.desc {
                            self.filtered_rows.reverse();
                        }
                        self.filter_initialized = true;
                        return self;
                    }
                    let total = self.collection.data().len();
                    let density = self.filtered_rows.len() as f64 / total.max(1) as f64;
                    if density > INDEX_SORT_INTERSECT_RATIO {
                        let members: HashSet<usize> =
                            self.filtered_rows.iter().copied().collect();
                        let mut rows: Vec<usize> = idx
                            .values
                            .iter()
                            .copied()
                            .filter(|p| members.contains(p))
                            .collect();
                        if options.desc {
                            rows.reverse();
                        }
                        self.filtered_rows = rows;
                        return self;
                    }
                }
            }
        }
        self.materialize_rows();
        let path = FieldPath::parse(property);
        let Resultset {
            collection,
            filtered_rows,
            ..
        } = &mut self;
        let data = collection.data();
        filtered_rows.sort_by(|&a, &b| compare_on(&data[a], &data[b], &path));
        if options.desc {
            filtered_rows.reverse();
        }
        self
    }

    /// Sort on multiple criteria, evaluated in order.
    pub fn compound_sort(mut self, criteria: &[SortCriterion]) -> Resultset<'a> {
        self.materialize_rows();
        let compiled: Vec<(FieldPath, SortDirection)> = criteria
            .iter()
            .map(|c| (FieldPath::parse(&c.field), c.direction))
            .collect();
        let Resultset {
            collection,
            filtered_rows,
            ..
        } = &mut self;
        let data = collection.data();
        filtered_rows.sort_by(|&a, &b| compare_documents(&data[a], &data[b], &compiled));
        self
    }

    // ── Slicing ─────────────────────────────────────────────────

    pub fn limit(mut self, count: usize) -> Resultset<'a> {
        self.materialize_rows();
        self.filtered_rows.truncate(count);
        self
    }

    pub fn offset(mut self, count: usize) -> Resultset<'a> {
        self.materialize_rows();
        let skip = count.min(self.filtered_rows.len());
        self.filtered_rows.drain(..skip);
        self
    }

    // ── Terminators ─────────────────────────────────────────────

    /// Materialize the current rows as cloned documents.
    pub fn data(&self) -> Vec<Document> {
        let data = self.collection.data();
        match self.filter_initialized {
            true => self.filtered_rows.iter().map(|&p| data[p].clone()).collect(),
            false => data.to_vec(),
        }
    }

    pub fn count(&self) -> usize {
        match self.filter_initialized {
            true => self.filtered_rows.len(),
            false => self.collection.data().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// The `$id`s of the current rows, stable across later mutations.
    pub fn ids(&self) -> Vec<i64> {
        let data = self.collection.data();
        self.positions()
            .into_iter()
            .filter_map(|p| doc_id(&data[p]))
            .collect()
    }

    pub(crate) fn positions(&self) -> Vec<usize> {
        match self.filter_initialized {
            true => self.filtered_rows.clone(),
            false => (0..self.collection.data().len()).collect(),
        }
    }

    /// A copy of this resultset for a parallel pipeline over the same
    /// collection.
    pub fn branch(&self) -> Resultset<'_> {
        Resultset {
            collection: Cow::Borrowed(self.collection.as_ref()),
            filtered_rows: self.filtered_rows.clone(),
            filter_initialized: self.filter_initialized,
        }
    }

    /// `reduce` over the `map`-projection of the current rows.
    pub fn map_reduce<T, U, M, R>(&self, map: M, reduce: R) -> U
    where
        M: Fn(&Document) -> T,
        R: Fn(&[T]) -> U,
    {
        let mapped: Vec<T> = self.data().iter().map(&map).collect();
        reduce(&mapped)
    }

    // ── Rebinding combinators ───────────────────────────────────

    /// Replace the bound collection with an anonymous one populated by
    /// `f`-transformed rows.
    pub fn map<F>(self, f: F) -> Result<Resultset<'a>, DbError>
    where
        F: Fn(&Document) -> Document,
    {
        let rows: Vec<Document> = self.data().iter().map(|d| f(d)).collect();
        Ok(Resultset::owned(Collection::anonymous("mapData", rows)?))
    }

    /// Hash-join this resultset against `right`. Each left row is paired
    /// with the right document sharing its key; `map_fn` shapes the joined
    /// row (default `{left, right}`, with an empty `right` on misses).
    pub fn eq_join<J>(
        self,
        right: &J,
        left_key: &str,
        right_key: &str,
        map_fn: Option<&dyn Fn(&Document, &Document) -> Document>,
    ) -> Result<Resultset<'a>, DbError>
    where
        J: JoinSource + ?Sized,
    {
        let rows = join_rows(&self.data(), &right.join_docs(), left_key, right_key, map_fn);
        Ok(Resultset::owned(Collection::anonymous("joinData", rows)?))
    }

    /// Run the non-mutating steps of a transform pipeline. Steps that
    /// mutate the collection (`Update`, `Remove`) must go through
    /// `Collection::apply_transform`.
    pub fn transform(
        self,
        steps: &[TransformStep],
        params: Option<&Document>,
    ) -> Result<Resultset<'a>, DbError> {
        let mut rs = self;
        for step in steps {
            let step = match params {
                Some(p) => step.with_params(p),
                None => step.clone(),
            };
            rs = match step {
                TransformStep::Find { filter } => rs.find(&filter)?,
                TransformStep::Where { pred } => rs.where_(|d| pred(d)),
                TransformStep::SimpleSort { property, options } => {
                    rs.simple_sort_opts(&property, options)
                }
                TransformStep::CompoundSort { criteria } => rs.compound_sort(&criteria),
                TransformStep::Sort { cmp } => rs.sort(|a, b| cmp(a, b)),
                TransformStep::Limit { count } => rs.limit(count),
                TransformStep::Offset { count } => rs.offset(count),
                TransformStep::Map { f } => rs.map(|d| f(d))?,
                TransformStep::EqJoin { right, left_key, right_key } => {
                    rs.eq_join(right.as_slice(), &left_key, &right_key, None)?
                }
                TransformStep::MapReduce { map, reduce } => {
                    let value = rs.map_reduce(|d| map(d), |vals| reduce(vals));
                    Resultset::owned(Collection::anonymous(
                        "mapReduceData",
                        vec![bson::doc! { "value": value }],
                    )?)
                }
                TransformStep::Update { .. } | TransformStep::Remove => {
                    return Err(DbError::Transform(
                        "mutating steps must run through Collection::apply_transform".into(),
                    ));
                }
            };
        }
        Ok(rs)
    }

    /// Seed the pipeline with an explicit row set (view branches).
    pub(crate) fn with_rows(mut self, rows: Vec<usize>) -> Resultset<'a> {
        self.filtered_rows = rows;
        self.filter_initialized = true;
        self
    }

    /// Collapse the uninitialized "whole collection" state into explicit
    /// rows so slicing and sorting have something to work on.
    fn materialize_rows(&mut self) {
        if !self.filter_initialized {
            self.filtered_rows = (0..self.collection.data().len()).collect();
            self.filter_initialized = true;
        }
    }
}

/// The right-hand side of an `eq_join`: a collection, another resultset, or
/// a plain document sequence.
pub trait JoinSource {
    fn join_docs(&self) -> Vec<Document>;
}

impl JoinSource for Collection {
    fn join_docs(&self) -> Vec<Document> {
        self.data().to_vec()
    }
}

impl JoinSource for Resultset<'_> {
    fn join_docs(&self) -> Vec<Document> {
        self.data()
    }
}

impl JoinSource for [Document] {
    fn join_docs(&self) -> Vec<Document> {
        self.to_vec()
    }
}

impl JoinSource for Vec<Document> {
    fn join_docs(&self) -> Vec<Document> {
        self.clone()
    }
}

/// Hash-join two document sequences on a key field. Every left row joins
/// against the right document sharing its key value (last one wins on
/// duplicate keys), or an empty document when no right row matches.
pub(crate) fn join_rows(
    left: &[Document],
    right: &[Document],
    left_key: &str,
    right_key: &str,
    map_fn: Option<&dyn Fn(&Document, &Document) -> Document>,
) -> Vec<Document> {
    let right_path = FieldPath::parse(right_key);
    let mut by_key: HashMap<ScalarKey, &Document> = HashMap::new();
    for doc in right {
        if let Some(key) = right_path.resolve(doc).and_then(ScalarKey::from_bson) {
            by_key.insert(key, doc);
        }
    }

    let left_path = FieldPath::parse(left_key);
    let empty = Document::new();
    let mut rows = Vec::with_capacity(left.len());
    for left_doc in left {
        let right_doc = left_path
            .resolve(left_doc)
            .and_then(ScalarKey::from_bson)
            .and_then(|key| by_key.get(&key).copied())
            .unwrap_or(&empty);
        let row = match map_fn {
            Some(f) => f(left_doc, right_doc),
            None => bson::doc! { "left": left_doc.clone(), "right": right_doc.clone() },
        };
        rows.push(row);
    }
    rows
}

// ── Expression evaluation over a collection ─────────────────────

/// Evaluate an expression to data positions. `base` carries the current
/// rows of an already-filtered pipeline; `None` means "no filter yet",
/// which is the only state where a binary index range can serve a clause.
fn eval_expr(
    col: &Collection,
    base: Option<&[usize]>,
    expr: &Expr,
    first_only: bool,
) -> Vec<usize> {
    match expr {
        Expr::Clause { path, op } => eval_clause(col, base, path, op, first_only),
        Expr::And(children) => {
            if children.is_empty() {
                // match-everything: resolve the base
                return match base {
                    Some(rows) => rows.to_vec(),
                    None => (0..col.data().len()).collect(),
                };
            }
            let mut rows: Option<Vec<usize>> = base.map(<[usize]>::to_vec);
            for child in children {
                rows = Some(eval_expr(col, rows.as_deref(), child, false));
                if rows.as_ref().is_some_and(Vec::is_empty) {
                    break;
                }
            }
            let mut rows = rows.unwrap_or_default();
            if first_only {
                rows.truncate(1);
            }
            rows
        }
        Expr::Or(children) => {
            let mut seen = HashSet::new();
            let mut rows = Vec::new();
            'branches: for child in children {
                for pos in eval_expr(col, base, child, false) {
                    if seen.insert(pos) {
                        rows.push(pos);
                        if first_only {
                            break 'branches;
                        }
                    }
                }
            }
            rows
        }
    }
}

fn eval_clause(
    col: &Collection,
    base: Option<&[usize]>,
    path: &FieldPath,
    op: &QueryOp,
    first_only: bool,
) -> Vec<usize> {
    let data = col.data();
    match base {
        None => {
            if let Some(idx) = col.binary_index(path.as_str()) {
                if op.index_eligible() && !idx.dirty {
                    let mut rows = idx.positions_in(idx.calculate_range(data, op));
                    if first_only {
                        rows.truncate(1);
                    }
                    return rows;
                }
            }
            scan(data, (0..data.len()).collect::<Vec<_>>().into_iter(), path, op, first_only)
        }
        Some(rows) => scan(data, rows.iter().copied(), path, op, first_only),
    }
}

fn scan(
    data: &[Document],
    candidates: impl Iterator<Item = usize>,
    path: &FieldPath,
    op: &QueryOp,
    first_only: bool,
) -> Vec<usize> {
    let mut rows = Vec::new();
    for pos in candidates {
        if path.matches(&data[pos], &|v| op.matches(v)) {
            rows.push(pos);
            if first_only {
                break;
            }
        }
    }
    rows
}
