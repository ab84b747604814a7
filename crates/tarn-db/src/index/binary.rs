use std::cmp::Ordering;

use bson::{Bson, Document};
use rand::Rng;
use tarn_query::{aeq, cmp_values, FieldPath, QueryOp};

/// A sorted permutation of data positions, ordered by the indexed property
/// under the comparator. Range queries resolve to a contiguous slice of
/// `values` via two binary searches.
///
/// Maintenance is either adaptive (every mutation splices the permutation
/// in place) or lazy (mutations set `dirty` and a rebuild happens on the
/// next `ensure_index`).
#[derive(Debug, Clone)]
pub struct BinaryIndex {
    property: String,
    path: FieldPath,
    pub(crate) values: Vec<usize>,
    pub(crate) dirty: bool,
}

/// Result of a range computation over an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexRange {
    Empty,
    /// Inclusive span of slots into `values`.
    Span(usize, usize),
    /// Aggregated data positions (the `$in` case).
    Positions(Vec<usize>),
}

impl BinaryIndex {
    pub fn new(property: &str) -> BinaryIndex {
        BinaryIndex {
            property: property.to_string(),
            path: FieldPath::parse(property),
            values: Vec::new(),
            dirty: true,
        }
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    /// The indexed value of the document at a data position.
    fn key_of<'a>(&self, data: &'a [Document], pos: usize) -> &'a Bson {
        self.path.resolve(&data[pos]).unwrap_or(&Bson::Null)
    }

    /// Sort `0..data.len()` from scratch. Clears `dirty`.
    pub fn rebuild(&mut self, data: &[Document]) {
        self.values = (0..data.len()).collect();
        let path = &self.path;
        let key_of = |pos: usize| path.resolve(&data[pos]).unwrap_or(&Bson::Null);
        self.values.sort_by(|&a, &b| cmp_values(key_of(a), key_of(b)));
        self.dirty = false;
    }

    /// First slot whose key is not less than `val`.
    fn lower_bound(&self, data: &[Document], val: &Bson) -> usize {
        self.values
            .partition_point(|&pos| cmp_values(self.key_of(data, pos), val) == Ordering::Less)
    }

    /// First slot whose key is greater than `val`.
    fn upper_bound(&self, data: &[Document], val: &Bson) -> usize {
        self.values
            .partition_point(|&pos| cmp_values(self.key_of(data, pos), val) != Ordering::Greater)
    }

    /// Adaptive insert: splice the new data position into sort order. The
    /// document must already be present in `data`.
    pub fn insert(&mut self, data: &[Document], pos: usize) {
        let val = self.key_of(data, pos).clone();
        let slot = self.upper_bound(data, &val);
        self.values.insert(slot, pos);
    }

    /// Adaptive update: the document at `pos` was replaced and `old_doc` is
    /// its previous form. Re-splices without any position shifting.
    pub fn update(&mut self, data: &[Document], pos: usize, old_doc: &Document) {
        let old_val = self.path.resolve(old_doc).unwrap_or(&Bson::Null).clone();
        self.remove_entry(data, pos, &old_val);
        self.insert(data, pos);
    }

    /// Adaptive remove. Must run before the document is spliced out of
    /// `data`: it locates the entry by the still-present value, removes it,
    /// then decrements every stored position greater than `pos` to
    /// compensate for the upcoming splice.
    pub fn remove(&mut self, data: &[Document], pos: usize) {
        let val = self.key_of(data, pos).clone();
        self.remove_entry(data, pos, &val);
        for v in &mut self.values {
            if *v > pos {
                *v -= 1;
            }
        }
    }

    /// Batch remove with a single-pass filter. `removed` must be sorted
    /// ascending; each surviving position shifts down by the number of
    /// removed positions below it.
    pub fn remove_batch(&mut self, removed: &[usize]) {
        self.values.retain(|v| removed.binary_search(v).is_err());
        for v in &mut self.values {
            let shift = removed.partition_point(|&r| r < *v);
            *v -= shift;
        }
    }

    /// Locate and remove the slot holding `pos`, binary-searching by value
    /// and scanning the equal run for the exact data position.
    fn remove_entry(&mut self, data: &[Document], pos: usize, val: &Bson) {
        let mut slot = self.values.partition_point(|&p| {
            // search by the *old* value, which may differ from data[p]
            cmp_values(self.key_of(data, p), val) == Ordering::Less
        });
        let mut found = None;
        while slot < self.values.len() {
            let p = self.values[slot];
            if p == pos {
                found = Some(slot);
                break;
            }
            if p != pos && !aeq(self.key_of(data, p), val) {
                break;
            }
            slot += 1;
        }
        // an entry displaced by an unindexed mutation falls back to a scan
        let slot = match found {
            Some(s) => s,
            None => match self.values.iter().position(|&p| p == pos) {
                Some(s) => s,
                None => return,
            },
        };
        self.values.remove(slot);
    }

    /// Resolve an index-eligible operator to a range of positions.
    pub fn calculate_range(&self, data: &[Document], op: &QueryOp) -> IndexRange {
        let len = self.values.len();
        if len == 0 {
            return IndexRange::Empty;
        }
        let span = |start: usize, end_excl: usize| {
            if start >= end_excl {
                IndexRange::Empty
            } else {
                IndexRange::Span(start, end_excl - 1)
            }
        };
        match op {
            QueryOp::Eq(v) | QueryOp::Aeq(v) | QueryOp::Dteq(v) => {
                span(self.lower_bound(data, v), self.upper_bound(data, v))
            }
            QueryOp::Gt(v) => span(self.upper_bound(data, v), len),
            QueryOp::Gte(v) => span(self.lower_bound(data, v), len),
            QueryOp::Lt(v) => span(0, self.lower_bound(data, v)),
            QueryOp::Lte(v) => span(0, self.upper_bound(data, v)),
            QueryOp::Between(lo, hi) => {
                span(self.lower_bound(data, lo), self.upper_bound(data, hi))
            }
            QueryOp::In(set) => {
                let mut seen = std::collections::HashSet::new();
                let mut positions = Vec::new();
                for v in set {
                    let (lo, hi) = (self.lower_bound(data, v), self.upper_bound(data, v));
                    for &pos in &self.values[lo..hi] {
                        if seen.insert(pos) {
                            positions.push(pos);
                        }
                    }
                }
                if positions.is_empty() {
                    IndexRange::Empty
                } else {
                    IndexRange::Positions(positions)
                }
            }
            _ => IndexRange::Empty,
        }
    }

    /// Materialize a range into data positions, in index order.
    pub fn positions_in(&self, range: IndexRange) -> Vec<usize> {
        match range {
            IndexRange::Empty => Vec::new(),
            IndexRange::Span(lo, hi) => self.values[lo..=hi].to_vec(),
            IndexRange::Positions(positions) => positions,
        }
    }

    /// Validate the sort invariant: every adjacent pair non-decreasing
    /// under the comparator, or a random sample of adjacent pairs when
    /// `sampling_factor` is set. Also checks the permutation is complete.
    pub fn validate(&self, data: &[Document], sampling_factor: Option<f64>) -> bool {
        if self.values.len() != data.len() {
            return false;
        }
        if self.values.len() < 2 {
            return true;
        }
        let pairs = self.values.len() - 1;
        match sampling_factor {
            Some(factor) => {
                let samples = ((pairs as f64) * factor).ceil() as usize;
                let mut rng = rand::thread_rng();
                (0..samples.max(1)).all(|_| {
                    let i = rng.gen_range(0..pairs);
                    self.pair_ordered(data, i)
                })
            }
            None => (0..pairs).all(|i| self.pair_ordered(data, i)),
        }
    }

    fn pair_ordered(&self, data: &[Document], i: usize) -> bool {
        let a = self.key_of(data, self.values[i]);
        let b = self.key_of(data, self.values[i + 1]);
        cmp_values(a, b) != Ordering::Greater
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn data() -> Vec<Document> {
        vec![
            doc! { "age": 30 },
            doc! { "age": 25 },
            doc! { "age": 40 },
            doc! { "age": 25 },
        ]
    }

    fn built(data: &[Document]) -> BinaryIndex {
        let mut idx = BinaryIndex::new("age");
        idx.rebuild(data);
        idx
    }

    #[test]
    fn rebuild_sorts_positions_by_value() {
        let data = data();
        let idx = built(&data);
        let keys: Vec<i32> = idx
            .values
            .iter()
            .map(|&p| data[p].get_i32("age").unwrap())
            .collect();
        assert_eq!(keys, vec![25, 25, 30, 40]);
        assert!(idx.validate(&data, None));
    }

    #[test]
    fn range_gt_skips_equal_run() {
        let data = data();
        let idx = built(&data);
        let range = idx.calculate_range(&data, &QueryOp::Gt(Bson::Int32(25)));
        assert_eq!(range, IndexRange::Span(2, 3));
    }

    #[test]
    fn range_gte_includes_equal_run() {
        let data = data();
        let idx = built(&data);
        let range = idx.calculate_range(&data, &QueryOp::Gte(Bson::Int32(25)));
        assert_eq!(range, IndexRange::Span(0, 3));
    }

    #[test]
    fn range_on_hole_starts_at_insertion_point() {
        let data = data();
        let idx = built(&data);
        // 28 is absent: $gt and $gte agree on the insertion point
        assert_eq!(
            idx.calculate_range(&data, &QueryOp::Gt(Bson::Int32(28))),
            IndexRange::Span(2, 3)
        );
        assert_eq!(
            idx.calculate_range(&data, &QueryOp::Gte(Bson::Int32(28))),
            IndexRange::Span(2, 3)
        );
    }

    #[test]
    fn range_outside_bounds_short_circuits() {
        let data = data();
        let idx = built(&data);
        assert_eq!(
            idx.calculate_range(&data, &QueryOp::Gt(Bson::Int32(100))),
            IndexRange::Empty
        );
        assert_eq!(
            idx.calculate_range(&data, &QueryOp::Lte(Bson::Int32(100))),
            IndexRange::Span(0, 3)
        );
        assert_eq!(
            idx.calculate_range(&data, &QueryOp::Lt(Bson::Int32(0))),
            IndexRange::Empty
        );
    }

    #[test]
    fn range_between_is_inclusive() {
        let data = data();
        let idx = built(&data);
        let range = idx.calculate_range(&data, &QueryOp::Between(Bson::Int32(25), Bson::Int32(30)));
        assert_eq!(range, IndexRange::Span(0, 2));
    }

    #[test]
    fn range_in_aggregates_eq_ranges() {
        let data = data();
        let idx = built(&data);
        let range =
            idx.calculate_range(&data, &QueryOp::In(vec![Bson::Int32(40), Bson::Int32(25)]));
        let positions = idx.positions_in(range);
        assert_eq!(positions.len(), 3);
        assert!(positions.contains(&2));
        assert!(positions.contains(&1));
        assert!(positions.contains(&3));
    }

    #[test]
    fn adaptive_insert_splices_in_order() {
        let mut data = data();
        let mut idx = built(&data);
        data.push(doc! { "age": 28 });
        idx.insert(&data, 4);
        let keys: Vec<i32> = idx
            .values
            .iter()
            .map(|&p| data[p].get_i32("age").unwrap())
            .collect();
        assert_eq!(keys, vec![25, 25, 28, 30, 40]);
        assert!(idx.validate(&data, None));
    }

    #[test]
    fn adaptive_remove_compensates_positions() {
        let mut data = data();
        let mut idx = built(&data);
        // remove position 1 (age 25)
        idx.remove(&data, 1);
        data.remove(1);
        assert!(idx.validate(&data, None));
        let keys: Vec<i32> = idx
            .values
            .iter()
            .map(|&p| data[p].get_i32("age").unwrap())
            .collect();
        assert_eq!(keys, vec![25, 30, 40]);
    }

    #[test]
    fn adaptive_update_resorts_entry() {
        let mut data = data();
        let mut idx = built(&data);
        let old = data[0].clone();
        data[0] = doc! { "age": 99 };
        idx.update(&data, 0, &old);
        let keys: Vec<i32> = idx
            .values
            .iter()
            .map(|&p| data[p].get_i32("age").unwrap())
            .collect();
        assert_eq!(keys, vec![25, 25, 40, 99]);
    }

    #[test]
    fn batch_remove_filters_and_shifts() {
        let mut data = data();
        let mut idx = built(&data);
        let removed = vec![0, 2];
        idx.remove_batch(&removed);
        data.remove(2);
        data.remove(0);
        assert!(idx.validate(&data, None));
        assert_eq!(idx.values.len(), 2);
    }

    #[test]
    fn validate_detects_corruption() {
        let data = data();
        let mut idx = built(&data);
        idx.values.swap(0, 3);
        assert!(!idx.validate(&data, None));
    }
}
