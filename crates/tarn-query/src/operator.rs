use std::cmp::Ordering;
use std::sync::Arc;

use bson::{Bson, Document};
use regex::Regex;

use crate::compare::{aeq, coerce_string, gt, lt, strict_cmp, strict_eq, to_number};
use crate::filter::Expr;

/// Programmatic predicate used by `$where`. Not constructible from a filter
/// document.
#[derive(Clone)]
pub struct WherePred(pub Arc<dyn Fn(Option<&Bson>) -> bool + Send + Sync>);

impl std::fmt::Debug for WherePred {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WherePred(..)")
    }
}

/// The sub-query of an `$elemMatch`: either a filter document applied to
/// each element (element documents), or a bare operator set applied to each
/// element value (scalar arrays).
#[derive(Debug, Clone)]
pub enum ElemFilter {
    Query(Expr),
    Ops(Vec<QueryOp>),
}

impl ElemFilter {
    fn matches(&self, element: &Bson) -> bool {
        match self {
            ElemFilter::Query(expr) => match element {
                Bson::Document(d) => expr.matches(d),
                _ => false,
            },
            ElemFilter::Ops(ops) => ops.iter().all(|op| op.matches(Some(element))),
        }
    }
}

/// The closed set of query operators. Evaluation is one `match`; the query
/// planner decides index eligibility statically from the variant alone.
///
/// The `$j`-prefixed variants compare strictly within a value's native kind;
/// all other ordering operators go through the heterogeneous comparator.
#[derive(Debug, Clone)]
pub enum QueryOp {
    Eq(Bson),
    Aeq(Bson),
    Ne(Bson),
    Dteq(Bson),
    Gt(Bson),
    Gte(Bson),
    Lt(Bson),
    Lte(Bson),
    Jgt(Bson),
    Jgte(Bson),
    Jlt(Bson),
    Jlte(Bson),
    Between(Bson, Bson),
    Jbetween(Bson, Bson),
    In(Vec<Bson>),
    Nin(Vec<Bson>),
    Keyin(Document),
    Nkeyin(Document),
    DefinedIn(Document),
    UndefinedIn(Document),
    Regex(Regex),
    ContainsString(String),
    Contains(Vec<Bson>),
    ContainsAny(Vec<Bson>),
    ContainsNone(Vec<Bson>),
    ElemMatch(Box<ElemFilter>),
    Type(Vec<String>),
    Finite(bool),
    Size(usize),
    Len(usize),
    Exists(bool),
    Not(Box<QueryOp>),
    And(Vec<QueryOp>),
    Or(Vec<QueryOp>),
    Where(WherePred),
}

impl QueryOp {
    /// Whether a binary index may service this operator via a range lookup.
    pub fn index_eligible(&self) -> bool {
        matches!(
            self,
            QueryOp::Eq(_)
                | QueryOp::Aeq(_)
                | QueryOp::Dteq(_)
                | QueryOp::Gt(_)
                | QueryOp::Gte(_)
                | QueryOp::Lt(_)
                | QueryOp::Lte(_)
                | QueryOp::In(_)
                | QueryOp::Between(_, _)
        )
    }

    /// Evaluate the operator against a resolved field value. `None` means
    /// the field is absent, which compares as null for the comparator-based
    /// operators and fails the strict and range ones.
    pub fn matches(&self, value: Option<&Bson>) -> bool {
        let v = value.unwrap_or(&Bson::Null);
        match self {
            QueryOp::Eq(q) | QueryOp::Aeq(q) | QueryOp::Dteq(q) => aeq(v, q),
            QueryOp::Ne(q) => !aeq(v, q),
            QueryOp::Gt(q) => gt(v, q, false),
            QueryOp::Gte(q) => gt(v, q, true),
            QueryOp::Lt(q) => lt(v, q, false),
            QueryOp::Lte(q) => lt(v, q, true),
            QueryOp::Jgt(q) => value.is_some() && strict_cmp(v, q) == Some(Ordering::Greater),
            QueryOp::Jgte(q) => {
                value.is_some()
                    && matches!(strict_cmp(v, q), Some(Ordering::Greater | Ordering::Equal))
            }
            QueryOp::Jlt(q) => value.is_some() && strict_cmp(v, q) == Some(Ordering::Less),
            QueryOp::Jlte(q) => {
                value.is_some()
                    && matches!(strict_cmp(v, q), Some(Ordering::Less | Ordering::Equal))
            }
            QueryOp::Between(lo, hi) => value.is_some() && gt(v, lo, true) && lt(v, hi, true),
            QueryOp::Jbetween(lo, hi) => {
                value.is_some()
                    && matches!(strict_cmp(v, lo), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(strict_cmp(v, hi), Some(Ordering::Less | Ordering::Equal))
            }
            QueryOp::In(set) => set.iter().any(|q| aeq(v, q)),
            QueryOp::Nin(set) => !set.iter().any(|q| aeq(v, q)),
            QueryOp::Keyin(obj) => value.is_some() && obj.contains_key(coerce_string(v)),
            QueryOp::Nkeyin(obj) => !(value.is_some() && obj.contains_key(coerce_string(v))),
            QueryOp::DefinedIn(obj) => value.is_some() && obj.get(&coerce_string(v)).is_some(),
            QueryOp::UndefinedIn(obj) => !(value.is_some() && obj.get(&coerce_string(v)).is_some()),
            QueryOp::Regex(re) => matches!(v, Bson::String(s) if re.is_match(s)),
            QueryOp::ContainsString(needle) => {
                matches!(v, Bson::String(s) if s.contains(needle.as_str()))
            }
            QueryOp::Contains(needles) => needles.iter().all(|n| contains_one(v, n)),
            QueryOp::ContainsAny(needles) => needles.iter().any(|n| contains_one(v, n)),
            QueryOp::ContainsNone(needles) => !needles.iter().any(|n| contains_one(v, n)),
            QueryOp::ElemMatch(filter) => {
                matches!(v, Bson::Array(items) if items.iter().any(|el| filter.matches(el)))
            }
            QueryOp::Type(names) => {
                let name = type_name(value);
                names.iter().any(|n| n == name)
            }
            QueryOp::Finite(expected) => to_number(v).is_some() == *expected,
            QueryOp::Size(n) => matches!(v, Bson::Array(items) if items.len() == *n),
            QueryOp::Len(n) => matches!(v, Bson::String(s) if s.chars().count() == *n),
            QueryOp::Exists(expected) => value.is_some() == *expected,
            QueryOp::Not(inner) => !inner.matches(value),
            QueryOp::And(ops) => ops.iter().all(|op| op.matches(value)),
            QueryOp::Or(ops) => ops.iter().any(|op| op.matches(value)),
            QueryOp::Where(pred) => (pred.0)(value),
        }
    }
}

/// Containment of one needle: arrays contain by strict element equality,
/// strings by substring, documents by key.
fn contains_one(container: &Bson, needle: &Bson) -> bool {
    match container {
        Bson::Array(items) => items.iter().any(|el| strict_eq(el, needle)),
        Bson::String(s) => s.contains(coerce_string(needle).as_str()),
        Bson::Document(d) => d.contains_key(coerce_string(needle)),
        _ => false,
    }
}

fn type_name(value: Option<&Bson>) -> &'static str {
    match value {
        None => "undefined",
        Some(Bson::Null | Bson::Undefined) => "null",
        Some(Bson::Boolean(_)) => "boolean",
        Some(Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) => "number",
        Some(Bson::String(_)) => "string",
        Some(Bson::DateTime(_)) => "date",
        Some(Bson::Array(_)) => "array",
        Some(Bson::Document(_)) => "object",
        Some(_) => "other",
    }
}
