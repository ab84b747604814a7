use std::cmp::Ordering;
use std::sync::Arc;

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use tarn_query::{SimpleSortOptions, SortCriterion};

use crate::error::DbError;

/// Token prefixing a string value that should be replaced by a named
/// parameter when the transform runs.
pub const PARAM_TOKEN: &str = "[%lktxp]";

pub type DocPredicate = Arc<dyn Fn(&Document) -> bool + Send + Sync>;
pub type DocComparator = Arc<dyn Fn(&Document, &Document) -> Ordering + Send + Sync>;
pub type DocMapper = Arc<dyn Fn(&Document) -> Document + Send + Sync>;
pub type DocExtractor = Arc<dyn Fn(&Document) -> Bson + Send + Sync>;
pub type ValuesReducer = Arc<dyn Fn(&[Bson]) -> Bson + Send + Sync>;
pub type DocMutator = Arc<dyn Fn(&mut Document) + Send + Sync>;

/// One step of a named transform pipeline.
///
/// Data-bearing steps (`Find`, the sorts, `Limit`, `Offset`, `EqJoin`,
/// `Remove`) round-trip through persistence; steps holding closures are
/// programmatic only and transforms containing them are skipped when the
/// collection is serialized.
#[derive(Clone)]
pub enum TransformStep {
    Find { filter: Document },
    Where { pred: DocPredicate },
    SimpleSort { property: String, options: SimpleSortOptions },
    CompoundSort { criteria: Vec<SortCriterion> },
    Sort { cmp: DocComparator },
    Limit { count: usize },
    Offset { count: usize },
    Map { f: DocMapper },
    EqJoin { right: Vec<Document>, left_key: String, right_key: String },
    MapReduce { map: DocExtractor, reduce: ValuesReducer },
    Update { f: DocMutator },
    Remove,
}

impl std::fmt::Debug for TransformStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransformStep::Find { .. } => "Find",
            TransformStep::Where { .. } => "Where",
            TransformStep::SimpleSort { .. } => "SimpleSort",
            TransformStep::CompoundSort { .. } => "CompoundSort",
            TransformStep::Sort { .. } => "Sort",
            TransformStep::Limit { .. } => "Limit",
            TransformStep::Offset { .. } => "Offset",
            TransformStep::Map { .. } => "Map",
            TransformStep::EqJoin { .. } => "EqJoin",
            TransformStep::MapReduce { .. } => "MapReduce",
            TransformStep::Update { .. } => "Update",
            TransformStep::Remove => "Remove",
        };
        f.write_str(name)
    }
}

impl TransformStep {
    /// Whether this step survives serialization.
    pub fn is_serializable(&self) -> bool {
        TransformStepRepr::try_from(self).is_ok()
    }

    /// Clone the step with `[%lktxp]name` tokens replaced from `params`.
    /// Tokens without a matching parameter are left in place.
    pub fn with_params(&self, params: &Document) -> TransformStep {
        match self {
            TransformStep::Find { filter } => TransformStep::Find {
                filter: substitute_document(filter, params),
            },
            TransformStep::EqJoin { right, left_key, right_key } => TransformStep::EqJoin {
                right: right.clone(),
                left_key: substitute_string(left_key, params),
                right_key: substitute_string(right_key, params),
            },
            other => other.clone(),
        }
    }
}

fn substitute_string(value: &str, params: &Document) -> String {
    match value.strip_prefix(PARAM_TOKEN) {
        Some(name) => match params.get(name) {
            Some(Bson::String(s)) => s.clone(),
            _ => value.to_string(),
        },
        None => value.to_string(),
    }
}

fn substitute_value(value: &Bson, params: &Document) -> Bson {
    match value {
        Bson::String(s) => match s.strip_prefix(PARAM_TOKEN) {
            Some(name) => params.get(name).cloned().unwrap_or_else(|| value.clone()),
            None => value.clone(),
        },
        Bson::Document(d) => Bson::Document(substitute_document(d, params)),
        Bson::Array(items) => {
            Bson::Array(items.iter().map(|v| substitute_value(v, params)).collect())
        }
        other => other.clone(),
    }
}

fn substitute_document(doc: &Document, params: &Document) -> Document {
    doc.iter()
        .map(|(k, v)| (k.clone(), substitute_value(v, params)))
        .collect()
}

/// Serializable form of the data-bearing transform steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransformStepRepr {
    Find {
        filter: Document,
    },
    #[serde(rename = "simplesort")]
    SimpleSort {
        property: String,
        #[serde(default)]
        options: SimpleSortOptions,
    },
    #[serde(rename = "compoundsort")]
    CompoundSort {
        criteria: Vec<SortCriterion>,
    },
    Limit {
        count: usize,
    },
    Offset {
        count: usize,
    },
    EqJoin {
        right: Vec<Document>,
        left_key: String,
        right_key: String,
    },
    Remove,
}

impl TryFrom<&TransformStep> for TransformStepRepr {
    type Error = DbError;

    fn try_from(step: &TransformStep) -> Result<TransformStepRepr, DbError> {
        Ok(match step {
            TransformStep::Find { filter } => TransformStepRepr::Find { filter: filter.clone() },
            TransformStep::SimpleSort { property, options } => TransformStepRepr::SimpleSort {
                property: property.clone(),
                options: *options,
            },
            TransformStep::CompoundSort { criteria } => TransformStepRepr::CompoundSort {
                criteria: criteria.clone(),
            },
            TransformStep::Limit { count } => TransformStepRepr::Limit { count: *count },
            TransformStep::Offset { count } => TransformStepRepr::Offset { count: *count },
            TransformStep::EqJoin { right, left_key, right_key } => TransformStepRepr::EqJoin {
                right: right.clone(),
                left_key: left_key.clone(),
                right_key: right_key.clone(),
            },
            TransformStep::Remove => TransformStepRepr::Remove,
            other => {
                return Err(DbError::Transform(format!(
                    "step {other:?} holds a closure and cannot be serialized"
                )));
            }
        })
    }
}

impl From<TransformStepRepr> for TransformStep {
    fn from(repr: TransformStepRepr) -> TransformStep {
        match repr {
            TransformStepRepr::Find { filter } => TransformStep::Find { filter },
            TransformStepRepr::SimpleSort { property, options } => {
                TransformStep::SimpleSort { property, options }
            }
            TransformStepRepr::CompoundSort { criteria } => TransformStep::CompoundSort { criteria },
            TransformStepRepr::Limit { count } => TransformStep::Limit { count },
            TransformStepRepr::Offset { count } => TransformStep::Offset { count },
            TransformStepRepr::EqJoin { right, left_key, right_key } => {
                TransformStep::EqJoin { right, left_key, right_key }
            }
            TransformStepRepr::Remove => TransformStep::Remove,
        }
    }
}
