use std::cmp::Ordering;

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::compare::cmp_values;
use crate::path::FieldPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn apply(self, ord: Ordering) -> Ordering {
        match self {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    }
}

/// One criterion of a compound sort, evaluated in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortCriterion {
    pub field: String,
    pub direction: SortDirection,
}

impl SortCriterion {
    pub fn asc(field: &str) -> SortCriterion {
        SortCriterion {
            field: field.to_string(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: &str) -> SortCriterion {
        SortCriterion {
            field: field.to_string(),
            direction: SortDirection::Desc,
        }
    }
}

/// Options for a single-property sort.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SimpleSortOptions {
    #[serde(default)]
    pub desc: bool,
    /// Never take the indexed-sort shortcut, even when an index is usable.
    #[serde(default)]
    pub disable_indexed_sort: bool,
}

/// Compare two documents on one property under the comparator.
pub fn compare_on(a: &Document, b: &Document, path: &FieldPath) -> Ordering {
    let av = path.resolve(a).unwrap_or(&Bson::Null);
    let bv = path.resolve(b).unwrap_or(&Bson::Null);
    cmp_values(av, bv)
}

/// Compare two documents under compound criteria: later criteria break ties
/// left by earlier ones.
pub fn compare_documents(a: &Document, b: &Document, criteria: &[(FieldPath, SortDirection)]) -> Ordering {
    for (path, direction) in criteria {
        let ord = direction.apply(compare_on(a, b, path));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
