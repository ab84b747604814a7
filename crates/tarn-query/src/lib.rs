mod compare;
mod filter;
mod operator;
mod path;
mod sort;
mod value;

pub use compare::{aeq, cmp_values, coerce_string, gt, lt, strict_cmp, strict_eq, to_number};
pub use filter::{Expr, FilterParseError};
pub use operator::{ElemFilter, QueryOp, WherePred};
pub use path::FieldPath;
pub use sort::{compare_documents, compare_on, SimpleSortOptions, SortCriterion, SortDirection};
pub use value::ScalarKey;
