use bson::{Bson, Document};
use regex::Regex;

use crate::operator::{ElemFilter, QueryOp};
use crate::path::FieldPath;

/// Parse error for filter documents.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterParseError(pub String);

impl std::fmt::Display for FilterParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "filter parse error: {}", self.0)
    }
}

impl std::error::Error for FilterParseError {}

/// A compiled filter expression tree.
///
/// A filter document parses into clauses over compiled field paths. A
/// document with multiple top-level fields is an implicit `$and`; a field
/// whose value is not an operator document is an implicit `$eq`.
#[derive(Debug, Clone)]
pub enum Expr {
    Clause { path: FieldPath, op: QueryOp },
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    /// Parse a BSON filter document into an expression tree. An empty
    /// document parses to a match-everything `And([])`.
    pub fn parse(filter: &Document) -> Result<Expr, FilterParseError> {
        let mut children = Vec::new();
        for (key, value) in filter {
            match key.as_str() {
                "$and" => children.push(Expr::And(parse_expr_array(key, value)?)),
                "$or" => children.push(Expr::Or(parse_expr_array(key, value)?)),
                k if k.starts_with('$') => {
                    return Err(FilterParseError(format!("unknown top-level operator: {k}")));
                }
                _ => children.push(parse_field_condition(key, value)?),
            }
        }
        if children.len() == 1 {
            Ok(children.pop().unwrap_or(Expr::And(Vec::new())))
        } else {
            Ok(Expr::And(children))
        }
    }

    /// Build a single-clause expression programmatically.
    pub fn clause(path: &str, op: QueryOp) -> Expr {
        Expr::Clause {
            path: FieldPath::parse(path),
            op,
        }
    }

    /// Evaluate the expression against a document.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Expr::Clause { path, op } => path.matches(doc, &|v| op.matches(v)),
            Expr::And(children) => children.iter().all(|c| c.matches(doc)),
            Expr::Or(children) => children.iter().any(|c| c.matches(doc)),
        }
    }

    /// If this expression is exactly one clause, expose it for the planner.
    pub fn as_single_clause(&self) -> Option<(&FieldPath, &QueryOp)> {
        match self {
            Expr::Clause { path, op } => Some((path, op)),
            _ => None,
        }
    }
}

fn parse_expr_array(key: &str, value: &Bson) -> Result<Vec<Expr>, FilterParseError> {
    let Bson::Array(items) = value else {
        return Err(FilterParseError(format!("{key} value must be an array")));
    };
    if items.is_empty() {
        return Err(FilterParseError(format!("{key} array must not be empty")));
    }
    items
        .iter()
        .map(|item| match item {
            Bson::Document(d) => Expr::parse(d),
            _ => Err(FilterParseError(format!(
                "{key} array elements must be documents"
            ))),
        })
        .collect()
}

/// Parse a field condition: shorthand `$eq`, a regex literal, or an
/// operator sub-document.
fn parse_field_condition(field: &str, value: &Bson) -> Result<Expr, FilterParseError> {
    let path = FieldPath::parse(field);
    match value {
        Bson::RegularExpression(re) => Ok(Expr::Clause {
            path,
            op: QueryOp::Regex(compile_regex(&re.pattern, &re.options)?),
        }),
        Bson::Document(d) if d.iter().next().is_some_and(|(k, _)| k.starts_with('$')) => {
            if d.contains_key("$regex") {
                return Ok(Expr::Clause {
                    path,
                    op: parse_regex_doc(d)?,
                });
            }
            let mut clauses = Vec::new();
            for (key, v) in d {
                clauses.push(Expr::Clause {
                    path: path.clone(),
                    op: parse_op(key, v)?,
                });
            }
            match clauses.len() {
                0 => Err(FilterParseError("empty operator document".into())),
                1 => Ok(clauses.pop().unwrap_or(Expr::And(Vec::new()))),
                _ => Ok(Expr::And(clauses)),
            }
        }
        // anything else, dates and plain sub-documents included, is $eq
        _ => Ok(Expr::Clause {
            path,
            op: QueryOp::Eq(value.clone()),
        }),
    }
}

/// Parse one operator key/value pair into a [`QueryOp`].
fn parse_op(key: &str, value: &Bson) -> Result<QueryOp, FilterParseError> {
    let op = match key {
        "$eq" => QueryOp::Eq(value.clone()),
        "$aeq" => QueryOp::Aeq(value.clone()),
        "$ne" => QueryOp::Ne(value.clone()),
        "$dteq" => QueryOp::Dteq(value.clone()),
        "$gt" => QueryOp::Gt(value.clone()),
        "$gte" => QueryOp::Gte(value.clone()),
        "$lt" => QueryOp::Lt(value.clone()),
        "$lte" => QueryOp::Lte(value.clone()),
        "$jgt" => QueryOp::Jgt(value.clone()),
        "$jgte" => QueryOp::Jgte(value.clone()),
        "$jlt" => QueryOp::Jlt(value.clone()),
        "$jlte" => QueryOp::Jlte(value.clone()),
        "$between" => {
            let (lo, hi) = parse_pair(key, value)?;
            QueryOp::Between(lo, hi)
        }
        "$jbetween" => {
            let (lo, hi) = parse_pair(key, value)?;
            QueryOp::Jbetween(lo, hi)
        }
        "$in" => QueryOp::In(parse_array(key, value)?),
        "$nin" => QueryOp::Nin(parse_array(key, value)?),
        "$keyin" => QueryOp::Keyin(parse_object(key, value)?),
        "$nkeyin" => QueryOp::Nkeyin(parse_object(key, value)?),
        "$definedin" => QueryOp::DefinedIn(parse_object(key, value)?),
        "$undefinedin" => QueryOp::UndefinedIn(parse_object(key, value)?),
        "$containsString" => match value {
            Bson::String(s) => QueryOp::ContainsString(s.clone()),
            _ => return Err(FilterParseError("$containsString value must be a string".into())),
        },
        "$contains" => QueryOp::Contains(scalar_or_array(value)),
        "$containsAny" => QueryOp::ContainsAny(scalar_or_array(value)),
        "$containsNone" => QueryOp::ContainsNone(scalar_or_array(value)),
        "$elemMatch" => QueryOp::ElemMatch(Box::new(parse_elem_filter(value)?)),
        "$type" => match value {
            Bson::String(s) => QueryOp::Type(vec![s.clone()]),
            Bson::Array(items) => QueryOp::Type(
                items
                    .iter()
                    .map(|v| match v {
                        Bson::String(s) => Ok(s.clone()),
                        _ => Err(FilterParseError("$type names must be strings".into())),
                    })
                    .collect::<Result<_, _>>()?,
            ),
            _ => return Err(FilterParseError("$type value must be a string or array".into())),
        },
        "$finite" => QueryOp::Finite(parse_bool(key, value)?),
        "$size" => QueryOp::Size(parse_count(key, value)?),
        "$len" => QueryOp::Len(parse_count(key, value)?),
        "$exists" => QueryOp::Exists(parse_bool(key, value)?),
        "$not" => {
            let inner = parse_op_doc(key, value)?;
            QueryOp::Not(Box::new(inner))
        }
        "$and" => QueryOp::And(parse_op_array(key, value)?),
        "$or" => QueryOp::Or(parse_op_array(key, value)?),
        "$where" => {
            return Err(FilterParseError(
                "$where is programmatic only; build the operator directly".into(),
            ));
        }
        "$regex" | "$options" => {
            return Err(FilterParseError("$options without $regex".into()));
        }
        k => return Err(FilterParseError(format!("unknown field operator: {k}"))),
    };
    Ok(op)
}

/// Parse an operator sub-document (the value of `$not`) into one op,
/// combining multiple entries with `And`.
fn parse_op_doc(key: &str, value: &Bson) -> Result<QueryOp, FilterParseError> {
    let Bson::Document(d) = value else {
        return Err(FilterParseError(format!("{key} value must be a document")));
    };
    let mut ops = Vec::new();
    for (k, v) in d {
        ops.push(parse_op(k, v)?);
    }
    match ops.len() {
        0 => Err(FilterParseError(format!("{key} document must not be empty"))),
        1 => Ok(ops.pop().unwrap_or(QueryOp::And(Vec::new()))),
        _ => Ok(QueryOp::And(ops)),
    }
}

/// Parse an array of operator sub-documents (field-level `$and`/`$or`).
fn parse_op_array(key: &str, value: &Bson) -> Result<Vec<QueryOp>, FilterParseError> {
    let Bson::Array(items) = value else {
        return Err(FilterParseError(format!("{key} value must be an array")));
    };
    if items.is_empty() {
        return Err(FilterParseError(format!("{key} array must not be empty")));
    }
    items.iter().map(|item| parse_op_doc(key, item)).collect()
}

fn parse_elem_filter(value: &Bson) -> Result<ElemFilter, FilterParseError> {
    let Bson::Document(d) = value else {
        return Err(FilterParseError("$elemMatch value must be a document".into()));
    };
    let all_ops = d.iter().all(|(k, _)| k.starts_with('$'));
    if all_ops && !d.is_empty() {
        let mut ops = Vec::new();
        for (k, v) in d {
            ops.push(parse_op(k, v)?);
        }
        Ok(ElemFilter::Ops(ops))
    } else {
        Ok(ElemFilter::Query(Expr::parse(d)?))
    }
}

fn parse_regex_doc(d: &Document) -> Result<QueryOp, FilterParseError> {
    let mut pattern: Option<&str> = None;
    let mut options = "";
    for (key, value) in d {
        match key.as_str() {
            "$regex" => match value {
                Bson::String(s) => pattern = Some(s),
                Bson::RegularExpression(re) => {
                    return Ok(QueryOp::Regex(compile_regex(&re.pattern, &re.options)?));
                }
                _ => return Err(FilterParseError("$regex value must be a string".into())),
            },
            "$options" => match value {
                Bson::String(s) => options = s,
                _ => return Err(FilterParseError("$options value must be a string".into())),
            },
            k => {
                return Err(FilterParseError(format!(
                    "unexpected key alongside $regex: {k}"
                )));
            }
        }
    }
    let pat = pattern.ok_or_else(|| FilterParseError("missing $regex pattern".into()))?;
    Ok(QueryOp::Regex(compile_regex(pat, options)?))
}

/// Build a regex with inline flags from mongo-style option letters.
fn compile_regex(pattern: &str, options: &str) -> Result<Regex, FilterParseError> {
    let full = if options.is_empty() {
        pattern.to_string()
    } else {
        let mut prefix = String::with_capacity(4 + options.len() + pattern.len());
        prefix.push_str("(?");
        for ch in options.chars() {
            match ch {
                'i' | 's' | 'm' | 'x' => prefix.push(ch),
                c => return Err(FilterParseError(format!("unknown regex option: {c}"))),
            }
        }
        prefix.push(')');
        prefix.push_str(pattern);
        prefix
    };
    Regex::new(&full).map_err(|e| FilterParseError(format!("invalid regex pattern: {e}")))
}

fn parse_array(key: &str, value: &Bson) -> Result<Vec<Bson>, FilterParseError> {
    match value {
        Bson::Array(items) => Ok(items.clone()),
        _ => Err(FilterParseError(format!("{key} value must be an array"))),
    }
}

fn scalar_or_array(value: &Bson) -> Vec<Bson> {
    match value {
        Bson::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

fn parse_object(key: &str, value: &Bson) -> Result<Document, FilterParseError> {
    match value {
        Bson::Document(d) => Ok(d.clone()),
        _ => Err(FilterParseError(format!("{key} value must be a document"))),
    }
}

fn parse_pair(key: &str, value: &Bson) -> Result<(Bson, Bson), FilterParseError> {
    match value {
        Bson::Array(items) if items.len() == 2 => Ok((items[0].clone(), items[1].clone())),
        _ => Err(FilterParseError(format!(
            "{key} value must be a two-element array"
        ))),
    }
}

fn parse_bool(key: &str, value: &Bson) -> Result<bool, FilterParseError> {
    match value {
        Bson::Boolean(b) => Ok(*b),
        _ => Err(FilterParseError(format!("{key} value must be a boolean"))),
    }
}

fn parse_count(key: &str, value: &Bson) -> Result<usize, FilterParseError> {
    let n = match value {
        Bson::Int32(i) => i64::from(*i),
        Bson::Int64(i) => *i,
        _ => return Err(FilterParseError(format!("{key} value must be an integer"))),
    };
    usize::try_from(n).map_err(|_| FilterParseError(format!("{key} value must be non-negative")))
}
