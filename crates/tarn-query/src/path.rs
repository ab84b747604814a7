use bson::{Bson, Document};

/// A dot-notation property path, compiled once at query construction.
///
/// `"addr.city"` splits into `["addr", "city"]`. Numeric segments address
/// array elements directly; a non-numeric segment applied to an array fans
/// out over its elements (see [`FieldPath::matches`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    raw: String,
    segments: Vec<String>,
}

impl FieldPath {
    pub fn parse(path: &str) -> FieldPath {
        FieldPath {
            raw: path.to_string(),
            segments: path.split('.').map(str::to_string).collect(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// A simple path has a single segment (no dots).
    pub fn is_simple(&self) -> bool {
        self.segments.len() == 1
    }

    /// Plain navigation without array fan-out. Used where a single value is
    /// needed: sort keys, index extraction, join keys.
    pub fn resolve<'a>(&self, doc: &'a Document) -> Option<&'a Bson> {
        let mut current = doc.get(self.segments.first()?)?;
        for seg in &self.segments[1..] {
            current = match current {
                Bson::Document(d) => d.get(seg)?,
                Bson::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Array-aware evaluation: walk the path and apply `pred` to the leaf
    /// value. When an intermediate value is an array and the next segment is
    /// not a numeric index, the remaining path is evaluated against every
    /// element and any match satisfies the predicate. A missing leaf invokes
    /// `pred(None)` so operators like `$exists: false` and `$ne` can match.
    pub fn matches(&self, doc: &Document, pred: &dyn Fn(Option<&Bson>) -> bool) -> bool {
        match doc.get(&self.segments[0]) {
            Some(value) => matches_inner(value, &self.segments[1..], pred),
            None => pred(None),
        }
    }
}

fn matches_inner(value: &Bson, segments: &[String], pred: &dyn Fn(Option<&Bson>) -> bool) -> bool {
    let Some((seg, rest)) = segments.split_first() else {
        return pred(Some(value));
    };
    match value {
        Bson::Document(d) => match d.get(seg) {
            Some(v) => matches_inner(v, rest, pred),
            None => pred(None),
        },
        Bson::Array(items) => {
            if let Ok(i) = seg.parse::<usize>() {
                return match items.get(i) {
                    Some(v) => matches_inner(v, rest, pred),
                    None => pred(None),
                };
            }
            items.iter().any(|el| matches_inner(el, segments, pred))
        }
        _ => pred(None),
    }
}
