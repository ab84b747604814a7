use bson::Bson;

/// Hashable, orderable projection of a BSON scalar.
///
/// Unique and exact indices key documents by field value; `Bson` itself is
/// neither `Eq` nor `Hash`, so scalar values are projected into this type
/// first. Numeric values collapse into a single key space: `Int32(1)`,
/// `Int64(1)` and `Double(1.0)` all produce `Int(1)`, matching the
/// comparator's numeric coercion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScalarKey {
    Null,
    Bool(bool),
    Int(i64),
    /// Normalized IEEE-754 bits. -0.0 is stored as 0.0; NaN never occurs
    /// here (it projects through the canonical NaN bit pattern).
    Float(u64),
    Str(String),
    /// Milliseconds since the epoch.
    Date(i64),
}

impl ScalarKey {
    /// Project a BSON value into a key. Composite values (arrays, documents,
    /// binary data) are not indexable and return `None`.
    pub fn from_bson(value: &Bson) -> Option<ScalarKey> {
        match value {
            Bson::Null | Bson::Undefined => Some(ScalarKey::Null),
            Bson::Boolean(b) => Some(ScalarKey::Bool(*b)),
            Bson::Int32(i) => Some(ScalarKey::Int(*i as i64)),
            Bson::Int64(i) => Some(ScalarKey::Int(*i)),
            Bson::Double(d) => Some(Self::from_f64(*d)),
            Bson::String(s) => Some(ScalarKey::Str(s.clone())),
            Bson::DateTime(dt) => Some(ScalarKey::Date(dt.timestamp_millis())),
            _ => None,
        }
    }

    fn from_f64(d: f64) -> ScalarKey {
        if d.is_finite() && d.fract() == 0.0 && d >= i64::MIN as f64 && d <= i64::MAX as f64 {
            return ScalarKey::Int(d as i64);
        }
        let normalized = if d.is_nan() {
            f64::NAN
        } else if d == 0.0 {
            0.0
        } else {
            d
        };
        ScalarKey::Float(normalized.to_bits())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ScalarKey::Null)
    }
}

impl std::fmt::Display for ScalarKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarKey::Null => write!(f, "null"),
            ScalarKey::Bool(b) => write!(f, "{b}"),
            ScalarKey::Int(i) => write!(f, "{i}"),
            ScalarKey::Float(bits) => write!(f, "{}", f64::from_bits(*bits)),
            ScalarKey::Str(s) => write!(f, "{s}"),
            ScalarKey::Date(ms) => write!(f, "date({ms})"),
        }
    }
}
