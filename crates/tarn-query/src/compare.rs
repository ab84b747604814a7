use std::cmp::Ordering;

use bson::Bson;

/// Tier of a value in the heterogeneous total order. Values in different
/// tiers compare by tier alone; only tier 5 values are compared by content.
///
/// null/undefined < NaN < false < true < "" < everything else
fn tier(v: &Bson) -> u8 {
    match v {
        Bson::Null | Bson::Undefined => 0,
        Bson::Double(d) if d.is_nan() => 1,
        Bson::Boolean(false) => 2,
        Bson::Boolean(true) => 3,
        Bson::String(s) if s.is_empty() => 4,
        _ => 5,
    }
}

/// Coerce a value to a finite number, if it has one. Dates coerce to epoch
/// milliseconds; numeric strings parse; everything else is `None`.
pub fn to_number(v: &Bson) -> Option<f64> {
    match v {
        Bson::Int32(i) => Some(*i as f64),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(d) if d.is_finite() => Some(*d),
        Bson::DateTime(dt) => Some(dt.timestamp_millis() as f64),
        Bson::Boolean(b) => Some(*b as i64 as f64),
        Bson::String(s) => s.trim().parse::<f64>().ok().filter(|d| d.is_finite()),
        _ => None,
    }
}

/// String coercion used by the lexicographic fallback and by key-based
/// operators (`$keyin` and friends).
pub fn coerce_string(v: &Bson) -> String {
    match v {
        Bson::String(s) => s.clone(),
        Bson::Int32(i) => i.to_string(),
        Bson::Int64(i) => i.to_string(),
        Bson::Double(d) => d.to_string(),
        Bson::Boolean(b) => b.to_string(),
        Bson::DateTime(dt) => dt.timestamp_millis().to_string(),
        other => other.to_string(),
    }
}

/// Three-way comparison over heterogeneous values. This is the single
/// source of truth for every sorted structure: inserts, removes, sorts and
/// range queries all go through it, so indices stay mutually consistent.
///
/// Within the top tier, numeric coercion wins when both sides have a finite
/// number; otherwise the string coercions compare lexicographically.
pub fn cmp_values(a: &Bson, b: &Bson) -> Ordering {
    let (ta, tb) = (tier(a), tier(b));
    if ta != 5 || tb != 5 {
        return ta.cmp(&tb);
    }
    match (to_number(a), to_number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => coerce_string(a).cmp(&coerce_string(b)),
    }
}

/// Abstract equality under the comparator.
pub fn aeq(a: &Bson, b: &Bson) -> bool {
    cmp_values(a, b) == Ordering::Equal
}

/// `a < b` under the comparator; `eq` selects whether equality counts.
pub fn lt(a: &Bson, b: &Bson, eq: bool) -> bool {
    match cmp_values(a, b) {
        Ordering::Less => true,
        Ordering::Equal => eq,
        Ordering::Greater => false,
    }
}

/// `a > b` under the comparator; `eq` selects whether equality counts.
pub fn gt(a: &Bson, b: &Bson, eq: bool) -> bool {
    match cmp_values(a, b) {
        Ordering::Greater => true,
        Ordering::Equal => eq,
        Ordering::Less => false,
    }
}

/// Strict comparison backing the `$j*` operators: values only relate within
/// their native kind (the numeric kinds form one family), with no string
/// parsing or cross-type coercion. Mismatched kinds are unordered.
pub fn strict_cmp(a: &Bson, b: &Bson) -> Option<Ordering> {
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => {
            Some(x.timestamp_millis().cmp(&y.timestamp_millis()))
        }
        (Bson::Null, Bson::Null) | (Bson::Undefined, Bson::Undefined) => Some(Ordering::Equal),
        _ => {
            let x = strict_number(a)?;
            let y = strict_number(b)?;
            x.partial_cmp(&y)
        }
    }
}

/// Strict equality: same-kind values only.
pub fn strict_eq(a: &Bson, b: &Bson) -> bool {
    strict_cmp(a, b) == Some(Ordering::Equal)
}

fn strict_number(v: &Bson) -> Option<f64> {
    match v {
        Bson::Int32(i) => Some(*i as f64),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(d) => Some(*d),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(ms: i64) -> Bson {
        Bson::DateTime(bson::DateTime::from_millis(ms))
    }

    #[test]
    fn tier_order_holds() {
        // null < NaN < false < true < "" < other
        let ladder = vec![
            Bson::Null,
            Bson::Double(f64::NAN),
            Bson::Boolean(false),
            Bson::Boolean(true),
            Bson::String(String::new()),
            Bson::Int32(0),
        ];
        for pair in ladder.windows(2) {
            assert_eq!(
                cmp_values(&pair[0], &pair[1]),
                Ordering::Less,
                "{:?} should sort before {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn undefined_equals_null() {
        assert!(aeq(&Bson::Undefined, &Bson::Null));
    }

    #[test]
    fn nan_equals_nan() {
        assert!(aeq(&Bson::Double(f64::NAN), &Bson::Double(f64::NAN)));
    }

    #[test]
    fn numeric_coercion_beats_lexicographic() {
        // "10" > "9" numerically even though it sorts first as a string
        assert_eq!(
            cmp_values(&Bson::String("10".into()), &Bson::String("9".into())),
            Ordering::Greater
        );
        assert_eq!(
            cmp_values(&Bson::String("25".into()), &Bson::Int32(30)),
            Ordering::Less
        );
    }

    #[test]
    fn mixed_non_numeric_falls_back_to_strings() {
        assert_eq!(
            cmp_values(&Bson::String("apple".into()), &Bson::String("banana".into())),
            Ordering::Less
        );
        // number vs non-numeric string: compares "12" against "apple"
        assert_eq!(
            cmp_values(&Bson::Int32(12), &Bson::String("apple".into())),
            Ordering::Less
        );
    }

    #[test]
    fn dates_compare_by_millis() {
        assert_eq!(cmp_values(&date(100), &date(200)), Ordering::Less);
        assert!(aeq(&date(150), &date(150)));
        // date vs raw millis number coerce into the same scale
        assert!(aeq(&date(1000), &Bson::Int64(1000)));
    }

    #[test]
    fn lt_gt_respect_eq_flag() {
        let a = Bson::Int32(5);
        assert!(!lt(&a, &a, false));
        assert!(lt(&a, &a, true));
        assert!(!gt(&a, &a, false));
        assert!(gt(&a, &a, true));
    }

    #[test]
    fn strict_cmp_rejects_cross_type() {
        assert_eq!(strict_cmp(&Bson::String("5".into()), &Bson::Int32(5)), None);
        assert_eq!(
            strict_cmp(&Bson::Int64(5), &Bson::Double(5.0)),
            Some(Ordering::Equal)
        );
    }
}
