use common::Value;
use std::cmp::Ordering;

/// Merge-order comparison: nulls sort first, numeric-coercible pairs compare
/// numerically, everything else compares as strings.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        (false, false) => {}
    }
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    a.to_string().cmp(&b.to_string())
}
