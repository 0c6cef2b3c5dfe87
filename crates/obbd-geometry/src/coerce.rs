//! Typed converters for loosely-shaped numeric output.
//!
//! Model servers emit tensors converted to JSON, so a confidence may arrive as
//! `0.9`, `"0.9"`, `[0.9]` or `[[0.9]]`. Each converter accepts a fixed set of
//! shapes and reports anything else as a [`CoerceError`].

use serde_json::Value;

use crate::error::{CoerceError, CoerceResult};

/// Plain number, numeric string, or a singleton array of either (any depth).
pub fn number(value: &Value) -> CoerceResult<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| CoerceError::not_numeric(value))?,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| CoerceError::not_numeric(value))?,
        Value::Array(items) if items.len() == 1 => return number(&items[0]),
        Value::Array(items) => return Err(CoerceError::NotScalar(items.len())),
        _ => return Err(CoerceError::not_numeric(value)),
    };

    if n.is_finite() {
        Ok(n)
    } else {
        Err(CoerceError::NonFinite(n))
    }
}

/// Class id: any [`number`], truncated toward zero.
pub fn class_id(value: &Value) -> CoerceResult<i64> {
    number(value).map(|n| n.trunc() as i64)
}

/// Confidence: any [`number`] within `[0, 1]`.
pub fn confidence(value: &Value) -> CoerceResult<f64> {
    let n = number(value)?;
    if (0.0..=1.0).contains(&n) {
        Ok(n)
    } else {
        Err(CoerceError::OutOfUnitRange(n))
    }
}

/// Name of a class id in a name table.
///
/// The table is either a map keyed by the decimal id or a list indexed by id.
/// Entries must be strings.
pub fn class_name(table: &Value, id: i64) -> CoerceResult<String> {
    let entry = match table {
        Value::Object(map) => map.get(&id.to_string()),
        Value::Array(items) => usize::try_from(id).ok().and_then(|i| items.get(i)),
        _ => None,
    };
    match entry {
        Some(Value::String(name)) => Ok(name.clone()),
        _ => Err(CoerceError::NoClassName(id)),
    }
}

/// Flatten nested arrays depth-first into their numbers.
pub fn flatten(value: &Value) -> CoerceResult<Vec<f64>> {
    let mut out = Vec::new();
    flatten_into(value, &mut out)?;
    Ok(out)
}

fn flatten_into(value: &Value, out: &mut Vec<f64>) -> CoerceResult<()> {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten_into(item, out)?;
            }
            Ok(())
        }
        other => {
            out.push(number(other)?);
            Ok(())
        }
    }
}

/// First `N` numbers of a flattened vector.
///
/// Accepts `[x1, y1, ..., x4, y4]` as well as `[[x1, y1], ...]` for `N = 8`.
pub fn fixed<const N: usize>(value: &Value) -> CoerceResult<[f64; N]> {
    let values = flatten(value)?;
    if values.len() < N {
        return Err(CoerceError::TooFewValues {
            expected: N,
            found: values.len(),
        });
    }

    let mut out = [0.0; N];
    out.copy_from_slice(&values[..N]);
    Ok(out)
}

/// Per-instance rows of a batched field.
pub fn rows(value: &Value) -> CoerceResult<&[Value]> {
    match value {
        Value::Array(items) => Ok(items),
        _ => Err(CoerceError::NotAList),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_shapes() {
        assert_eq!(number(&json!(0.5)).unwrap(), 0.5);
        assert_eq!(number(&json!(" 0.25 ")).unwrap(), 0.25);
        assert_eq!(number(&json!([0.75])).unwrap(), 0.75);
        assert_eq!(number(&json!([[3]])).unwrap(), 3.0);
    }

    #[test]
    fn test_number_rejects() {
        assert!(matches!(number(&json!(null)), Err(CoerceError::NotNumeric(_))));
        assert!(matches!(number(&json!("abc")), Err(CoerceError::NotNumeric(_))));
        assert_eq!(number(&json!([1, 2])), Err(CoerceError::NotScalar(2)));
        assert_eq!(number(&json!([])), Err(CoerceError::NotScalar(0)));
        assert!(matches!(number(&json!("NaN")), Err(CoerceError::NonFinite(_))));
    }

    #[test]
    fn test_class_id_truncates() {
        assert_eq!(class_id(&json!(2.9)).unwrap(), 2);
        assert_eq!(class_id(&json!([1.0])).unwrap(), 1);
    }

    #[test]
    fn test_confidence_range() {
        assert_eq!(confidence(&json!("0.5")).unwrap(), 0.5);
        assert_eq!(confidence(&json!(1)).unwrap(), 1.0);
        assert_eq!(confidence(&json!(1.5)), Err(CoerceError::OutOfUnitRange(1.5)));
        assert_eq!(confidence(&json!(-0.1)), Err(CoerceError::OutOfUnitRange(-0.1)));
    }

    #[test]
    fn test_class_name_tables() {
        assert_eq!(class_name(&json!({ "1": "spikelet" }), 1).unwrap(), "spikelet");
        assert_eq!(class_name(&json!(["spike", "spikelet"]), 1).unwrap(), "spikelet");

        assert_eq!(class_name(&json!(["spike"]), -1), Err(CoerceError::NoClassName(-1)));
        assert_eq!(class_name(&json!(["spike"]), 3), Err(CoerceError::NoClassName(3)));
        assert_eq!(class_name(&json!({ "0": 5 }), 0), Err(CoerceError::NoClassName(0)));
        assert_eq!(class_name(&json!(null), 0), Err(CoerceError::NoClassName(0)));
        assert_eq!(class_name(&json!("spike"), 0), Err(CoerceError::NoClassName(0)));
    }

    #[test]
    fn test_fixed_flattens_points() {
        let nested = json!([[1, 2], [3, 4], [5, 6], [7, 8]]);
        let flat = json!([1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(fixed::<8>(&nested).unwrap(), fixed::<8>(&flat).unwrap());
        assert_eq!(fixed::<4>(&json!([1, 2, 3, 4, 99])).unwrap(), [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_fixed_too_short() {
        assert_eq!(
            fixed::<5>(&json!([1, 2, 3])),
            Err(CoerceError::TooFewValues { expected: 5, found: 3 })
        );
    }
}
