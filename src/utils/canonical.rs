//! Canonical JSON encoding used for state identity.
//!
//! Two observations describe the same state exactly when their canonical
//! encodings are byte-identical, so the encoding must be deterministic:
//! object keys are emitted in sorted order, no insignificant whitespace is
//! produced, and floating-point values are only accepted when they carry a
//! zero fractional part (they are normalized to their integer encoding).
//! Any other float is rejected rather than hashed, since float formatting
//! is not stable enough to anchor identity on.

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

/// Errors produced while canonicalizing observation data.
#[derive(Debug, Error, Diagnostic)]
pub enum CanonicalError {
    /// A float with a non-zero fractional part appeared in observation data.
    #[error("non-integral float {value} is not canonicalizable")]
    #[diagnostic(
        code(roamgraph::canonical::float),
        help("Observation data must be built from integers, booleans, strings, nulls, arrays and objects; round or stringify floats before observing.")
    )]
    FloatNotRepresentable { value: f64 },

    /// A number outside the `i64`/`u64` range appeared in observation data.
    #[error("number {value} is outside the canonicalizable integer range")]
    #[diagnostic(code(roamgraph::canonical::range))]
    NumberOutOfRange { value: String },

    /// String serialization failed.
    #[error(transparent)]
    #[diagnostic(code(roamgraph::canonical::serde))]
    Serde(#[from] serde_json::Error),
}

/// Render a JSON value into its canonical string form.
///
/// Keys of every object are sorted lexicographically; arrays keep their
/// order. The output is compact (`,` and `:` separators, no padding).
///
/// # Examples
///
/// ```
/// use roamgraph::utils::canonical::canonical_string;
/// use serde_json::json;
///
/// let a = canonical_string(&json!({"b": 2, "a": 1})).unwrap();
/// let b = canonical_string(&json!({"a": 1, "b": 2})).unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a, r#"{"a":1,"b":2}"#);
/// ```
pub fn canonical_string(value: &Value) -> Result<String, CanonicalError> {
    let mut out = String::new();
    write_value(value, &mut out)?;
    Ok(out)
}

fn write_value(value: &Value, out: &mut String) -> Result<(), CanonicalError> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                out.push_str(&i.to_string());
            } else if let Some(u) = n.as_u64() {
                out.push_str(&u.to_string());
            } else if let Some(f) = n.as_f64() {
                // Integral floats are normalized; anything else is refused.
                if f.is_finite() && f.fract() == 0.0 && f.abs() < (i64::MAX as f64) {
                    out.push_str(&(f as i64).to_string());
                } else {
                    return Err(CanonicalError::FloatNotRepresentable { value: f });
                }
            } else {
                return Err(CanonicalError::NumberOutOfRange {
                    value: n.to_string(),
                });
            }
        }
        Value::String(s) => {
            out.push_str(&serde_json::to_string(s)?);
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_value(&map[*key], out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_keys_recursively() {
        let value = json!({"z": {"b": 1, "a": 2}, "a": [3, 2, 1]});
        assert_eq!(
            canonical_string(&value).unwrap(),
            r#"{"a":[3,2,1],"z":{"a":2,"b":1}}"#
        );
    }

    #[test]
    fn integral_floats_normalize_to_integers() {
        assert_eq!(canonical_string(&json!(3.0)).unwrap(), "3");
        assert_eq!(canonical_string(&json!(-7.0)).unwrap(), "-7");
    }

    #[test]
    fn fractional_floats_are_rejected() {
        let err = canonical_string(&json!(3.14)).unwrap_err();
        assert!(matches!(
            err,
            CanonicalError::FloatNotRepresentable { .. }
        ));
    }

    #[test]
    fn strings_are_escaped() {
        assert_eq!(
            canonical_string(&json!("a\"b")).unwrap(),
            r#""a\"b""#
        );
    }

    #[test]
    fn arrays_keep_order() {
        assert_ne!(
            canonical_string(&json!([1, 2])).unwrap(),
            canonical_string(&json!([2, 1])).unwrap()
        );
    }
}
