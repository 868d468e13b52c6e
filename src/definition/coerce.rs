//! Value coercion for text coming out of query definitions.
//!
//! Applied to global variables, sheet parameters, and non-identifier markup
//! attributes. Numeric-looking strings always become numbers, so zero-padded
//! codes like `"007"` lose their padding.

use serde_json::{Number, Value};

/// Coerces raw text into a typed value.
///
/// Order matters: JSON-array-shaped text is tried first (kept as text if it
/// does not parse), then `true`/`false`, then decimal numbers.
pub fn coerce(raw: &str) -> Value {
    if raw.starts_with('[') && raw.ends_with(']') {
        if let Ok(array @ Value::Array(_)) = serde_json::from_str::<Value>(raw) {
            return array;
        }
    }

    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }

    parse_number(raw)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(raw.to_string()))
}

/// Coerces string values only; anything already typed is returned as-is.
pub fn coerce_value(value: Value) -> Value {
    match value {
        Value::String(s) => coerce(&s),
        other => other,
    }
}

/// Parses text that is a decimal number in its entirety (surrounding
/// whitespace allowed). Integral values stay integers.
fn parse_number(raw: &str) -> Option<Number> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !looks_decimal(trimmed) {
        return None;
    }

    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(Number::from(i));
    }

    let f = trimmed.parse::<f64>().ok().filter(|f| f.is_finite())?;
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(Number::from(f as i64))
    } else {
        Number::from_f64(f)
    }
}

/// Rejects forms `f64::from_str` accepts but documents never mean as numbers
/// (`inf`, `NaN`, `infinity`).
fn looks_decimal(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
        && s.chars().any(|c| c.is_ascii_digit())
}

/// Renders a variable value as plain text (no SQL quoting).
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => crate::db::sql_text::format_number(n),
        other => other.to_string(),
    }
}

/// Integer reading of a value, truncating decimals (`"12.7"` reads as 12).
pub fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
        }
        _ => None,
    }
}

/// Reads a boolean written as a bool or as `"true"`/`"false"`.
pub fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_booleans() {
        assert_eq!(coerce("true"), json!(true));
        assert_eq!(coerce("false"), json!(false));
        assert_eq!(coerce("TRUE"), json!("TRUE"));
    }

    #[test]
    fn test_arrays() {
        assert_eq!(coerce(r#"["a", "b"]"#), json!(["a", "b"]));
        assert_eq!(coerce("[1, 2, 3]"), json!([1, 2, 3]));
        assert_eq!(coerce("['not', 'json']"), json!("['not', 'json']"));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(coerce("42"), json!(42));
        assert_eq!(coerce("-3.5"), json!(-3.5));
        assert_eq!(coerce("1e3"), json!(1000));
        assert_eq!(coerce(" 12 "), json!(12));
    }

    #[test]
    fn test_zero_padded_codes_become_numbers() {
        assert_eq!(coerce("007"), json!(7));
    }

    #[test]
    fn test_text_stays_text() {
        assert_eq!(coerce("2024-01-01"), json!("2024-01-01"));
        assert_eq!(coerce(""), json!(""));
        assert_eq!(coerce("inf"), json!("inf"));
        assert_eq!(coerce("NaN"), json!("NaN"));
        assert_eq!(coerce("12abc"), json!("12abc"));
    }

    #[test]
    fn test_coerce_value_leaves_typed_values() {
        assert_eq!(coerce_value(json!(5)), json!(5));
        assert_eq!(coerce_value(json!("5")), json!(5));
        assert_eq!(coerce_value(json!(["x"])), json!(["x"]));
    }

    #[test]
    fn test_display() {
        assert_eq!(display(&json!("abc")), "abc");
        assert_eq!(display(&json!(3)), "3");
        assert_eq!(display(&json!(true)), "true");
        assert_eq!(display(&Value::Null), "");
    }

    #[test]
    fn test_as_integer() {
        assert_eq!(as_integer(&json!(100)), Some(100));
        assert_eq!(as_integer(&json!("250")), Some(250));
        assert_eq!(as_integer(&json!(12.7)), Some(12));
        assert_eq!(as_integer(&json!("x")), None);
    }
}
