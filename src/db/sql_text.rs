//! SQL text helpers shared by every dialect.
//!
//! SQL stays opaque text; these helpers only escape literals, render IN-lists,
//! and detect clauses by keyword pattern.

use super::Value;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

/// Literal emitted for an empty IN-list.
pub const EMPTY_IN_LIST: &str = "NULL";

/// A value that can be rendered as a SQL literal inside an IN-list.
pub trait SqlLiteral {
    /// Appends the literal form of this value to `out`. Nested arrays flatten.
    fn push_literals(&self, out: &mut Vec<String>);
}

impl SqlLiteral for serde_json::Value {
    fn push_literals(&self, out: &mut Vec<String>) {
        match self {
            serde_json::Value::Null => out.push("NULL".to_string()),
            serde_json::Value::Bool(b) => out.push(b.to_string()),
            serde_json::Value::Number(n) => out.push(format_number(n)),
            serde_json::Value::String(s) => out.push(quote_literal(s)),
            serde_json::Value::Array(items) => {
                for item in items {
                    item.push_literals(out);
                }
            }
            serde_json::Value::Object(_) => out.push(quote_literal(&self.to_string())),
        }
    }
}

impl SqlLiteral for Value {
    fn push_literals(&self, out: &mut Vec<String>) {
        match self {
            Value::Null => out.push("NULL".to_string()),
            Value::Bool(b) => out.push(b.to_string()),
            Value::Int(i) => out.push(i.to_string()),
            Value::Float(f) => out.push(f.to_string()),
            Value::String(s) => out.push(quote_literal(s)),
            Value::Bytes(_) => out.push(quote_literal(&self.to_display_string())),
        }
    }
}

/// Renders values as the body of a SQL IN-list: `'a', 'it''s', 3`.
///
/// An empty list renders as `NULL` so `col IN (NULL)` stays valid SQL and
/// matches nothing.
pub fn to_in_clause<T: SqlLiteral>(values: &[T]) -> String {
    let mut literals = Vec::with_capacity(values.len());
    for value in values {
        value.push_literals(&mut literals);
    }
    if literals.is_empty() {
        EMPTY_IN_LIST.to_string()
    } else {
        literals.join(", ")
    }
}

/// Doubles embedded single quotes.
pub fn escape_string(s: &str) -> String {
    s.replace('\'', "''")
}

/// Wraps a string in single quotes, escaping embedded quotes.
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", escape_string(s))
}

/// Formats a JSON number the way the document author wrote it where possible.
pub fn format_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        i.to_string()
    } else if let Some(u) = n.as_u64() {
        u.to_string()
    } else {
        n.as_f64().map(|f| f.to_string()).unwrap_or_else(|| n.to_string())
    }
}

/// `'YYYY-MM-DD HH:MM:SS'` literal for the given instant.
pub fn timestamp_literal(now: DateTime<Utc>) -> String {
    format!("'{}'", now.format("%Y-%m-%d %H:%M:%S"))
}

/// Removes trailing whitespace and statement terminators.
pub fn trim_statement(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

/// Matches the vendor-neutral current-time marker `GETDATE()`.
pub fn current_timestamp_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bGETDATE\(\s*\)").expect("valid regex"))
}

/// Returns true when the statement produces a result set rather than a row count.
pub fn is_row_returning(sql: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)^(SELECT|WITH|SHOW|PRAGMA|EXPLAIN|VALUES|DESCRIBE|DESC|EXEC|EXECUTE|CALL)\b")
            .expect("valid regex")
    });
    re.is_match(skip_leading_noise(sql))
}

/// Skips whitespace, comments, and opening parentheses before the first keyword.
fn skip_leading_noise(sql: &str) -> &str {
    let mut rest = sql;
    loop {
        let trimmed = rest.trim_start().trim_start_matches('(');
        if let Some(after) = trimmed.strip_prefix("--") {
            rest = after.split_once('\n').map(|(_, r)| r).unwrap_or("");
        } else if let Some(after) = trimmed.strip_prefix("/*") {
            rest = after.split_once("*/").map(|(_, r)| r).unwrap_or("");
        } else if trimmed.len() != rest.len() {
            rest = trimmed;
        } else {
            return rest;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_in_clause_escapes_quotes() {
        let values = vec![json!("a"), json!("it's")];
        assert_eq!(to_in_clause(&values), "'a', 'it''s'");
    }

    #[test]
    fn test_in_clause_empty_is_null() {
        let values: Vec<serde_json::Value> = vec![];
        assert_eq!(to_in_clause(&values), "NULL");
    }

    #[test]
    fn test_in_clause_numbers_and_nested() {
        let values = vec![json!(1), json!(2.5), json!([3, "x"])];
        assert_eq!(to_in_clause(&values), "1, 2.5, 3, 'x'");
    }

    #[test]
    fn test_in_clause_db_values() {
        let values = vec![Value::Int(1), Value::from("O'Brien"), Value::Null];
        assert_eq!(to_in_clause(&values), "1, 'O''Brien', NULL");
    }

    #[test]
    fn test_timestamp_literal() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(timestamp_literal(at), "'2024-03-05 07:08:09'");
    }

    #[test]
    fn test_trim_statement() {
        assert_eq!(trim_statement("  SELECT 1;;  \n"), "SELECT 1");
    }

    #[test]
    fn test_marker_matches_case_insensitively() {
        let re = current_timestamp_marker();
        assert!(re.is_match("WHERE d < getdate()"));
        assert!(re.is_match("WHERE d < GETDATE( )"));
        assert!(!re.is_match("WHERE d < MYGETDATE()"));
    }

    #[test]
    fn test_is_row_returning() {
        assert!(is_row_returning("SELECT 1"));
        assert!(is_row_returning("  -- header\n with x as (select 1) select * from x"));
        assert!(is_row_returning("(SELECT 1) UNION (SELECT 2)"));
        assert!(!is_row_returning("UPDATE t SET a = 1"));
        assert!(!is_row_returning("/* c */ DELETE FROM t"));
    }
}
