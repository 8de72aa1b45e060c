//! Named-parameter binding.
//!
//! Endpoint SQL uses `$name` placeholders. The engine binds positionally,
//! so statements are rewritten to `?` placeholders with the values laid
//! out in occurrence order. The scanner is aware of string literals,
//! quoted identifiers, and comments; `$name` inside any of those is left
//! untouched.

use crate::error::{DbError, Result};
use crate::value::DbValue;
use serde_json::{Map, Value as JsonValue};

/// Rewrite `$name` placeholders to positional `?` and collect the bind
/// values in order. Parameters that never appear in the statement are
/// simply unused; a placeholder without a matching parameter is an error.
pub fn bind_named(sql: &str, params: &Map<String, JsonValue>) -> Result<(String, Vec<DbValue>)> {
    let mut out = String::with_capacity(sql.len());
    let mut values = Vec::new();
    let chars: Vec<(usize, char)> = sql.char_indices().collect();
    let mut i = 0;

    let char_at = |i: usize| chars.get(i).map(|&(_, c)| c);

    let mut in_single = false;
    let mut in_double = false;
    let mut in_line_comment = false;
    let mut in_block_comment = false;

    while i < chars.len() {
        let (_, c) = chars[i];

        if in_line_comment {
            if c == '\n' {
                in_line_comment = false;
            }
            out.push(c);
            i += 1;
            continue;
        }
        if in_block_comment {
            if c == '*' && char_at(i + 1) == Some('/') {
                in_block_comment = false;
                out.push_str("*/");
                i += 2;
                continue;
            }
            out.push(c);
            i += 1;
            continue;
        }
        if in_single {
            if c == '\'' {
                in_single = false;
            }
            out.push(c);
            i += 1;
            continue;
        }
        if in_double {
            if c == '"' {
                in_double = false;
            }
            out.push(c);
            i += 1;
            continue;
        }

        match c {
            '-' if char_at(i + 1) == Some('-') => {
                in_line_comment = true;
                out.push_str("--");
                i += 2;
            }
            '/' if char_at(i + 1) == Some('*') => {
                in_block_comment = true;
                out.push_str("/*");
                i += 2;
            }
            '\'' => {
                in_single = true;
                out.push(c);
                i += 1;
            }
            '"' => {
                in_double = true;
                out.push(c);
                i += 1;
            }
            '$' => {
                let start = i + 1;
                let mut end = start;
                while matches!(char_at(end), Some(ch) if ch.is_ascii_alphanumeric() || ch == '_') {
                    end += 1;
                }
                let starts_with_digit =
                    matches!(char_at(start), Some(ch) if ch.is_ascii_digit());
                if end == start || starts_with_digit {
                    // Not a named placeholder (bare $ or $1-style); pass through.
                    out.push(c);
                    i += 1;
                    continue;
                }
                let name_start = chars[start].0;
                let name_end = chars.get(end).map(|&(o, _)| o).unwrap_or(sql.len());
                let name = &sql[name_start..name_end];
                let value = params
                    .get(name)
                    .ok_or_else(|| DbError::MissingParameter(name.to_string()))?;
                values.push(DbValue::from_json(value)?);
                out.push('?');
                i = end;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    Ok((out, values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, JsonValue)]) -> Map<String, JsonValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_basic_rewrite() {
        let (sql, values) =
            bind_named("SELECT $a + $b AS r", &params(&[("a", json!(2)), ("b", json!(3))]))
                .unwrap();
        assert_eq!(sql, "SELECT ? + ? AS r");
        assert_eq!(values, vec![DbValue::Integer(2), DbValue::Integer(3)]);
    }

    #[test]
    fn test_repeated_placeholder() {
        let (sql, values) =
            bind_named("SELECT $x, $x", &params(&[("x", json!("v"))])).unwrap();
        assert_eq!(sql, "SELECT ?, ?");
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_missing_parameter() {
        let err = bind_named("SELECT $missing", &params(&[])).unwrap_err();
        assert!(matches!(err, DbError::MissingParameter(name) if name == "missing"));
    }

    #[test]
    fn test_unused_parameters_are_fine() {
        let (sql, values) =
            bind_named("SELECT 1", &params(&[("unused", json!(1))])).unwrap();
        assert_eq!(sql, "SELECT 1");
        assert!(values.is_empty());
    }

    #[test]
    fn test_placeholders_in_literals_untouched() {
        let (sql, values) = bind_named(
            "SELECT '$a' AS lit, \"$b\" FROM t -- $c\n/* $d */ WHERE x = $e",
            &params(&[("e", json!(1))]),
        )
        .unwrap();
        assert!(sql.contains("'$a'"));
        assert!(sql.contains("\"$b\""));
        assert!(sql.contains("-- $c"));
        assert!(sql.contains("/* $d */"));
        assert!(sql.ends_with("WHERE x = ?"));
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_non_ascii_literals_preserved() {
        let (sql, values) = bind_named(
            "SELECT 'café • 東京' AS place, $n",
            &params(&[("n", json!(1))]),
        )
        .unwrap();
        assert!(sql.contains("'café • 東京'"));
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_dollar_digit_passes_through() {
        let (sql, values) = bind_named("SELECT $1", &params(&[])).unwrap();
        assert_eq!(sql, "SELECT $1");
        assert!(values.is_empty());
    }
}
