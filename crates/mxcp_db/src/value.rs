//! Row and value model.
//!
//! Query results cross the session boundary as a closed [`DbValue`] sum
//! with lossless JSON conversion, so runners never touch engine types.

use crate::error::{DbError, Result};
use chrono::SecondsFormat;
use serde_json::{Number, Value as JsonValue};

/// A single database value.
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Timestamp(chrono::DateTime<chrono::Utc>),
}

impl DbValue {
    /// Convert to a JSON value. Timestamps become RFC3339 strings, blobs
    /// hex strings, non-finite reals null.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Boolean(b) => JsonValue::Bool(*b),
            Self::Integer(n) => JsonValue::from(*n),
            Self::Real(f) => Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::Text(s) => JsonValue::String(s.clone()),
            Self::Blob(bytes) => JsonValue::String(hex::encode(bytes)),
            Self::Timestamp(ts) => {
                JsonValue::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        }
    }

    /// Build a bindable value from JSON. Arrays and objects are bound as
    /// serialized JSON text (the engine casts as needed).
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        Ok(match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Boolean(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    Self::Real(f)
                } else {
                    return Err(DbError::InvalidInput(format!(
                        "number {} is not representable",
                        n
                    )));
                }
            }
            JsonValue::String(s) => Self::Text(s.clone()),
            JsonValue::Array(_) | JsonValue::Object(_) => {
                Self::Text(serde_json::to_string(value).expect("JSON value serializes"))
            }
        })
    }
}

/// One result row.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<DbValue>,
}

impl Row {
    pub fn new(values: Vec<DbValue>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[DbValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DbValue> {
        self.values.get(index)
    }
}

/// An ordered result set with column names.
#[derive(Debug, Clone)]
pub struct Rows {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Rows {
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Map each row to a JSON object keyed by column name.
    pub fn to_json_objects(&self) -> Vec<JsonValue> {
        self.rows
            .iter()
            .map(|row| {
                let mut obj = serde_json::Map::with_capacity(self.columns.len());
                for (name, value) in self.columns.iter().zip(row.values()) {
                    obj.insert(name.clone(), value.to_json());
                }
                JsonValue::Object(obj)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_round_trip_scalars() {
        assert_eq!(DbValue::from_json(&json!(5)).unwrap(), DbValue::Integer(5));
        assert_eq!(
            DbValue::from_json(&json!(2.5)).unwrap(),
            DbValue::Real(2.5)
        );
        assert_eq!(
            DbValue::from_json(&json!("x")).unwrap(),
            DbValue::Text("x".to_string())
        );
        assert_eq!(
            DbValue::from_json(&json!(true)).unwrap(),
            DbValue::Boolean(true)
        );
        assert_eq!(DbValue::from_json(&json!(null)).unwrap(), DbValue::Null);
    }

    #[test]
    fn test_compound_values_bind_as_json_text() {
        let value = DbValue::from_json(&json!([1, 2])).unwrap();
        assert_eq!(value, DbValue::Text("[1,2]".to_string()));
    }

    #[test]
    fn test_rows_to_json_objects() {
        let rows = Rows {
            columns: vec!["id".to_string(), "name".to_string()],
            rows: vec![Row::new(vec![
                DbValue::Integer(1),
                DbValue::Text("ada".to_string()),
            ])],
        };
        assert_eq!(rows.to_json_objects(), vec![json!({"id": 1, "name": "ada"})]);
    }
}
