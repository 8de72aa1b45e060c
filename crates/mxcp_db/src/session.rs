//! Session lifecycle: open, install secrets, execute, close.

use crate::bind::bind_named;
use crate::error::{DbError, Result};
use crate::sql_guard::validate_read_only;
use crate::value::{DbValue, Row, Rows};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug_span, info};

/// A resolved secret: a name, an optional engine secret type, and the
/// key/value material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    pub name: String,
    /// Engine secret type (`http`, `s3`, ...). Secrets without a type are
    /// held for host code only and never installed into the engine.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

impl Secret {
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Configuration for opening a session.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Database file; `None` opens an in-memory database.
    pub database: Option<PathBuf>,
    /// Reject write statements and open the file read-only.
    pub readonly: bool,
    /// Engine extensions to `INSTALL`/`LOAD` at open.
    pub extensions: Vec<String>,
    /// Secrets to install.
    pub secrets: Vec<Secret>,
}

/// One embedded connection plus the active secret set.
///
/// Statement execution serializes on the internal mutex. The session is
/// replaced as a whole during reload; requests hold an `Arc` to the
/// session they started with.
pub struct SqlSession {
    conn: Mutex<duckdb::Connection>,
    secrets: HashMap<String, Secret>,
    readonly: bool,
    database: Option<PathBuf>,
}

impl std::fmt::Debug for SqlSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlSession")
            .field("database", &self.database)
            .field("readonly", &self.readonly)
            .field("secrets", &self.secrets.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SqlSession {
    /// Open a session: connect, load extensions, install secrets.
    pub fn open(config: SessionConfig) -> Result<Self> {
        let conn = match &config.database {
            Some(path) if config.readonly => {
                let db_config = duckdb::Config::default()
                    .access_mode(duckdb::AccessMode::ReadOnly)?;
                duckdb::Connection::open_with_flags(path, db_config)?
            }
            Some(path) => duckdb::Connection::open(path)?,
            None => duckdb::Connection::open_in_memory()?,
        };
        info!(
            database = %config
                .database
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ":memory:".to_string()),
            readonly = config.readonly,
            "opened SQL session"
        );

        for extension in &config.extensions {
            check_ident(extension)?;
            conn.execute_batch(&format!("INSTALL {ext}; LOAD {ext};", ext = extension))
                .map_err(|e| DbError::Extension {
                    name: extension.clone(),
                    message: e.to_string(),
                })?;
        }

        let mut session = Self {
            conn: Mutex::new(conn),
            secrets: HashMap::new(),
            readonly: config.readonly,
            database: config.database,
        };
        for secret in config.secrets {
            session.set_secret(secret)?;
        }
        Ok(session)
    }

    /// Install a secret. Typed secrets are registered with the engine as
    /// temporary named secrets; every secret is retained in the session
    /// map for host code.
    pub fn set_secret(&mut self, secret: Secret) -> Result<()> {
        if let Some(kind) = &secret.kind {
            check_ident(&secret.name).map_err(|_| DbError::Secret {
                name: secret.name.clone(),
                message: "secret name must be a bare identifier".to_string(),
            })?;
            check_ident(kind).map_err(|_| DbError::Secret {
                name: secret.name.clone(),
                message: format!("invalid secret type '{}'", kind),
            })?;

            let mut clauses = vec![format!("TYPE {}", kind)];
            for (key, value) in &secret.values {
                check_ident(key).map_err(|_| DbError::Secret {
                    name: secret.name.clone(),
                    message: format!("invalid secret key '{}'", key),
                })?;
                clauses.push(format!("{} '{}'", key, escape_literal(value)));
            }
            let sql = format!(
                "CREATE OR REPLACE TEMPORARY SECRET {} ({})",
                secret.name,
                clauses.join(", ")
            );

            let conn = self.conn.lock().expect("session lock poisoned");
            conn.execute_batch(&sql).map_err(|e| DbError::Secret {
                name: secret.name.clone(),
                message: e.to_string(),
            })?;
        }

        self.secrets.insert(secret.name.clone(), secret);
        Ok(())
    }

    /// Look up a secret by name.
    pub fn secret(&self, name: &str) -> Option<&Secret> {
        self.secrets.get(name)
    }

    /// Names of the installed secrets.
    pub fn secret_names(&self) -> Vec<&str> {
        self.secrets.keys().map(String::as_str).collect()
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Execute a statement with `$name` parameters bound from `params`.
    pub fn execute(&self, sql: &str, params: &Map<String, JsonValue>) -> Result<Rows> {
        if self.readonly {
            validate_read_only(sql)?;
        }

        let (rewritten, values) = bind_named(sql, params)?;
        let span = debug_span!(
            "sql.execute",
            op = sql.split_whitespace().next().unwrap_or("?"),
            duration_ms = tracing::field::Empty
        );
        let _guard = span.enter();
        let start = Instant::now();

        let conn = self.conn.lock().expect("session lock poisoned");
        let mut stmt = conn.prepare(&rewritten)?;

        let engine_params = to_engine_params(&values);
        let param_refs: Vec<&dyn duckdb::ToSql> = engine_params
            .iter()
            .map(|v| v as &dyn duckdb::ToSql)
            .collect();

        let mut raw_rows = stmt.query(param_refs.as_slice())?;

        let columns: Vec<String> = match raw_rows.as_ref() {
            Some(stmt_ref) => (0..stmt_ref.column_count())
                .map(|i| {
                    stmt_ref
                        .column_name(i)
                        .map(|s| s.to_string())
                        .unwrap_or_else(|_| format!("col{}", i))
                })
                .collect(),
            None => return Ok(Rows::empty()),
        };

        let mut rows = Vec::new();
        while let Some(raw) = raw_rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                values.push(engine_value_to_db_value(raw, i)?);
            }
            rows.push(Row::new(values));
        }

        span.record("duration_ms", start.elapsed().as_millis() as u64);
        Ok(Rows { columns, rows })
    }

    /// Release the connection.
    pub fn close(self) {
        drop(self);
    }
}

fn check_ident(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(DbError::InvalidInput(format!(
            "'{}' is not a valid identifier",
            name
        )))
    }
}

fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

fn to_engine_params(values: &[DbValue]) -> Vec<duckdb::types::Value> {
    values
        .iter()
        .map(|v| match v {
            DbValue::Null => duckdb::types::Value::Null,
            DbValue::Boolean(b) => duckdb::types::Value::Boolean(*b),
            DbValue::Integer(n) => duckdb::types::Value::BigInt(*n),
            DbValue::Real(f) => duckdb::types::Value::Double(*f),
            DbValue::Text(s) => duckdb::types::Value::Text(s.clone()),
            DbValue::Blob(b) => duckdb::types::Value::Blob(b.clone()),
            DbValue::Timestamp(ts) => duckdb::types::Value::Timestamp(
                duckdb::types::TimeUnit::Microsecond,
                ts.timestamp_micros(),
            ),
        })
        .collect()
}

fn engine_value_to_db_value(row: &duckdb::Row<'_>, index: usize) -> Result<DbValue> {
    use duckdb::types::ValueRef;

    Ok(match row.get_ref(index)? {
        ValueRef::Null => DbValue::Null,
        ValueRef::Boolean(b) => DbValue::Boolean(b),
        ValueRef::TinyInt(v) => DbValue::Integer(v as i64),
        ValueRef::SmallInt(v) => DbValue::Integer(v as i64),
        ValueRef::Int(v) => DbValue::Integer(v as i64),
        ValueRef::BigInt(v) => DbValue::Integer(v),
        ValueRef::HugeInt(v) => DbValue::Integer(v as i64),
        ValueRef::UTinyInt(v) => DbValue::Integer(v as i64),
        ValueRef::USmallInt(v) => DbValue::Integer(v as i64),
        ValueRef::UInt(v) => DbValue::Integer(v as i64),
        ValueRef::UBigInt(v) => DbValue::Integer(v as i64),
        ValueRef::Float(v) => DbValue::Real(v as f64),
        ValueRef::Double(v) => DbValue::Real(v),
        ValueRef::Text(bytes) => DbValue::Text(String::from_utf8_lossy(bytes).to_string()),
        ValueRef::Blob(bytes) => DbValue::Blob(bytes.to_vec()),
        ValueRef::Timestamp(unit, v) => {
            let micros = match unit {
                duckdb::types::TimeUnit::Second => v * 1_000_000,
                duckdb::types::TimeUnit::Millisecond => v * 1_000,
                duckdb::types::TimeUnit::Microsecond => v,
                duckdb::types::TimeUnit::Nanosecond => v / 1_000,
            };
            match chrono::DateTime::from_timestamp(
                micros.div_euclid(1_000_000),
                (micros.rem_euclid(1_000_000) * 1_000) as u32,
            ) {
                Some(ts) => DbValue::Timestamp(ts),
                None => DbValue::Integer(micros),
            }
        }
        ValueRef::Date32(days) => {
            match chrono::NaiveDate::from_num_days_from_ce_opt(719_163 + days) {
                Some(date) => DbValue::Text(date.format("%Y-%m-%d").to_string()),
                None => DbValue::Integer(days as i64),
            }
        }
        ValueRef::Time64(unit, v) => {
            let micros = match unit {
                duckdb::types::TimeUnit::Second => v * 1_000_000,
                duckdb::types::TimeUnit::Millisecond => v * 1_000,
                duckdb::types::TimeUnit::Microsecond => v,
                duckdb::types::TimeUnit::Nanosecond => v / 1_000,
            };
            match chrono::NaiveTime::from_num_seconds_from_midnight_opt(
                (micros / 1_000_000) as u32,
                ((micros % 1_000_000) * 1_000) as u32,
            ) {
                Some(time) => DbValue::Text(time.format("%H:%M:%S%.6f").to_string()),
                None => DbValue::Integer(micros),
            }
        }
        other => DbValue::Text(format!("{:?}", other)),
    })
}
