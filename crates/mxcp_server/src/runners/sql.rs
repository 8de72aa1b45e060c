//! SQL runner.
//!
//! Executes endpoint SQL with the validated arguments bound as `$name`
//! parameters, then shapes the result set to the declared return type:
//!
//! - `object`: exactly one row, columns become properties.
//! - `array` of objects: one element per row.
//! - `array` of scalars: one single-column row per element.
//! - scalar: exactly one row with exactly one column.
//! - no declared return type: rows as an array of objects.

use crate::cancel::CancellationToken;
use crate::error::{ErrorKind, ServerError};
use mxcp_db::{Rows, SqlSession};
use mxcp_types::{TypeKind, TypeSpec};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Execute `code` on the blocking pool and shape the rows.
///
/// The statement itself is not interruptible; cancellation is observed
/// while the call is queued or running, and the result of a cancelled
/// statement is discarded.
pub async fn run_sql(
    code: String,
    args: Map<String, Value>,
    session: Arc<SqlSession>,
    return_type: Option<&TypeSpec>,
    cancel: &CancellationToken,
) -> Result<Value, ServerError> {
    if cancel.is_cancelled() {
        return Err(ServerError::cancelled());
    }

    let handle = tokio::task::spawn_blocking(move || session.execute(&code, &args));

    let rows = tokio::select! {
        joined = handle => match joined {
            Ok(Ok(rows)) => rows,
            Ok(Err(db_err)) => return Err(db_err.into()),
            Err(join_err) => {
                return Err(ServerError::internal(format!(
                    "SQL task failed: {}",
                    join_err
                )));
            }
        },
        _ = cancel.cancelled() => return Err(ServerError::cancelled()),
    };

    shape_rows(rows, return_type)
}

/// Map a result set onto the declared return shape.
pub fn shape_rows(rows: Rows, return_type: Option<&TypeSpec>) -> Result<Value, ServerError> {
    let Some(spec) = return_type else {
        return Ok(Value::Array(rows.to_json_objects()));
    };

    match spec.kind {
        TypeKind::Object => {
            expect_one_row(&rows)?;
            Ok(rows.to_json_objects().remove(0))
        }
        TypeKind::Array => {
            let scalar_items = spec
                .items
                .as_ref()
                .map(|items| items.kind != TypeKind::Object)
                .unwrap_or(false);
            if scalar_items {
                let mut out = Vec::with_capacity(rows.len());
                for row in &rows.rows {
                    if row.len() != 1 {
                        return Err(ServerError::new(
                            ErrorKind::ColumnMismatch,
                            format!(
                                "scalar array element requires exactly one column, got {}",
                                row.len()
                            ),
                        ));
                    }
                    out.push(row.get(0).expect("one column").to_json());
                }
                Ok(Value::Array(out))
            } else {
                Ok(Value::Array(rows.to_json_objects()))
            }
        }
        TypeKind::String | TypeKind::Number | TypeKind::Integer | TypeKind::Boolean => {
            expect_one_row(&rows)?;
            let row = &rows.rows[0];
            if row.len() != 1 {
                return Err(ServerError::new(
                    ErrorKind::ColumnMismatch,
                    format!("scalar result requires exactly one column, got {}", row.len()),
                ));
            }
            Ok(row.get(0).expect("one column").to_json())
        }
    }
}

fn expect_one_row(rows: &Rows) -> Result<(), ServerError> {
    match rows.len() {
        0 => Err(ServerError::new(
            ErrorKind::NoRows,
            "statement returned no rows where one was required",
        )),
        1 => Ok(()),
        n => Err(ServerError::new(
            ErrorKind::TooManyRows,
            format!("statement returned {} rows where one was required", n),
        )),
    }
}
