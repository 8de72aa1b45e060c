//! Drift snapshot writer.
//!
//! Serializes the current database catalog and endpoint definitions into
//! the persisted snapshot format consumed by external drift tools:
//! `{version: 1, generated_at, tables, resources}`. Generated on demand;
//! never part of the request path.

use crate::context::ServerContext;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::Path;
use tracing::info;

#[derive(Debug, Serialize)]
struct ColumnSnapshot {
    name: String,
    #[serde(rename = "type")]
    column_type: String,
}

#[derive(Debug, Serialize)]
struct TableSnapshot {
    name: String,
    columns: Vec<ColumnSnapshot>,
}

#[derive(Debug, Serialize)]
struct ResourceSnapshot {
    validation_results: Value,
    definition: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<Value>,
}

#[derive(Debug, Serialize)]
struct DriftSnapshot {
    version: u32,
    generated_at: chrono::DateTime<Utc>,
    tables: Vec<TableSnapshot>,
    resources: Vec<ResourceSnapshot>,
}

/// Write a drift snapshot for the current registry and session catalog.
pub fn write_snapshot(ctx: &ServerContext, path: &Path) -> Result<()> {
    let session = ctx.session();

    let tables_rows = session
        .execute(
            "SELECT table_name, column_name, data_type \
             FROM information_schema.columns \
             WHERE table_schema = 'main' \
             ORDER BY table_name, ordinal_position",
            &Map::new(),
        )
        .context("failed to read catalog for drift snapshot")?;

    let mut tables: Vec<TableSnapshot> = Vec::new();
    for row in tables_rows.to_json_objects() {
        let table = row["table_name"].as_str().unwrap_or_default().to_string();
        let column = ColumnSnapshot {
            name: row["column_name"].as_str().unwrap_or_default().to_string(),
            column_type: row["data_type"].as_str().unwrap_or_default().to_string(),
        };
        match tables.last_mut() {
            Some(last) if last.name == table => last.columns.push(column),
            _ => tables.push(TableSnapshot {
                name: table,
                columns: vec![column],
            }),
        }
    }

    let snapshot = ctx.registry().current();
    let resources = snapshot
        .iter()
        .map(|endpoint| ResourceSnapshot {
            validation_results: json!({"status": "ok"}),
            definition: json!({
                "id": endpoint.id,
                "kind": endpoint.kind.name(),
                "enabled": endpoint.enabled,
                "parameters": endpoint.parameters.iter().map(|p| &p.name).collect::<Vec<_>>(),
                "tags": endpoint.tags,
            }),
            metadata: endpoint
                .description
                .as_ref()
                .map(|d| json!({"description": d})),
        })
        .collect();

    let drift = DriftSnapshot {
        version: 1,
        generated_at: Utc::now(),
        tables,
        resources,
    };

    let text = serde_json::to_string_pretty(&drift)?;
    std::fs::write(path, text)
        .with_context(|| format!("failed to write drift snapshot {}", path.display()))?;
    info!(path = %path.display(), "drift snapshot written");
    Ok(())
}
