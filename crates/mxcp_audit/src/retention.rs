//! Retention sweep.
//!
//! The log is a single append-only file, so retention is a compacting
//! rewrite: records of this schema older than the horizon are removed,
//! everything else (other schemas, unparseable lines) is kept verbatim.
//! Runs on a periodic interval and on demand.

use crate::record::SCHEMA_ID;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Result of one sweep pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepStats {
    pub kept: usize,
    pub removed: usize,
}

/// Remove records older than `retention_days` from the log at `path`.
///
/// Only lines whose `schema_id` matches this schema are considered for
/// removal; retention is a per-schema setting.
pub fn sweep_file(path: &Path, retention_days: u32, now: DateTime<Utc>) -> std::io::Result<SweepStats> {
    if !path.exists() {
        return Ok(SweepStats::default());
    }

    let horizon = now - ChronoDuration::days(i64::from(retention_days));
    let contents = std::fs::read_to_string(path)?;

    let mut stats = SweepStats::default();
    let mut kept_lines: Vec<&str> = Vec::new();

    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if is_expired(line, horizon) {
            stats.removed += 1;
        } else {
            kept_lines.push(line);
            stats.kept += 1;
        }
    }

    if stats.removed == 0 {
        return Ok(stats);
    }

    // Rewrite through a sibling temp file and rename into place so a
    // crash mid-sweep never loses the whole log.
    let tmp_path = tmp_sibling(path);
    {
        let mut tmp = std::fs::File::create(&tmp_path)?;
        for line in &kept_lines {
            writeln!(tmp, "{}", line)?;
        }
        tmp.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;

    info!(
        path = %path.display(),
        kept = stats.kept,
        removed = stats.removed,
        "audit retention sweep complete"
    );
    Ok(stats)
}

/// Spawn the periodic sweep task (default interval 24h).
pub fn spawn_periodic(
    path: PathBuf,
    retention_days: u32,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let sweep_path = path.clone();
            let result = tokio::task::spawn_blocking(move || {
                sweep_file(&sweep_path, retention_days, Utc::now())
            })
            .await;
            match result {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(error = %e, "audit retention sweep failed"),
                Err(e) => warn!(error = %e, "audit retention task panicked"),
            }
        }
    })
}

fn is_expired(line: &str, horizon: DateTime<Utc>) -> bool {
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        return false;
    };
    if value.get("schema_id").and_then(Value::as_str) != Some(SCHEMA_ID) {
        return false;
    }
    let Some(timestamp) = value
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    else {
        return false;
    };
    timestamp.with_timezone(&Utc) < horizon
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audit".to_string());
    name.push_str(".sweep");
    path.with_file_name(name)
}
