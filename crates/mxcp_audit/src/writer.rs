//! Bounded, ordered audit writer.
//!
//! Single producer handle (clonable), single consumer thread per log
//! file. Enqueue is `try_send` first; when the queue is full the caller
//! blocks up to a small bound, then the record is dropped with a warning
//! and a counter increment. Records are flushed in FIFO order.

use crate::record::AuditRecord;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Writer failure (open/serialize).
#[derive(Debug, Error)]
pub enum WriterError {
    #[error("failed to open audit log {}: {}", .path.display(), .source)]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Tuning for the writer queue.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Queue capacity before backpressure applies.
    pub capacity: usize,
    /// How long an enqueue may block on a full queue before dropping.
    pub block_bound: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            block_bound: Duration::from_millis(250),
        }
    }
}

/// Handle to the audit writer thread.
pub struct AuditWriter {
    tx: Option<mpsc::Sender<AuditRecord>>,
    dropped: Arc<AtomicU64>,
    block_bound: Duration,
    thread: Option<std::thread::JoinHandle<()>>,
    path: PathBuf,
}

impl AuditWriter {
    /// Open the log file and spawn the consumer thread.
    pub fn spawn(path: &Path, config: WriterConfig) -> Result<Self, WriterError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| WriterError::Open {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| WriterError::Open {
                path: path.to_path_buf(),
                source: e,
            })?;

        let (tx, mut rx) = mpsc::channel::<AuditRecord>(config.capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        let thread_dropped = dropped.clone();

        let thread = std::thread::Builder::new()
            .name("mxcp-audit-writer".to_string())
            .spawn(move || {
                let mut out = BufWriter::new(file);
                while let Some(record) = rx.blocking_recv() {
                    match serde_json::to_string(&record) {
                        Ok(line) => {
                            // An audit-write failure falls back to the
                            // server log; the request is never failed.
                            if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
                                thread_dropped.fetch_add(1, Ordering::Relaxed);
                                warn!(error = %e, "audit write failed, record lost");
                            }
                        }
                        Err(e) => {
                            thread_dropped.fetch_add(1, Ordering::Relaxed);
                            warn!(error = %e, "audit record serialization failed");
                        }
                    }
                }
            })
            .expect("spawn audit writer thread");

        info!(path = %path.display(), "audit writer started");

        Ok(Self {
            tx: Some(tx),
            dropped,
            block_bound: config.block_bound,
            thread: Some(thread),
            path: path.to_path_buf(),
        })
    }

    /// Enqueue a record. Blocks at most `block_bound` under backpressure,
    /// then drops the record with a warning.
    pub async fn enqueue(&self, record: AuditRecord) {
        let Some(tx) = &self.tx else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        match tx.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(record)) => {
                match tokio::time::timeout(self.block_bound, tx.send(record)).await {
                    Ok(Ok(())) => {}
                    _ => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!("audit queue saturated, record dropped");
                    }
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("audit writer closed, record dropped");
            }
        }
    }

    /// Records lost to backpressure or write failures.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the queue and wait for the consumer to drain.
    pub fn shutdown(mut self) {
        self.tx.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for AuditWriter {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{AuditRecord, AuditStatus};
    use tempfile::TempDir;

    fn record(id: &str) -> AuditRecord {
        let mut r = AuditRecord::new(id, "tool", "add");
        r.status = AuditStatus::Success;
        r
    }

    #[tokio::test]
    async fn test_writes_one_line_per_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        let writer = AuditWriter::spawn(&path, WriterConfig::default()).unwrap();

        writer.enqueue(record("r1")).await;
        writer.enqueue(record("r2")).await;
        writer.shutdown();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"request_id\":\"r1\""));
        assert!(lines[1].contains("\"request_id\":\"r2\""));
    }

    #[tokio::test]
    async fn test_fifo_order_preserved() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        let writer = AuditWriter::spawn(&path, WriterConfig::default()).unwrap();

        for i in 0..50 {
            writer.enqueue(record(&format!("r{}", i))).await;
        }
        writer.shutdown();

        let contents = std::fs::read_to_string(&path).unwrap();
        let ids: Vec<String> = contents
            .lines()
            .map(|line| {
                serde_json::from_str::<AuditRecord>(line)
                    .unwrap()
                    .request_id
            })
            .collect();
        let expected: Vec<String> = (0..50).map(|i| format!("r{}", i)).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("audit.jsonl");
        let writer = AuditWriter::spawn(&path, WriterConfig::default()).unwrap();
        writer.enqueue(record("r1")).await;
        writer.shutdown();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_saturated_queue_drops_after_bound() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        // Tiny queue and bound so the drop path is reachable quickly.
        let writer = AuditWriter::spawn(
            &path,
            WriterConfig {
                capacity: 1,
                block_bound: Duration::from_millis(1),
            },
        )
        .unwrap();

        for i in 0..200 {
            writer.enqueue(record(&format!("r{}", i))).await;
        }
        let dropped = writer.dropped_count();
        writer.shutdown();

        let contents = std::fs::read_to_string(&path).unwrap();
        let written = contents.lines().count() as u64;
        // Nothing lost silently: every record is either written or counted.
        assert_eq!(written + dropped, 200);
    }
}
