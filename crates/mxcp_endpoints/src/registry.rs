//! Atomic-swap endpoint registry.
//!
//! The registry holds one immutable [`Snapshot`] at a time. Readers clone
//! the `Arc` at request start and keep it for the whole request, so a
//! publish never changes the world under an in-flight invocation; old
//! snapshots are freed when the last referencing request drops its clone.

use crate::ir::{Endpoint, EndpointKind};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

/// Immutable view of the loaded endpoint set.
#[derive(Debug)]
pub struct Snapshot {
    endpoints: HashMap<String, Arc<Endpoint>>,
    schema_hash: String,
    load_time: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(endpoints: Vec<Arc<Endpoint>>, schema_hash: String) -> Self {
        Self {
            endpoints: endpoints
                .into_iter()
                .map(|e| (e.id.clone(), e))
                .collect(),
            schema_hash,
            load_time: Utc::now(),
        }
    }

    /// Empty snapshot used before the first load.
    pub fn empty() -> Self {
        Self::new(Vec::new(), String::new())
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Endpoint>> {
        self.endpoints.get(id)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Endpoint>> {
        self.endpoints.values()
    }

    /// Count endpoints of one kind.
    pub fn count(&self, kind: EndpointKind) -> usize {
        self.endpoints.values().filter(|e| e.kind == kind).count()
    }

    pub fn schema_hash(&self) -> &str {
        &self.schema_hash
    }

    pub fn load_time(&self) -> DateTime<Utc> {
        self.load_time
    }
}

/// Shared handle publishing snapshots to readers.
#[derive(Debug)]
pub struct Registry {
    current: RwLock<Arc<Snapshot>>,
}

impl Registry {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn empty() -> Self {
        Self::new(Snapshot::empty())
    }

    /// Current snapshot. The clone pins it for the caller's lifetime.
    pub fn current(&self) -> Arc<Snapshot> {
        self.current.read().expect("registry lock poisoned").clone()
    }

    /// Publish a new snapshot; O(1) pointer swap.
    pub fn publish(&self, snapshot: Snapshot) {
        let snapshot = Arc::new(snapshot);
        let count = snapshot.len();
        *self.current.write().expect("registry lock poisoned") = snapshot;
        info!(endpoints = count, "published registry snapshot");
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Annotations, EndpointDetail, EndpointSource};
    use std::path::PathBuf;

    fn endpoint(id: &str) -> Arc<Endpoint> {
        Arc::new(Endpoint {
            id: id.to_string(),
            kind: EndpointKind::Tool,
            name: id.to_string(),
            description: None,
            enabled: true,
            tags: Vec::new(),
            annotations: Annotations::default(),
            parameters: Vec::new(),
            return_type: None,
            input_policies: Vec::new(),
            output_policies: Vec::new(),
            source: Some(EndpointSource::Sql {
                code: "SELECT 1".to_string(),
            }),
            timeout_secs: None,
            detail: EndpointDetail::Tool,
            tests: Vec::new(),
            path: PathBuf::from("x.yml"),
        })
    }

    #[test]
    fn test_lookup_and_counts() {
        let snapshot = Snapshot::new(vec![endpoint("a"), endpoint("b")], "h".to_string());
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.get("a").is_some());
        assert!(snapshot.get("z").is_none());
        assert_eq!(snapshot.count(EndpointKind::Tool), 2);
        assert_eq!(snapshot.count(EndpointKind::Prompt), 0);
    }

    #[test]
    fn test_readers_keep_old_snapshot_across_publish() {
        let registry = Registry::new(Snapshot::new(vec![endpoint("old")], "h1".to_string()));
        let held = registry.current();

        registry.publish(Snapshot::new(vec![endpoint("new")], "h2".to_string()));

        // The held reference still sees the old world.
        assert!(held.get("old").is_some());
        assert!(held.get("new").is_none());

        // New readers see the new world.
        let fresh = registry.current();
        assert!(fresh.get("new").is_some());
        assert!(fresh.get("old").is_none());
    }
}
