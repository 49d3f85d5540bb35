// In-process cluster: every node shares one store; messages go through per-node broadcast inboxes.

use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::broadcast;

use super::{ClusterStore, ClusterTransport, NodeId};
use crate::error::MonitorError;

/// Inbox depth per node; slow listeners lag and lose the oldest payloads.
const INBOX_CAPACITY: usize = 256;

#[derive(Default)]
struct Shared {
    maps: std::sync::Mutex<HashMap<String, BTreeMap<String, Bytes>>>,
    counters: std::sync::Mutex<HashMap<String, i64>>,
    inboxes: std::sync::Mutex<BTreeMap<NodeId, broadcast::Sender<Bytes>>>,
}

#[derive(Clone, Default)]
pub struct InMemoryCluster {
    shared: Arc<Shared>,
}

/// One member's view of an [`InMemoryCluster`].
#[derive(Clone)]
pub struct InMemoryNode {
    id: NodeId,
    shared: Arc<Shared>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a member (or returns the existing one with that id).
    pub fn join(&self, id: impl Into<NodeId>) -> InMemoryNode {
        let id = id.into();
        let mut inboxes = self
            .shared
            .inboxes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inboxes
            .entry(id.clone())
            .or_insert_with(|| broadcast::channel(INBOX_CAPACITY).0);
        tracing::debug!(node = %id, "node joined in-memory cluster");
        InMemoryNode {
            id,
            shared: self.shared.clone(),
        }
    }

    pub fn leave(&self, id: &NodeId) {
        let mut inboxes = self
            .shared
            .inboxes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inboxes.remove(id);
    }
}

impl ClusterTransport for InMemoryNode {
    fn local_node(&self) -> NodeId {
        self.id.clone()
    }

    fn members(&self) -> Vec<NodeId> {
        let inboxes = self
            .shared
            .inboxes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inboxes.keys().cloned().collect()
    }

    fn send(&self, target: &NodeId, payload: Bytes) -> Result<(), MonitorError> {
        let inboxes = self
            .shared
            .inboxes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let inbox = inboxes
            .get(target)
            .ok_or_else(|| MonitorError::Transport(format!("unknown member {}", target)))?;
        inbox
            .send(payload)
            .map(|_| ())
            .map_err(|_| MonitorError::Transport(format!("{} has no listener", target)))
    }

    fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        let mut inboxes = self
            .shared
            .inboxes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inboxes
            .entry(self.id.clone())
            .or_insert_with(|| broadcast::channel(INBOX_CAPACITY).0)
            .subscribe()
    }
}

impl ClusterStore for InMemoryNode {
    fn get(&self, map: &str, key: &str) -> Option<Bytes> {
        let maps = self
            .shared
            .maps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        maps.get(map).and_then(|m| m.get(key)).cloned()
    }

    fn put(&self, map: &str, key: &str, value: Bytes) {
        let mut maps = self
            .shared
            .maps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        maps.entry(map.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    fn remove(&self, map: &str, key: &str) -> Option<Bytes> {
        let mut maps = self
            .shared
            .maps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        maps.get_mut(map).and_then(|m| m.remove(key))
    }

    fn entries(&self, map: &str) -> Vec<(String, Bytes)> {
        let maps = self
            .shared
            .maps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        maps.get(map)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    fn increment_and_get(&self, counter: &str) -> i64 {
        let mut counters = self
            .shared
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let v = counters.entry(counter.to_string()).or_insert(0);
        *v += 1;
        *v
    }
}
