// Cluster seams: membership + pub/sub messaging, and shared maps/counters.
// Concrete deployments plug in their own implementations; InMemoryCluster serves
// single-process use and tests.

mod exchange;
mod memory;
mod message;

pub use exchange::Exchange;
pub use memory::{InMemoryCluster, InMemoryNode};
pub use message::{ClusterMessage, Envelope};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

use crate::error::MonitorError;

/// Identity of one cluster member (its address or configured name).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Membership and point-to-point delivery over the cluster's messaging layer.
/// Delivery guarantees are whatever the implementation provides.
pub trait ClusterTransport: Send + Sync {
    fn local_node(&self) -> NodeId;

    /// Current members including the local node.
    fn members(&self) -> Vec<NodeId>;

    fn send(&self, target: &NodeId, payload: Bytes) -> Result<(), MonitorError>;

    /// Inbound payloads addressed to the local node.
    fn subscribe(&self) -> broadcast::Receiver<Bytes>;
}

/// Cluster-shared named maps of opaque values plus atomic counters.
/// Consistency is delegated to the implementation.
pub trait ClusterStore: Send + Sync {
    fn get(&self, map: &str, key: &str) -> Option<Bytes>;

    fn put(&self, map: &str, key: &str, value: Bytes);

    fn remove(&self, map: &str, key: &str) -> Option<Bytes>;

    /// All entries of `map`, sorted by key.
    fn entries(&self, map: &str) -> Vec<(String, Bytes)>;

    /// Atomically adds one to `counter` (starting at 0) and returns the new value.
    fn increment_and_get(&self, counter: &str) -> i64;
}
