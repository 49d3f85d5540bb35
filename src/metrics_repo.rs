// Typed access to the cluster store: snapshots, histories, sheet counts, protection state.
// Values are JSON so any node build can read them.

use crate::cluster::{ClusterStore, NodeId};
use crate::models::{NodeHistories, ServerMetrics};
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

pub const SERVER_METRICS_MAP: &str = "serverMetrics";
pub const HISTORY_MAP: &str = "metricsHistory";
pub const LOCAL_SHEET_COUNT_MAP: &str = "localSheetCount";
pub const NODE_PROTECTION_MAP: &str = "nodeProtection";
pub const MEMORY_UTILIZATION_MAP: &str = "memoryUtilization";

pub struct MetricsRepo {
    store: Arc<dyn ClusterStore>,
}

impl MetricsRepo {
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ClusterStore> {
        &self.store
    }

    fn get_json<T: DeserializeOwned>(&self, map: &str, key: &str) -> anyhow::Result<Option<T>> {
        let Some(raw) = self.store.get(map, key) else {
            return Ok(None);
        };
        let value = serde_json::from_slice(&raw)
            .map_err(|e| anyhow::anyhow!("decode {}[{}]: {}", map, key, e))?;
        Ok(Some(value))
    }

    fn put_json<T: Serialize>(&self, map: &str, key: &str, value: &T) -> anyhow::Result<()> {
        let raw = serde_json::to_vec(value)?;
        self.store.put(map, key, Bytes::from(raw));
        Ok(())
    }

    /// Every decodable entry of `map`; undecodable values are logged and skipped.
    fn entries_json<T: DeserializeOwned>(&self, map: &str) -> BTreeMap<NodeId, T> {
        self.store
            .entries(map)
            .into_iter()
            .filter_map(|(k, raw)| match serde_json::from_slice(&raw) {
                Ok(v) => Some((NodeId::new(k), v)),
                Err(e) => {
                    tracing::warn!(error = %e, map, key = %k, "skipping undecodable entry");
                    None
                }
            })
            .collect()
    }

    pub fn current_metrics(&self, node: &NodeId) -> anyhow::Result<Option<ServerMetrics>> {
        self.get_json(SERVER_METRICS_MAP, node.as_str())
    }

    #[instrument(skip(self, metrics), fields(repo = "metrics", operation = "save_metrics"))]
    pub fn save_metrics(&self, node: &NodeId, metrics: &ServerMetrics) -> anyhow::Result<()> {
        self.put_json(SERVER_METRICS_MAP, node.as_str(), metrics)
    }

    /// Histories of `node` bounded to `max_len`; empty queues when none are stored yet.
    pub fn histories(&self, node: &NodeId, max_len: usize) -> anyhow::Result<NodeHistories> {
        let mut h = self
            .get_json::<NodeHistories>(HISTORY_MAP, node.as_str())?
            .unwrap_or_else(|| NodeHistories::new(max_len));
        h.set_max_len(max_len);
        Ok(h)
    }

    #[instrument(skip(self, histories), fields(repo = "metrics", operation = "save_histories"))]
    pub fn save_histories(&self, node: &NodeId, histories: &NodeHistories) -> anyhow::Result<()> {
        self.put_json(HISTORY_MAP, node.as_str(), histories)
    }

    pub fn local_sheet_counts(&self) -> BTreeMap<NodeId, u32> {
        self.entries_json(LOCAL_SHEET_COUNT_MAP)
    }

    pub fn set_local_sheet_count(&self, node: &NodeId, count: u32) -> anyhow::Result<()> {
        self.put_json(LOCAL_SHEET_COUNT_MAP, node.as_str(), &count)
    }

    pub fn protection_flags(&self) -> BTreeMap<NodeId, bool> {
        self.entries_json(NODE_PROTECTION_MAP)
    }

    pub fn is_protected(&self, node: &NodeId) -> anyhow::Result<Option<bool>> {
        self.get_json(NODE_PROTECTION_MAP, node.as_str())
    }

    pub fn set_protected(&self, node: &NodeId, protected: bool) -> anyhow::Result<()> {
        self.put_json(NODE_PROTECTION_MAP, node.as_str(), &protected)
    }

    pub fn memory_utilization(&self) -> BTreeMap<NodeId, f64> {
        self.entries_json(MEMORY_UTILIZATION_MAP)
    }

    pub fn set_memory_utilization(&self, node: &NodeId, ratio: f64) -> anyhow::Result<()> {
        self.put_json(MEMORY_UTILIZATION_MAP, node.as_str(), &ratio)
    }

    /// Drops everything published for a node that left the cluster.
    pub fn forget_node(&self, node: &NodeId) {
        for map in [
            SERVER_METRICS_MAP,
            HISTORY_MAP,
            LOCAL_SHEET_COUNT_MAP,
            NODE_PROTECTION_MAP,
            MEMORY_UTILIZATION_MAP,
        ] {
            self.store.remove(map, node.as_str());
        }
    }
}
