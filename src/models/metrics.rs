// Per-node point-in-time snapshot and per-collector counters

use serde::{Deserialize, Serialize};

/// Name of the synthetic entry that absorbs collectors no longer reported by the runtime.
pub const OLD_COLLECTORS: &str = "oldCollectors";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcMetrics {
    pub name: String,
    pub collection_count: u64,
    /// Milliseconds.
    pub collection_time: u64,
}

impl GcMetrics {
    pub fn new(name: impl Into<String>, collection_count: u64, collection_time: u64) -> Self {
        Self {
            name: name.into(),
            collection_count,
            collection_time,
        }
    }
}

/// Immutable snapshot of one node. The next snapshot is derived with
/// [`ServerMetrics::from_previous`]; an existing value is never edited in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMetrics {
    /// Process start, epoch ms.
    pub start_date: i64,
    /// Process uptime, ms.
    pub up_time: u64,
    /// Process CPU time, ns.
    pub cpu_time: u64,
    pub max_heap_size: u64,
    pub collection_count: u64,
    pub collection_time: u64,
    /// Local offset from UTC, ms.
    pub time_zone_offset: i64,
    pub gc_metrics: Vec<GcMetrics>,
}

impl ServerMetrics {
    /// Starting point for a new snapshot: a copy of `old`, or zeroed when there is none.
    pub fn from_previous(old: Option<&ServerMetrics>) -> Self {
        match old {
            Some(m) => m.clone(),
            None => Self {
                start_date: 0,
                up_time: 0,
                cpu_time: 0,
                max_heap_size: 0,
                collection_count: 0,
                collection_time: 0,
                time_zone_offset: 0,
                gc_metrics: Vec::new(),
            },
        }
    }
}
