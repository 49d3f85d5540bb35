// Flattened per-interval usage record for JSON and CSV export

use serde::{Deserialize, Serialize};

use super::NodeHistories;

pub const CSV_HEADER: &str =
    "timestamp,host,cpuUsage,memoryUsage,gcCount,gcTime,executingViewsheets,executingQueries";

/// Activity counters a node publishes alongside its metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    /// Runtime sheets currently open on the node (drives node protection).
    pub open_sheets: u32,
    pub executing_viewsheets: u32,
    pub executing_queries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerUsage {
    pub timestamp: i64,
    pub host: String,
    /// Percent of all cores.
    pub cpu_usage: f64,
    /// Bytes.
    pub memory_usage: u64,
    pub gc_count: u64,
    /// Milliseconds.
    pub gc_time: u64,
    pub executing_viewsheets: u32,
    pub executing_queries: u32,
}

impl ServerUsage {
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{:.2},{},{},{},{},{}",
            self.timestamp,
            csv_field(&self.host),
            self.cpu_usage,
            self.memory_usage,
            self.gc_count,
            self.gc_time,
            self.executing_viewsheets,
            self.executing_queries
        )
    }
}

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Header line plus one row per record.
pub fn to_csv(records: &[ServerUsage]) -> String {
    let mut out = String::with_capacity(CSV_HEADER.len() + 1 + records.len() * 64);
    out.push_str(CSV_HEADER);
    out.push('\n');
    for r in records {
        out.push_str(&r.to_csv_row());
        out.push('\n');
    }
    out
}

/// Zips the queues sample by sample; they are appended together each cycle, so
/// aligning on the newest entries pairs readings taken at the same time.
pub fn usage_from_histories(host: &str, histories: &NodeHistories) -> Vec<ServerUsage> {
    let n = histories
        .cpu
        .len()
        .min(histories.memory.len())
        .min(histories.gc.len())
        .min(histories.workload.len());
    let cpu = histories.cpu.iter().skip(histories.cpu.len() - n);
    let mem = histories.memory.iter().skip(histories.memory.len() - n);
    let gc = histories.gc.iter().skip(histories.gc.len() - n);
    let work = histories.workload.iter().skip(histories.workload.len() - n);

    cpu.zip(mem)
        .zip(gc)
        .zip(work)
        .map(|(((c, m), g), w)| ServerUsage {
            timestamp: c.timestamp,
            host: host.to_string(),
            cpu_usage: c.ratio * 100.0,
            memory_usage: m.used,
            gc_count: g.collection_count,
            gc_time: g.collection_time,
            executing_viewsheets: w.executing_viewsheets,
            executing_queries: w.executing_queries,
        })
        .collect()
}
