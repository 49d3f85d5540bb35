// Domain models: snapshots, bounded histories, usage records

mod history;
mod metrics;
mod usage;

pub use history::{
    BoundedHistory, CpuSample, GcSample, MemorySample, NodeHistories, WorkloadSample,
};
pub use metrics::{GcMetrics, OLD_COLLECTORS, ServerMetrics};
pub use usage::{CSV_HEADER, ServerUsage, Workload, to_csv, usage_from_histories};
