// Process runtime readings via sysinfo

mod collectors;
pub(crate) mod linux;

pub use collectors::{CollectorHandle, CollectorRegistry};

use crate::models::GcMetrics;
use std::sync::Arc;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::instrument;

/// One consistent set of raw readings taken at the start of an update cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeReadings {
    pub uptime_ms: u64,
    /// Total CPU time consumed by the process, ns.
    pub cpu_time_ns: u64,
    pub cores: u32,
    pub heap_used: u64,
    pub heap_max: u64,
    /// Live collectors only.
    pub collectors: Vec<GcMetrics>,
}

impl RuntimeReadings {
    /// `heap_used / heap_max`, 0 when the maximum is unknown.
    pub fn memory_utilization(&self) -> f64 {
        if self.heap_max > 0 {
            self.heap_used as f64 / self.heap_max as f64
        } else {
            0.0
        }
    }
}

/// Source of runtime readings. Reads are blocking; async callers use `spawn_blocking`.
pub trait RuntimeProbe: Send + Sync {
    fn read(&self) -> anyhow::Result<RuntimeReadings>;
}

pub struct SysinfoProbe {
    sys: std::sync::Mutex<System>,
    pid: Pid,
    collectors: Arc<CollectorRegistry>,
}

impl SysinfoProbe {
    pub fn new(collectors: Arc<CollectorRegistry>) -> anyhow::Result<Self> {
        let pid = sysinfo::get_current_pid().map_err(|e| anyhow::anyhow!("current pid: {}", e))?;
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        Ok(Self {
            sys: std::sync::Mutex::new(sys),
            pid,
            collectors,
        })
    }
}

impl RuntimeProbe for SysinfoProbe {
    #[instrument(skip(self), fields(probe = "sysinfo", operation = "read"))]
    fn read(&self) -> anyhow::Result<RuntimeReadings> {
        let mut sys = self
            .sys
            .lock()
            .map_err(|e| anyhow::anyhow!("sysinfo lock poisoned: {}", e))?;
        sys.refresh_memory();
        sys.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        let process = sys
            .process(self.pid)
            .ok_or_else(|| anyhow::anyhow!("process {} not found", self.pid))?;

        let now_secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)?
            .as_secs();
        let uptime_ms = now_secs.saturating_sub(process.start_time()) * 1000;
        let cpu_time_ns = process.accumulated_cpu_time().saturating_mul(1_000_000);
        let cores = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or_else(|_| sys.cpus().len().max(1) as u32);
        let heap_used = process.memory();
        let heap_max = linux::read_cgroup_memory_limit().unwrap_or_else(|| sys.total_memory());

        Ok(RuntimeReadings {
            uptime_ms,
            cpu_time_ns,
            cores,
            heap_used,
            heap_max,
            collectors: self.collectors.snapshot(),
        })
    }
}
