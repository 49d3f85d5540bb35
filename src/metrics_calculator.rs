// Derives the next immutable snapshot from the previous one plus fresh readings,
// appending to the node's bounded histories.

use std::collections::HashSet;

use crate::models::{
    CpuSample, GcMetrics, GcSample, MemorySample, NodeHistories, OLD_COLLECTORS, ServerMetrics,
};
use crate::runtime_probe::RuntimeReadings;

/// Upper bound for the reported CPU ratio.
pub const MAX_CPU_RATIO: f64 = 0.99;

pub struct MetricsCalculator {
    time_zone_offset_ms: i64,
}

impl Default for MetricsCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCalculator {
    pub fn new() -> Self {
        let offset_secs = chrono::Local::now().offset().local_minus_utc();
        Self::with_time_zone_offset(offset_secs as i64 * 1000)
    }

    pub fn with_time_zone_offset(time_zone_offset_ms: i64) -> Self {
        Self {
            time_zone_offset_ms,
        }
    }

    /// Runs the CPU, memory and GC steps in order and returns the new snapshot.
    pub fn compute(
        &self,
        old: Option<&ServerMetrics>,
        readings: &RuntimeReadings,
        now: i64,
        histories: &mut NodeHistories,
    ) -> ServerMetrics {
        let mut next = ServerMetrics::from_previous(old);
        next.time_zone_offset = self.time_zone_offset_ms;
        self.compute_cpu(old, readings, now, histories, &mut next);
        self.compute_memory(readings, now, histories, &mut next);
        self.compute_gc(old, readings, now, histories, &mut next);
        next
    }

    pub fn compute_cpu(
        &self,
        old: Option<&ServerMetrics>,
        readings: &RuntimeReadings,
        now: i64,
        histories: &mut NodeHistories,
        next: &mut ServerMetrics,
    ) {
        let ratio = match old {
            Some(old) if readings.uptime_ms > old.up_time => {
                let cpu_ms = readings.cpu_time_ns.saturating_sub(old.cpu_time) as f64 / 1e6;
                let wall_ms = (readings.uptime_ms - old.up_time) as f64 * readings.cores.max(1) as f64;
                (cpu_ms / wall_ms).clamp(0.0, MAX_CPU_RATIO)
            }
            _ => 0.0,
        };
        if old.is_none() {
            next.start_date = now - readings.uptime_ms as i64;
        }
        next.up_time = readings.uptime_ms;
        next.cpu_time = readings.cpu_time_ns;
        histories.cpu.push(CpuSample {
            timestamp: now,
            ratio,
        });
    }

    pub fn compute_memory(
        &self,
        readings: &RuntimeReadings,
        now: i64,
        histories: &mut NodeHistories,
        next: &mut ServerMetrics,
    ) {
        next.max_heap_size = readings.heap_max;
        histories.memory.push(MemorySample {
            timestamp: now,
            used: readings.heap_used,
        });
    }

    pub fn compute_gc(
        &self,
        old: Option<&ServerMetrics>,
        readings: &RuntimeReadings,
        now: i64,
        histories: &mut NodeHistories,
        next: &mut ServerMetrics,
    ) {
        let mut gc_metrics = readings.collectors.clone();
        if let Some(old) = old {
            let live: HashSet<&str> = readings.collectors.iter().map(|g| g.name.as_str()).collect();
            let retired: Vec<&GcMetrics> = old
                .gc_metrics
                .iter()
                .filter(|g| !live.contains(g.name.as_str()))
                .collect();
            if !retired.is_empty() {
                let count = retired.iter().map(|g| g.collection_count).sum();
                let time = retired.iter().map(|g| g.collection_time).sum();
                gc_metrics.push(GcMetrics::new(OLD_COLLECTORS, count, time));
            }
        }

        let total_count: u64 = gc_metrics.iter().map(|g| g.collection_count).sum();
        let total_time: u64 = gc_metrics.iter().map(|g| g.collection_time).sum();
        let (old_count, old_time) = old
            .map(|o| (o.collection_count, o.collection_time))
            .unwrap_or((total_count, total_time));
        let new_total_count = total_count.max(old_count);
        let new_total_time = total_time.max(old_time);

        histories.gc.push(GcSample {
            timestamp: now,
            collection_count: new_total_count - old_count,
            collection_time: new_total_time - old_time,
        });
        next.collection_count = new_total_count;
        next.collection_time = new_total_time;
        next.gc_metrics = gc_metrics;
    }
}
