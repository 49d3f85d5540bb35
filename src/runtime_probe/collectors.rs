// Reclamation subsystems ("collectors") report their passes here; the probe reads them per cycle.

use crate::models::GcMetrics;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Counters {
    count: AtomicU64,
    time_ms: AtomicU64,
}

/// Live collector set. Retired collectors disappear from [`CollectorRegistry::snapshot`]
/// and are folded into the `oldCollectors` entry by the calculator.
#[derive(Debug, Default)]
pub struct CollectorRegistry {
    live: std::sync::Mutex<BTreeMap<String, Arc<Counters>>>,
}

/// Cloneable handle owned by one collector.
#[derive(Debug, Clone)]
pub struct CollectorHandle {
    name: String,
    counters: Arc<Counters>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name`, or returns a handle to the already-live collector of that name.
    pub fn register(&self, name: &str) -> CollectorHandle {
        let mut live = self
            .live
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let counters = live.entry(name.to_string()).or_default().clone();
        CollectorHandle {
            name: name.to_string(),
            counters,
        }
    }

    /// Removes `name` from the live set. Handles keep working but are no longer reported.
    pub fn retire(&self, name: &str) -> bool {
        let mut live = self
            .live
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let removed = live.remove(name).is_some();
        if removed {
            tracing::info!(collector = name, "collector retired");
        }
        removed
    }

    pub fn snapshot(&self) -> Vec<GcMetrics> {
        let live = self
            .live
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        live.iter()
            .map(|(name, c)| {
                GcMetrics::new(
                    name.clone(),
                    c.count.load(Ordering::Relaxed),
                    c.time_ms.load(Ordering::Relaxed),
                )
            })
            .collect()
    }
}

impl CollectorHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record(&self, elapsed: Duration) {
        self.counters.count.fetch_add(1, Ordering::Relaxed);
        self.counters
            .time_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    /// Runs one pass and records its duration.
    pub fn time<R>(&self, pass: impl FnOnce() -> R) -> R {
        let started = Instant::now();
        let out = pass();
        self.record(started.elapsed());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_same_name_shares_counters() {
        let reg = CollectorRegistry::new();
        let a = reg.register("cache-evictor");
        let b = reg.register("cache-evictor");
        a.record(Duration::from_millis(5));
        b.record(Duration::from_millis(7));
        let snap = reg.snapshot();
        assert_eq!(snap, vec![GcMetrics::new("cache-evictor", 2, 12)]);
    }

    #[test]
    fn retired_collector_is_not_reported() {
        let reg = CollectorRegistry::new();
        let h = reg.register("young");
        reg.register("old");
        assert!(reg.retire("young"));
        h.record(Duration::from_millis(1));
        let names: Vec<_> = reg.snapshot().into_iter().map(|g| g.name).collect();
        assert_eq!(names, vec!["old".to_string()]);
        assert!(!reg.retire("young"));
    }
}
