// Bounded, time-ordered sample queues kept per node for charting

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuSample {
    pub timestamp: i64,
    /// Fraction of all cores, 0.0..=0.99.
    pub ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySample {
    pub timestamp: i64,
    pub used: u64,
}

/// GC activity during one update interval (deltas, not totals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcSample {
    pub timestamp: i64,
    pub collection_count: u64,
    pub collection_time: u64,
}

/// Activity counters sampled once per update interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSample {
    pub timestamp: i64,
    pub executing_viewsheets: u32,
    pub executing_queries: u32,
}

/// FIFO queue holding at most `max_len` entries; pushing past the bound evicts the oldest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundedHistory<T> {
    max_len: usize,
    entries: VecDeque<T>,
}

impl<T> BoundedHistory<T> {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            entries: VecDeque::with_capacity(max_len.min(1024)),
        }
    }

    pub fn push(&mut self, entry: T) {
        self.entries.push_back(entry);
        self.trim();
    }

    /// Applies a new bound (the configured size can change between runs) and evicts to fit.
    pub fn set_max_len(&mut self, max_len: usize) {
        self.max_len = max_len;
        self.trim();
    }

    fn trim(&mut self) {
        while self.entries.len() > self.max_len {
            self.entries.pop_front();
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }
}

/// The queues of one node, appended together once per update cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeHistories {
    pub cpu: BoundedHistory<CpuSample>,
    pub memory: BoundedHistory<MemorySample>,
    pub gc: BoundedHistory<GcSample>,
    pub workload: BoundedHistory<WorkloadSample>,
}

impl NodeHistories {
    pub fn new(max_len: usize) -> Self {
        Self {
            cpu: BoundedHistory::new(max_len),
            memory: BoundedHistory::new(max_len),
            gc: BoundedHistory::new(max_len),
            workload: BoundedHistory::new(max_len),
        }
    }

    pub fn set_max_len(&mut self, max_len: usize) {
        self.cpu.set_max_len(max_len);
        self.memory.set_max_len(max_len);
        self.gc.set_max_len(max_len);
        self.workload.set_max_len(max_len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_evicts_oldest_beyond_bound() {
        let mut h = BoundedHistory::new(3);
        for i in 0..5 {
            h.push(i);
        }
        assert_eq!(h.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(h.latest(), Some(&4));
    }

    #[test]
    fn shrinking_bound_keeps_most_recent() {
        let mut h = BoundedHistory::new(10);
        for i in 0..6 {
            h.push(i);
        }
        h.set_max_len(2);
        assert_eq!(h.iter().copied().collect::<Vec<_>>(), vec![4, 5]);
    }

    #[test]
    fn zero_bound_holds_nothing() {
        let mut h = BoundedHistory::new(0);
        h.push(1);
        assert!(h.is_empty());
    }
}
