// Live activity counters of this node; guards decrement on drop.

use crate::models::Workload;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Default)]
pub struct WorkloadGauge {
    open_sheets: Arc<AtomicU32>,
    executing_viewsheets: Arc<AtomicU32>,
    executing_queries: Arc<AtomicU32>,
}

/// Holds one unit of a counter until dropped.
#[derive(Debug)]
pub struct ActiveGuard(Arc<AtomicU32>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

fn acquire(counter: &Arc<AtomicU32>) -> ActiveGuard {
    counter.fetch_add(1, Ordering::Relaxed);
    ActiveGuard(counter.clone())
}

impl WorkloadGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_sheet(&self) -> ActiveGuard {
        acquire(&self.open_sheets)
    }

    pub fn begin_viewsheet(&self) -> ActiveGuard {
        acquire(&self.executing_viewsheets)
    }

    pub fn begin_query(&self) -> ActiveGuard {
        acquire(&self.executing_queries)
    }

    pub fn current(&self) -> Workload {
        Workload {
            open_sheets: self.open_sheets.load(Ordering::Relaxed),
            executing_viewsheets: self.executing_viewsheets.load(Ordering::Relaxed),
            executing_queries: self.executing_queries.load(Ordering::Relaxed),
        }
    }
}
