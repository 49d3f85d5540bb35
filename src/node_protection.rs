// Scale-in protection: exactly one member (the one with the fewest open sheets) is left
// unprotected so an autoscaler may remove it. Runs on a cron schedule or fixed interval.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{Instrument, info, instrument, warn};

use crate::cluster::{ClusterTransport, NodeId};
use crate::metrics_repo::MetricsRepo;

#[derive(Debug, Clone)]
pub struct ProtectionSchedule {
    pub interval_secs: u64,
    /// Cron expression in local time; takes precedence over `interval_secs`.
    pub schedule: Option<String>,
}

pub struct NodeProtectionCoordinator {
    transport: Arc<dyn ClusterTransport>,
    repo: Arc<MetricsRepo>,
}

/// Picks the node to leave unprotected: the lowest sheet count, first in `nodes` order
/// on ties. A node without a count is treated as 0.
pub fn least_loaded(nodes: &[NodeId], counts: &BTreeMap<NodeId, u32>) -> Option<NodeId> {
    let mut best: Option<(&NodeId, u32)> = None;
    for node in nodes {
        let count = counts.get(node).copied().unwrap_or(0);
        if best.is_none_or(|(_, min)| count < min) {
            best = Some((node, count));
        }
        if count == 0 {
            break;
        }
    }
    best.map(|(node, _)| node.clone())
}

impl NodeProtectionCoordinator {
    pub fn new(transport: Arc<dyn ClusterTransport>, repo: Arc<MetricsRepo>) -> Self {
        Self { transport, repo }
    }

    /// One coordination pass. Returns how many protection entries were written; entries
    /// that already hold the desired value are left alone.
    #[instrument(skip(self), fields(operation = "node_protection"))]
    pub fn run_once(&self) -> anyhow::Result<usize> {
        let mut nodes = self.transport.members();
        nodes.sort();
        let counts = self.repo.local_sheet_counts();
        let Some(unprotected) = least_loaded(&nodes, &counts) else {
            return Ok(0);
        };

        let current = self.repo.protection_flags();
        let mut written = 0;
        for node in &nodes {
            let protected = *node != unprotected;
            if current.get(node) != Some(&protected) {
                self.repo.set_protected(node, protected)?;
                written += 1;
            }
        }
        if written > 0 {
            info!(unprotected = %unprotected, written, "node protection updated");
        }
        Ok(written)
    }
}

/// Sends a message on `tx` at each run time (cron or fixed interval). Uses local time for cron.
async fn protection_scheduler(schedule: ProtectionSchedule, tx: tokio::sync::mpsc::Sender<()>) {
    if let Some(ref cron_str) = schedule.schedule {
        let Ok(cron) = cron::Schedule::from_str(cron_str) else {
            warn!(cron = %cron_str, "invalid protection schedule; node protection will not run");
            return;
        };
        loop {
            let now = chrono::Local::now();
            if let Some(next) = cron.after(&now).next() {
                let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                tokio::time::sleep(delay).await;
                if tx.send(()).await.is_err() {
                    break;
                }
            } else {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
    } else {
        let interval = Duration::from_secs(schedule.interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            if tx.send(()).await.is_err() {
                break;
            }
        }
    }
}

pub fn spawn(
    coordinator: Arc<NodeProtectionCoordinator>,
    schedule: ProtectionSchedule,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    let span = tracing::span!(tracing::Level::DEBUG, "node_protection");
    tokio::spawn(
        async move {
            let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);
            let scheduler = tokio::spawn(protection_scheduler(schedule, tx));
            loop {
                tokio::select! {
                    Some(()) = rx.recv() => {
                        if let Err(e) = coordinator.run_once() {
                            warn!(error = %e, operation = "node_protection", "node protection pass failed");
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::debug!("Node protection shutting down");
                        break;
                    }
                }
            }
            scheduler.abort();
        }
        .instrument(span),
    )
}
