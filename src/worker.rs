// Background metrics worker: one update cycle per interval, plus a periodic stats line.
// A failed cycle is logged and skipped; the next tick tries again.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tokio::time::{Duration, interval};
use tracing::Instrument;

use crate::server_service::ServerService;

pub struct WorkerDeps {
    pub service: Arc<ServerService>,
    /// Successful cycles since start (read by the stats line and by tests).
    pub cycles_total: Arc<AtomicU64>,
    pub shutdown_rx: oneshot::Receiver<()>,
}

pub struct WorkerConfig {
    pub update_interval_secs: u64,
    /// How often to log app stats (real seconds).
    pub stats_log_interval_secs: u64,
}

pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, operation = "get_timestamp", "system time error");
            0
        })
}

pub fn spawn(deps: WorkerDeps, config: WorkerConfig) -> tokio::task::JoinHandle<()> {
    let WorkerDeps {
        service,
        cycles_total,
        mut shutdown_rx,
    } = deps;
    let WorkerConfig {
        update_interval_secs,
        stats_log_interval_secs,
    } = config;

    let span = tracing::span!(tracing::Level::DEBUG, "worker", update_interval_secs);
    tokio::spawn(
        async move {
            let mut tick = interval(Duration::from_secs(update_interval_secs));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut stats_log_tick = interval(Duration::from_secs(stats_log_interval_secs));
            stats_log_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut cycles_failed_total: u64 = 0;

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        match service.update_metrics(now_millis()).await {
                            Ok(m) => {
                                cycles_total.fetch_add(1, Ordering::Relaxed);
                                tracing::debug!(
                                    operation = "update_metrics",
                                    up_time = m.up_time,
                                    collection_count = m.collection_count,
                                    "metrics updated"
                                );
                            }
                            Err(e) => {
                                cycles_failed_total += 1;
                                tracing::warn!(
                                    error = %e,
                                    operation = "update_metrics",
                                    "metrics update skipped"
                                );
                            }
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::debug!("Worker shutting down");
                        break;
                    }
                    _ = stats_log_tick.tick() => {
                        tracing::info!(
                            node = %service.local_node(),
                            members = service.members().len(),
                            cycles_total = cycles_total.load(Ordering::Relaxed),
                            cycles_failed_total,
                            "app stats"
                        );
                    }
                }
            }
        }
        .instrument(span),
    )
}
