// Metrics publishing for autoscaling. Every node writes its memory utilization to a
// shared map; the node that first increments the cluster counter also reads the map
// and emits the aggregate. Best effort: there is no re-election if that node goes away.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{Instant, interval, interval_at};
use tracing::Instrument;

use crate::cluster::NodeId;
use crate::metrics_repo::MetricsRepo;
use crate::runtime_probe::RuntimeProbe;

pub const PUBLISHER_COUNTER: &str = "metricsPublisher";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedMetrics {
    pub timestamp: i64,
    pub destination: String,
    pub memory_utilization: BTreeMap<NodeId, f64>,
    pub average_memory_utilization: f64,
}

pub trait MetricsSink: Send + Sync {
    fn publish(&self, metrics: &PublishedMetrics) -> anyhow::Result<()>;
}

/// Emits each aggregate as one structured log line.
pub struct LogSink;

impl MetricsSink for LogSink {
    fn publish(&self, metrics: &PublishedMetrics) -> anyhow::Result<()> {
        let body = serde_json::to_string(metrics)?;
        tracing::info!(
            destination = %metrics.destination,
            average = metrics.average_memory_utilization,
            nodes = metrics.memory_utilization.len(),
            metrics = %body,
            "published cluster metrics"
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MetricsPublisherConfig {
    pub destination: Option<String>,
    pub interval: Duration,
    pub initial_delay: Duration,
}

pub struct MetricsPublisherService {
    local: NodeId,
    repo: Arc<MetricsRepo>,
    probe: Arc<dyn RuntimeProbe>,
    sink: Arc<dyn MetricsSink>,
    config: MetricsPublisherConfig,
}

/// Running publisher task and whether this node won the publisher race.
pub struct PublisherHandle {
    pub is_publisher: bool,
    pub handle: tokio::task::JoinHandle<()>,
}

impl MetricsPublisherService {
    pub fn new(
        local: NodeId,
        repo: Arc<MetricsRepo>,
        probe: Arc<dyn RuntimeProbe>,
        sink: Arc<dyn MetricsSink>,
        config: MetricsPublisherConfig,
    ) -> Self {
        Self {
            local,
            repo,
            probe,
            sink,
            config,
        }
    }

    /// Joins the publisher race and starts the periodic task. `None` when no
    /// destination is configured.
    pub fn start(self: Arc<Self>, mut shutdown_rx: oneshot::Receiver<()>) -> Option<PublisherHandle> {
        let Some(destination) = self.config.destination.clone() else {
            tracing::info!("no metrics destination configured; publishing disabled");
            return None;
        };
        let is_publisher = self.repo.store().increment_and_get(PUBLISHER_COUNTER) == 1;
        if is_publisher {
            tracing::info!(node = %self.local, destination = %destination, "elected metrics publisher");
        }

        let span = tracing::span!(tracing::Level::DEBUG, "publisher", is_publisher);
        let handle = tokio::spawn(
            async move {
                let mut utilization_tick = interval(self.config.interval);
                utilization_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                let mut publish_tick =
                    interval_at(Instant::now() + self.config.initial_delay, self.config.interval);
                publish_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = utilization_tick.tick() => {
                            if let Err(e) = self.update_utilization().await {
                                tracing::warn!(error = %e, operation = "update_utilization", "memory utilization update failed");
                            }
                        }
                        _ = publish_tick.tick(), if is_publisher => {
                            if let Err(e) = self.publish_once(crate::worker::now_millis()) {
                                tracing::warn!(error = %e, operation = "publish_metrics", "metrics publish failed");
                            }
                        }
                        _ = &mut shutdown_rx => {
                            tracing::debug!("Publisher shutting down");
                            break;
                        }
                    }
                }
            }
            .instrument(span),
        );
        Some(PublisherHandle {
            is_publisher,
            handle,
        })
    }

    /// Writes this node's `heap_used / heap_max` into the shared map.
    pub async fn update_utilization(&self) -> anyhow::Result<f64> {
        let probe = self.probe.clone();
        let readings = tokio::task::spawn_blocking(move || probe.read())
            .await
            .map_err(|e| anyhow::anyhow!("probe task join: {}", e))??;
        let ratio = readings.memory_utilization();
        self.repo.set_memory_utilization(&self.local, ratio)?;
        Ok(ratio)
    }

    /// Reads every node's utilization and hands the aggregate to the sink.
    pub fn publish_once(&self, now: i64) -> anyhow::Result<PublishedMetrics> {
        let memory_utilization = self.repo.memory_utilization();
        let average_memory_utilization = if memory_utilization.is_empty() {
            0.0
        } else {
            memory_utilization.values().sum::<f64>() / memory_utilization.len() as f64
        };
        let metrics = PublishedMetrics {
            timestamp: now,
            destination: self.config.destination.clone().unwrap_or_default(),
            memory_utilization,
            average_memory_utilization,
        };
        self.sink.publish(&metrics)?;
        Ok(metrics)
    }
}
