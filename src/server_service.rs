// Node-facing service: metrics updates and the local/cross-node dump operations.
// Remote variants go through the Exchange; local ones run in-process.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::cluster::{ClusterMessage, ClusterTransport, Exchange, NodeId};
use crate::dump::{HeapDumpManager, ThreadContextRegistry, ThreadDumper};
use crate::error::{MonitorError, MonitorResult};
use crate::metrics_calculator::MetricsCalculator;
use crate::metrics_repo::MetricsRepo;
use crate::models::{
    NodeHistories, ServerMetrics, ServerUsage, WorkloadSample, usage_from_histories,
};
use crate::runtime_probe::RuntimeProbe;
use crate::workload::WorkloadGauge;

/// Collaborators injected into the service.
pub struct ServerServiceDeps {
    pub transport: Arc<dyn ClusterTransport>,
    pub repo: Arc<MetricsRepo>,
    pub probe: Arc<dyn RuntimeProbe>,
    pub heap_dumps: Arc<HeapDumpManager>,
    pub thread_dumper: Arc<dyn ThreadDumper>,
    /// Blocking dump reads register here so they show up annotated in thread dumps.
    pub contexts: Arc<ThreadContextRegistry>,
    pub workload: Arc<WorkloadGauge>,
}

pub struct ServerServiceConfig {
    /// History queue bound (monitor.dataset_size).
    pub max_history: usize,
    pub exchange_timeout: Duration,
}

pub struct ServerService {
    local: NodeId,
    transport: Arc<dyn ClusterTransport>,
    repo: Arc<MetricsRepo>,
    probe: Arc<dyn RuntimeProbe>,
    heap_dumps: Arc<HeapDumpManager>,
    thread_dumper: Arc<dyn ThreadDumper>,
    contexts: Arc<ThreadContextRegistry>,
    workload: Arc<WorkloadGauge>,
    exchange: Exchange,
    calculator: MetricsCalculator,
    max_history: usize,
}

async fn blocking<R, F>(f: F) -> MonitorResult<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| MonitorError::Io(std::io::Error::other(format!("blocking task join: {}", e))))
}

impl ServerService {
    pub fn new(deps: ServerServiceDeps, config: ServerServiceConfig) -> Self {
        let ServerServiceDeps {
            transport,
            repo,
            probe,
            heap_dumps,
            thread_dumper,
            contexts,
            workload,
        } = deps;
        Self {
            local: transport.local_node(),
            exchange: Exchange::new(transport.clone(), config.exchange_timeout),
            transport,
            repo,
            probe,
            heap_dumps,
            thread_dumper,
            contexts,
            workload,
            calculator: MetricsCalculator::new(),
            max_history: config.max_history,
        }
    }

    pub fn local_node(&self) -> &NodeId {
        &self.local
    }

    pub fn is_local(&self, node: &NodeId) -> bool {
        *node == self.local
    }

    pub fn members(&self) -> Vec<NodeId> {
        self.transport.members()
    }

    pub fn transport(&self) -> &Arc<dyn ClusterTransport> {
        &self.transport
    }

    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    pub fn repo(&self) -> &Arc<MetricsRepo> {
        &self.repo
    }

    pub fn heap_dumps(&self) -> &Arc<HeapDumpManager> {
        &self.heap_dumps
    }

    /// One update cycle: read the probe, derive the next snapshot, append the workload
    /// counters to the histories and store both. A failed read leaves the stored state
    /// untouched.
    #[instrument(skip(self), fields(node = %self.local, operation = "update_metrics"))]
    pub async fn update_metrics(&self, now: i64) -> anyhow::Result<ServerMetrics> {
        let probe = self.probe.clone();
        let readings = tokio::task::spawn_blocking(move || probe.read())
            .await
            .map_err(|e| anyhow::anyhow!("probe task join: {}", e))??;

        let old = self.repo.current_metrics(&self.local)?;
        let mut histories = self.repo.histories(&self.local, self.max_history)?;
        let next = self
            .calculator
            .compute(old.as_ref(), &readings, now, &mut histories);
        let workload = self.workload.current();
        histories.workload.push(WorkloadSample {
            timestamp: now,
            executing_viewsheets: workload.executing_viewsheets,
            executing_queries: workload.executing_queries,
        });
        self.repo.save_metrics(&self.local, &next)?;
        self.repo.save_histories(&self.local, &histories)?;
        self.repo
            .set_local_sheet_count(&self.local, workload.open_sheets)?;
        Ok(next)
    }

    pub fn current_metrics(&self, node: &NodeId) -> anyhow::Result<Option<ServerMetrics>> {
        self.repo.current_metrics(node)
    }

    pub fn histories(&self, node: &NodeId) -> anyhow::Result<NodeHistories> {
        self.repo.histories(node, self.max_history)
    }

    pub fn usage(&self, node: &NodeId) -> anyhow::Result<Vec<ServerUsage>> {
        let histories = self.histories(node)?;
        Ok(usage_from_histories(node.as_str(), &histories))
    }

    #[instrument(skip(self), fields(operation = "get_thread_dump"))]
    pub async fn get_thread_dump(&self, node: &NodeId) -> MonitorResult<String> {
        if self.is_local(node) {
            let dumper = self.thread_dumper.clone();
            return blocking(move || dumper.dump()).await;
        }
        match self.exchange.request(node, ClusterMessage::GetThreadDump).await? {
            ClusterMessage::GetThreadDumpReply { thread_dump } => Ok(thread_dump),
            _ => Err(MonitorError::UnexpectedReply("get_thread_dump")),
        }
    }

    #[instrument(skip(self), fields(operation = "create_heap_dump"))]
    pub async fn create_heap_dump(&self, node: &NodeId) -> MonitorResult<String> {
        if self.is_local(node) {
            return self.heap_dumps.create_heap_dump();
        }
        match self.exchange.request(node, ClusterMessage::CreateHeapDump).await? {
            ClusterMessage::CreateHeapDumpReply { error: Some(_), id } => {
                Err(MonitorError::HeapDumpInProgress(id))
            }
            ClusterMessage::CreateHeapDumpReply { id, error: None } => Ok(id),
            _ => Err(MonitorError::UnexpectedReply("create_heap_dump")),
        }
    }

    pub async fn is_heap_dump_complete(&self, node: &NodeId, id: &str) -> MonitorResult<bool> {
        if self.is_local(node) {
            return Ok(self.heap_dumps.is_heap_dump_complete(id));
        }
        let request = ClusterMessage::IsHeapDumpComplete { id: id.to_string() };
        match self.exchange.request(node, request).await? {
            ClusterMessage::IsHeapDumpCompleteReply { complete, .. } => Ok(complete),
            _ => Err(MonitorError::UnexpectedReply("is_heap_dump_complete")),
        }
    }

    pub async fn get_heap_dump_length(&self, node: &NodeId, id: &str) -> MonitorResult<u64> {
        if self.is_local(node) {
            return Ok(self.heap_dumps.get_heap_dump_length(id));
        }
        let request = ClusterMessage::GetHeapDumpLength { id: id.to_string() };
        match self.exchange.request(node, request).await? {
            ClusterMessage::GetHeapDumpLengthReply { length, .. } => Ok(length),
            _ => Err(MonitorError::UnexpectedReply("get_heap_dump_length")),
        }
    }

    pub async fn get_heap_dump_content(
        &self,
        node: &NodeId,
        id: &str,
        offset: u64,
        length: u32,
    ) -> MonitorResult<Bytes> {
        if self.is_local(node) {
            let heap_dumps = self.heap_dumps.clone();
            let contexts = self.contexts.clone();
            let principal = self.local.to_string();
            let id = id.to_string();
            let content = blocking(move || {
                let call = format!("get_heap_dump_content {} offset={} length={}", id, offset, length);
                let _context = contexts.attach(Some(&principal), Some(&call));
                heap_dumps.get_heap_dump_content(&id, offset, length as usize)
            })
            .await??;
            return Ok(Bytes::from(content));
        }
        let request = ClusterMessage::GetHeapDumpContent {
            id: id.to_string(),
            offset,
            length,
        };
        match self.exchange.request(node, request).await? {
            ClusterMessage::GetHeapDumpContentReply { content, .. } => Ok(Bytes::from(content)),
            _ => Err(MonitorError::UnexpectedReply("get_heap_dump_content")),
        }
    }

    pub async fn dispose_heap_dump(&self, node: &NodeId, id: &str) -> MonitorResult<()> {
        if self.is_local(node) {
            self.heap_dumps.dispose_heap_dump(id);
            return Ok(());
        }
        let request = ClusterMessage::DisposeHeapDump { id: id.to_string() };
        match self.exchange.request(node, request).await? {
            ClusterMessage::DisposeHeapDumpReply { .. } => Ok(()),
            _ => Err(MonitorError::UnexpectedReply("dispose_heap_dump")),
        }
    }

    /// Serves a request from another node against local state. Returns `None` for
    /// messages that are not requests. A request counts as an executing query while served.
    pub async fn handle_request(&self, message: ClusterMessage) -> Option<ClusterMessage> {
        let _query = self.workload.begin_query();
        let local = self.local.clone();
        let reply = match message {
            ClusterMessage::GetThreadDump => {
                let thread_dump = self.get_thread_dump(&local).await.unwrap_or_else(|e| {
                    tracing::warn!(error = %e, operation = "get_thread_dump", "thread dump failed");
                    String::new()
                });
                ClusterMessage::GetThreadDumpReply { thread_dump }
            }
            ClusterMessage::CreateHeapDump => match self.heap_dumps.create_heap_dump() {
                Ok(id) => ClusterMessage::CreateHeapDumpReply { id, error: None },
                Err(e) => {
                    tracing::warn!(error = %e, operation = "create_heap_dump", "remote heap dump refused");
                    let id = self.heap_dumps.in_progress().unwrap_or_default();
                    ClusterMessage::CreateHeapDumpReply {
                        id,
                        error: Some(e.to_string()),
                    }
                }
            },
            ClusterMessage::IsHeapDumpComplete { id } => ClusterMessage::IsHeapDumpCompleteReply {
                complete: self.heap_dumps.is_heap_dump_complete(&id),
                id,
            },
            ClusterMessage::GetHeapDumpLength { id } => ClusterMessage::GetHeapDumpLengthReply {
                length: self.heap_dumps.get_heap_dump_length(&id),
                id,
            },
            ClusterMessage::GetHeapDumpContent { id, offset, length } => {
                let content = match self.get_heap_dump_content(&local, &id, offset, length).await {
                    Ok(c) => c.to_vec(),
                    Err(e) => {
                        tracing::warn!(error = %e, id = %id, operation = "get_heap_dump_content", "heap dump read failed");
                        Vec::new()
                    }
                };
                ClusterMessage::GetHeapDumpContentReply { id, content }
            }
            ClusterMessage::DisposeHeapDump { id } => {
                self.heap_dumps.dispose_heap_dump(&id);
                ClusterMessage::DisposeHeapDumpReply { id }
            }
            _ => return None,
        };
        Some(reply)
    }
}
