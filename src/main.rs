use anyhow::Result;
use clusterwatch::*;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

use cluster::{ClusterStore, ClusterTransport, InMemoryCluster, NodeId};

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;

    let node_id = match app_config.node.id.clone() {
        Some(id) => NodeId::new(id),
        None => NodeId::new(
            sysinfo::System::host_name().ok_or_else(|| anyhow::anyhow!("host name unavailable; set node.id"))?,
        ),
    };
    let cluster = InMemoryCluster::new();
    let node = Arc::new(cluster.join(node_id.clone()));
    let transport: Arc<dyn ClusterTransport> = node.clone();
    let store: Arc<dyn ClusterStore> = node;
    let repo = Arc::new(metrics_repo::MetricsRepo::new(store));

    let collectors = Arc::new(runtime_probe::CollectorRegistry::new());
    let probe: Arc<dyn runtime_probe::RuntimeProbe> =
        Arc::new(runtime_probe::SysinfoProbe::new(collectors.clone())?);

    let heap_dumps = Arc::new(dump::HeapDumpManager::new(
        &app_config.node.cache_dir,
        Arc::new(dump::ProcessMapDumper),
    )?);
    // Dumps left behind by a previous run are unreachable; sweeping them is a reclamation pass.
    let sweeper = collectors.register("heapDumpSweeper");
    let stale = sweeper.time(|| heap_dumps.cleanup())?;
    if stale > 0 {
        tracing::info!(removed = stale, "removed stale heap dumps");
    }

    let contexts = Arc::new(dump::ThreadContextRegistry::new());
    let service = Arc::new(server_service::ServerService::new(
        server_service::ServerServiceDeps {
            transport: transport.clone(),
            repo: repo.clone(),
            probe: probe.clone(),
            heap_dumps: heap_dumps.clone(),
            thread_dumper: Arc::new(dump::ProcThreadDumper::new(contexts.clone())),
            contexts,
            workload: Arc::new(workload::WorkloadGauge::new()),
        },
        server_service::ServerServiceConfig {
            max_history: app_config.monitor.dataset_size,
            exchange_timeout: Duration::from_secs(app_config.cluster.exchange_timeout_secs),
        },
    ));
    tracing::info!(node = %node_id, "joined cluster");

    let (listener_shutdown_tx, listener_shutdown_rx) = tokio::sync::oneshot::channel();
    let listener_handle = listener::spawn(service.clone(), listener_shutdown_rx);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let worker_handle = worker::spawn(
        worker::WorkerDeps {
            service: service.clone(),
            cycles_total: Arc::new(AtomicU64::new(0)),
            shutdown_rx,
        },
        worker::WorkerConfig {
            update_interval_secs: app_config.monitor.update_interval_secs,
            stats_log_interval_secs: app_config.monitor.stats_log_interval_secs,
        },
    );

    let (publisher_shutdown_tx, publisher_shutdown_rx) = tokio::sync::oneshot::channel();
    let publisher = Arc::new(publisher::MetricsPublisherService::new(
        node_id.clone(),
        repo.clone(),
        probe,
        Arc::new(publisher::LogSink),
        publisher::MetricsPublisherConfig {
            destination: app_config.publisher.destination.clone(),
            interval: Duration::from_secs(app_config.publisher.interval_secs),
            initial_delay: Duration::from_secs(app_config.publisher.initial_delay_secs),
        },
    ));
    let publisher_handle = publisher.start(publisher_shutdown_rx);

    let (protection_shutdown_tx, protection_shutdown_rx) = tokio::sync::oneshot::channel();
    let protection_handle = node_protection::spawn(
        Arc::new(node_protection::NodeProtectionCoordinator::new(transport, repo.clone())),
        node_protection::ProtectionSchedule {
            interval_secs: app_config.protection.interval_secs,
            schedule: app_config.protection.schedule.clone(),
        },
        protection_shutdown_rx,
    );

    let app = routes::app(service, app_config.dump.clone());
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(_) => {
                        let _ = tokio::signal::ctrl_c().await;
                        return;
                    }
                };
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = tokio::signal::ctrl_c().await;
            }
        } => {
            tracing::info!("Received shutdown signal");
            let _ = shutdown_tx.send(());
            let _ = listener_shutdown_tx.send(());
            let _ = publisher_shutdown_tx.send(());
            let _ = protection_shutdown_tx.send(());
            let _ = worker_handle.await;
            let _ = listener_handle.await;
            if let Some(p) = publisher_handle {
                let _ = p.handle.await;
            }
            let _ = protection_handle.await;
        }
    }

    match sweeper.time(|| heap_dumps.cleanup()) {
        Ok(removed) => tracing::info!(removed, "heap dump cache cleared"),
        Err(e) => tracing::warn!(error = %e, operation = "cleanup", "heap dump cleanup failed"),
    }
    repo.forget_node(&node_id);
    cluster.leave(&node_id);
    Ok(())
}
