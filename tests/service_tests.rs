// ServerService metrics cycle, usage records and the background worker

mod common;

use clusterwatch::cluster::{ClusterMessage, InMemoryCluster};
use clusterwatch::dump::{HeapDumpManager, ThreadContextRegistry, ThreadDumper};
use clusterwatch::metrics_repo::MetricsRepo;
use clusterwatch::models::CSV_HEADER;
use clusterwatch::models::to_csv;
use clusterwatch::server_service::{ServerService, ServerServiceConfig, ServerServiceDeps};
use clusterwatch::worker;
use clusterwatch::workload::WorkloadGauge;
use common::{FakeHeapDumper, FakeProbe, join_node, readings};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tempfile::TempDir;

fn node(cluster: &InMemoryCluster, dir: &TempDir) -> common::TestNode {
    join_node(
        cluster,
        "node-a",
        dir.path(),
        Arc::new(FakeHeapDumper::new(Vec::new())),
    )
}

#[tokio::test]
async fn test_update_metrics_stores_snapshot_and_histories() {
    let cluster = InMemoryCluster::new();
    let dir = TempDir::new().unwrap();
    let n = node(&cluster, &dir);

    n.probe.set(readings(10_000, 0, 2));
    let first = n.service.update_metrics(100_000).await.unwrap();
    n.probe.set(readings(20_000, 5_000_000_000, 2));
    let second = n.service.update_metrics(110_000).await.unwrap();

    assert_eq!(second.start_date, first.start_date);
    assert_eq!(n.service.current_metrics(&n.id).unwrap(), Some(second));
    let h = n.service.histories(&n.id).unwrap();
    assert_eq!(h.cpu.len(), 2);
    assert!((h.cpu.latest().unwrap().ratio - 0.25).abs() < 1e-9);
}

#[tokio::test]
async fn test_failed_probe_leaves_state_untouched() {
    let cluster = InMemoryCluster::new();
    let dir = TempDir::new().unwrap();
    let n = node(&cluster, &dir);

    let first = n.service.update_metrics(1_000).await.unwrap();
    n.probe.fail("procfs unavailable");
    assert!(n.service.update_metrics(2_000).await.is_err());

    assert_eq!(n.service.current_metrics(&n.id).unwrap(), Some(first));
    assert_eq!(n.service.histories(&n.id).unwrap().cpu.len(), 1);
}

#[tokio::test]
async fn test_history_bounded_by_dataset_size() {
    let cluster = InMemoryCluster::new();
    let dir = TempDir::new().unwrap();
    let n = node(&cluster, &dir);
    for i in 0..8u64 {
        n.probe.set(readings(1_000 * (i + 1), 0, 1));
        n.service.update_metrics(i as i64).await.unwrap();
    }
    // join_node configures a bound of 5.
    let h = n.service.histories(&n.id).unwrap();
    assert_eq!(h.cpu.len(), 5);
    assert_eq!(h.memory.len(), 5);
    assert_eq!(h.gc.len(), 5);
}

#[tokio::test]
async fn test_usage_rows_keep_workload_of_their_cycle() {
    let cluster = InMemoryCluster::new();
    let dir = TempDir::new().unwrap();
    let n = node(&cluster, &dir);

    let sheet = n.workload.open_sheet();
    let query = n.workload.begin_query();
    n.service.update_metrics(1_000).await.unwrap();
    drop(query);

    let view1 = n.workload.begin_viewsheet();
    let view2 = n.workload.begin_viewsheet();
    n.probe.set(readings(2_000, 0, 1));
    n.service.update_metrics(2_000).await.unwrap();
    drop(view1);
    drop(view2);
    drop(sheet);

    n.probe.set(readings(3_000, 0, 1));
    n.service.update_metrics(3_000).await.unwrap();

    let usage = n.service.usage(&n.id).unwrap();
    let rows: Vec<(i64, u32, u32)> = usage
        .iter()
        .map(|u| (u.timestamp, u.executing_viewsheets, u.executing_queries))
        .collect();
    assert_eq!(rows, vec![(1_000, 0, 1), (2_000, 2, 0), (3_000, 0, 0)]);
    assert!(usage.iter().all(|u| u.host == "node-a" && u.memory_usage == 256));
    assert_eq!(
        n.service.repo().local_sheet_counts().get(&n.id).copied(),
        Some(0)
    );

    let csv = to_csv(&usage);
    let mut lines = csv.lines();
    assert_eq!(lines.next(), Some(CSV_HEADER));
    assert_eq!(lines.count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_worker_runs_cycles_until_shutdown() {
    let cluster = InMemoryCluster::new();
    let dir = TempDir::new().unwrap();
    let n = node(&cluster, &dir);
    let cycles = Arc::new(AtomicU64::new(0));
    let (tx, rx) = tokio::sync::oneshot::channel();

    let handle = worker::spawn(
        worker::WorkerDeps {
            service: n.service.clone(),
            cycles_total: cycles.clone(),
            shutdown_rx: rx,
        },
        worker::WorkerConfig {
            update_interval_secs: 60,
            stats_log_interval_secs: 300,
        },
    );
    for _ in 0..50 {
        if cycles.load(Ordering::Relaxed) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    assert!(cycles.load(Ordering::Relaxed) >= 1);
    assert!(n.service.current_metrics(&n.id).unwrap().is_some());

    tx.send(()).unwrap();
    handle.await.unwrap();
}

/// Blocks each dump until the test sends a release.
struct GatedThreadDumper(Mutex<mpsc::Receiver<()>>);

impl ThreadDumper for GatedThreadDumper {
    fn dump(&self) -> String {
        let _ = self.0.lock().unwrap().recv();
        "gated threads".to_string()
    }
}

#[tokio::test]
async fn test_served_request_counts_as_executing_query() {
    let cluster = InMemoryCluster::new();
    let dir = TempDir::new().unwrap();
    let member = Arc::new(cluster.join("node-a"));
    let (release, gate) = mpsc::channel();
    let workload = Arc::new(WorkloadGauge::new());
    let service = Arc::new(ServerService::new(
        ServerServiceDeps {
            transport: member.clone(),
            repo: Arc::new(MetricsRepo::new(member)),
            probe: Arc::new(FakeProbe::new(readings(1_000, 0, 1))),
            heap_dumps: Arc::new(
                HeapDumpManager::new(dir.path(), Arc::new(FakeHeapDumper::new(Vec::new())))
                    .unwrap(),
            ),
            thread_dumper: Arc::new(GatedThreadDumper(Mutex::new(gate))),
            contexts: Arc::new(ThreadContextRegistry::new()),
            workload: workload.clone(),
        },
        ServerServiceConfig {
            max_history: 5,
            exchange_timeout: Duration::from_secs(5),
        },
    ));

    let serving = {
        let service = service.clone();
        tokio::spawn(async move { service.handle_request(ClusterMessage::GetThreadDump).await })
    };
    let mut seen = false;
    for _ in 0..500 {
        if workload.current().executing_queries == 1 {
            seen = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(seen, "request never showed up as an executing query");

    release.send(()).unwrap();
    let reply = serving.await.unwrap();
    assert_eq!(
        reply,
        Some(ClusterMessage::GetThreadDumpReply {
            thread_dump: "gated threads".to_string()
        })
    );
    assert_eq!(workload.current().executing_queries, 0);
}
