// Shared test helpers
#![allow(dead_code)]

use clusterwatch::cluster::{ClusterStore, ClusterTransport, InMemoryCluster, NodeId};
use clusterwatch::dump::{HeapDumpManager, HeapDumper, ThreadContextRegistry, ThreadDumper};
use clusterwatch::metrics_repo::MetricsRepo;
use clusterwatch::models::GcMetrics;
use clusterwatch::runtime_probe::{RuntimeProbe, RuntimeReadings};
use clusterwatch::server_service::{ServerService, ServerServiceConfig, ServerServiceDeps};
use clusterwatch::workload::WorkloadGauge;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

pub fn readings(uptime_ms: u64, cpu_time_ns: u64, cores: u32) -> RuntimeReadings {
    RuntimeReadings {
        uptime_ms,
        cpu_time_ns,
        cores,
        heap_used: 256,
        heap_max: 1024,
        collectors: vec![],
    }
}

pub fn gc(name: &str, count: u64, time: u64) -> GcMetrics {
    GcMetrics::new(name, count, time)
}

/// Probe returning whatever the test last set.
pub struct FakeProbe {
    current: Mutex<anyhow::Result<RuntimeReadings>>,
}

impl FakeProbe {
    pub fn new(readings: RuntimeReadings) -> Self {
        Self {
            current: Mutex::new(Ok(readings)),
        }
    }

    pub fn set(&self, readings: RuntimeReadings) {
        *self.current.lock().unwrap() = Ok(readings);
    }

    pub fn fail(&self, reason: &str) {
        *self.current.lock().unwrap() = Err(anyhow::anyhow!(reason.to_string()));
    }
}

impl RuntimeProbe for FakeProbe {
    fn read(&self) -> anyhow::Result<RuntimeReadings> {
        match &*self.current.lock().unwrap() {
            Ok(r) => Ok(r.clone()),
            Err(e) => Err(anyhow::anyhow!(e.to_string())),
        }
    }
}

/// Writes `payload` as the raw dump; blocks until `open()` when gated.
pub struct FakeHeapDumper {
    payload: Vec<u8>,
    gate: Arc<(Mutex<bool>, Condvar)>,
}

impl FakeHeapDumper {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            gate: Arc::new((Mutex::new(true), Condvar::new())),
        }
    }

    pub fn gated(payload: Vec<u8>) -> Self {
        Self {
            payload,
            gate: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    pub fn open(&self) {
        let (lock, cvar) = &*self.gate;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }
}

impl HeapDumper for FakeHeapDumper {
    fn dump(&self, path: &Path) -> std::io::Result<()> {
        let (lock, cvar) = &*self.gate;
        let _open = cvar
            .wait_while(lock.lock().unwrap(), |open| !*open)
            .unwrap();
        std::fs::write(path, &self.payload)
    }
}

pub struct FixedThreadDumper(pub String);

impl ThreadDumper for FixedThreadDumper {
    fn dump(&self) -> String {
        self.0.clone()
    }
}

/// Pseudo-random bytes so the gzip output is not trivially small.
pub fn noisy_payload(len: usize) -> Vec<u8> {
    let mut x: u32 = 0x9E37_79B9;
    (0..len)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            (x & 0xFF) as u8
        })
        .collect()
}

/// Polls until the dump is no longer in progress.
pub fn wait_complete(manager: &HeapDumpManager, id: &str) {
    for _ in 0..500 {
        if manager.is_heap_dump_complete(id) {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("heap dump {} did not complete", id);
}

pub struct TestNode {
    pub id: NodeId,
    pub service: Arc<ServerService>,
    pub probe: Arc<FakeProbe>,
    pub workload: Arc<WorkloadGauge>,
    pub transport: Arc<dyn ClusterTransport>,
    pub store: Arc<dyn ClusterStore>,
}

pub fn join_node(
    cluster: &InMemoryCluster,
    id: &str,
    cache_dir: &Path,
    dumper: Arc<dyn HeapDumper>,
) -> TestNode {
    let node = Arc::new(cluster.join(id));
    let transport: Arc<dyn ClusterTransport> = node.clone();
    let store: Arc<dyn ClusterStore> = node;
    let probe = Arc::new(FakeProbe::new(readings(1_000, 0, 1)));
    let workload = Arc::new(WorkloadGauge::new());
    let service = Arc::new(ServerService::new(
        ServerServiceDeps {
            transport: transport.clone(),
            repo: Arc::new(MetricsRepo::new(store.clone())),
            probe: probe.clone(),
            heap_dumps: Arc::new(HeapDumpManager::new(cache_dir, dumper).unwrap()),
            thread_dumper: Arc::new(FixedThreadDumper(format!("threads of {}", id))),
            contexts: Arc::new(ThreadContextRegistry::new()),
            workload: workload.clone(),
        },
        ServerServiceConfig {
            max_history: 5,
            exchange_timeout: Duration::from_secs(5),
        },
    ));
    TestNode {
        id: NodeId::from(id),
        service,
        probe,
        workload,
        transport,
        store,
    }
}
