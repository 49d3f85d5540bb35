// Cross-node dump protocol over the in-memory cluster

mod common;

use clusterwatch::cluster::{InMemoryCluster, NodeId};
use clusterwatch::error::MonitorError;
use clusterwatch::listener;
use common::{FakeHeapDumper, TestNode, join_node, noisy_payload};
use flate2::read::GzDecoder;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::oneshot;

struct Pair {
    a: TestNode,
    b: TestNode,
    b_dumper: Arc<FakeHeapDumper>,
    _shutdown: Vec<oneshot::Sender<()>>,
    _dirs: (TempDir, TempDir),
}

fn pair(payload: Vec<u8>, gated: bool) -> Pair {
    let cluster = InMemoryCluster::new();
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let b_dumper = Arc::new(if gated {
        FakeHeapDumper::gated(payload)
    } else {
        FakeHeapDumper::new(payload)
    });
    let a = join_node(
        &cluster,
        "node-a",
        dir_a.path(),
        Arc::new(FakeHeapDumper::new(Vec::new())),
    );
    let b = join_node(&cluster, "node-b", dir_b.path(), b_dumper.clone());
    let mut shutdown = Vec::new();
    for node in [&a, &b] {
        let (tx, rx) = oneshot::channel();
        listener::spawn(node.service.clone(), rx);
        shutdown.push(tx);
    }
    Pair {
        a,
        b,
        b_dumper,
        _shutdown: shutdown,
        _dirs: (dir_a, dir_b),
    }
}

async fn wait_remote_complete(p: &Pair, id: &str) {
    for _ in 0..500 {
        if p.a.service.is_heap_dump_complete(&p.b.id, id).await.unwrap() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("remote heap dump {} did not complete", id);
}

#[tokio::test]
async fn test_remote_thread_dump() {
    let p = pair(Vec::new(), false);
    let dump = p.a.service.get_thread_dump(&p.b.id).await.unwrap();
    assert_eq!(dump, "threads of node-b");
    let local = p.a.service.get_thread_dump(&p.a.id).await.unwrap();
    assert_eq!(local, "threads of node-a");
    assert_eq!(p.a.service.exchange().pending_count(), 0);
}

#[tokio::test]
async fn test_remote_heap_dump_lifecycle() {
    let payload = noisy_payload(16 * 1024);
    let p = pair(payload.clone(), false);
    let service = &p.a.service;

    let id = service.create_heap_dump(&p.b.id).await.unwrap();
    wait_remote_complete(&p, &id).await;

    let length = service.get_heap_dump_length(&p.b.id, &id).await.unwrap();
    assert!(length > 0);
    let mut body = Vec::new();
    let mut offset = 0u64;
    while offset < length {
        let want = (length - offset).min(1000) as u32;
        let chunk = service
            .get_heap_dump_content(&p.b.id, &id, offset, want)
            .await
            .unwrap();
        assert!(!chunk.is_empty());
        offset += chunk.len() as u64;
        body.extend_from_slice(&chunk);
    }
    let mut decoded = Vec::new();
    GzDecoder::new(body.as_slice())
        .read_to_end(&mut decoded)
        .unwrap();
    assert_eq!(decoded, payload);

    service.dispose_heap_dump(&p.b.id, &id).await.unwrap();
    assert_eq!(service.get_heap_dump_length(&p.b.id, &id).await.unwrap(), 0);
    // The dump lives on node-b only.
    assert_eq!(p.a.service.heap_dumps().get_heap_dump_length(&id), 0);
}

#[tokio::test]
async fn test_remote_create_while_in_progress_is_refused() {
    let p = pair(b"heap".to_vec(), true);
    let id = p.a.service.create_heap_dump(&p.b.id).await.unwrap();
    assert!(!p.a.service.is_heap_dump_complete(&p.b.id, &id).await.unwrap());

    match p.a.service.create_heap_dump(&p.b.id).await {
        Err(MonitorError::HeapDumpInProgress(current)) => assert_eq!(current, id),
        other => panic!("expected HeapDumpInProgress, got {:?}", other),
    }

    p.b_dumper.open();
    wait_remote_complete(&p, &id).await;
}

#[tokio::test]
async fn test_send_to_departed_node_is_no_reply() {
    let cluster = InMemoryCluster::new();
    let dir = TempDir::new().unwrap();
    let a = join_node(
        &cluster,
        "node-a",
        dir.path(),
        Arc::new(FakeHeapDumper::new(Vec::new())),
    );
    let gone = NodeId::from("node-gone");
    match a.service.get_thread_dump(&gone).await {
        Err(MonitorError::NoReply { node, .. }) => assert_eq!(node, gone),
        other => panic!("expected NoReply, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_silent_node_times_out() {
    let cluster = InMemoryCluster::new();
    let dir = TempDir::new().unwrap();
    let a = join_node(
        &cluster,
        "node-a",
        dir.path(),
        Arc::new(FakeHeapDumper::new(Vec::new())),
    );
    // Subscribed but never answers.
    let silent = cluster.join("node-silent");
    let _inbox = clusterwatch::cluster::ClusterTransport::subscribe(&silent);

    let err = a
        .service
        .create_heap_dump(&NodeId::from("node-silent"))
        .await
        .unwrap_err();
    assert!(matches!(err, MonitorError::Timeout { .. }));
    assert_eq!(a.service.exchange().pending_count(), 0);
}
