// Dump downloads. The heap dump handler drives the whole remote lifecycle:
// create, wait for completion, stream in chunks, dispose.

use axum::{
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{ApiError, AppState};
use crate::cluster::NodeId;
use crate::server_service::ServerService;

fn member(state: &AppState, node: String) -> Result<NodeId, ApiError> {
    let node = NodeId::new(node);
    if state.service.members().contains(&node) {
        Ok(node)
    } else {
        Err(ApiError::not_found(format!("{} is not a cluster member", node)))
    }
}

pub(super) async fn thread_dump_handler(
    State(state): State<AppState>,
    Path(node): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let node = member(&state, node)?;
    let dump = state.service.get_thread_dump(&node).await?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], dump))
}

pub(super) async fn heap_dump_handler(
    State(state): State<AppState>,
    Path(node): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let node = member(&state, node)?;
    let service = &state.service;
    let id = service.create_heap_dump(&node).await?;
    tracing::info!(node = %node, id = %id, "heap dump requested");

    let mut disposal = Disposal {
        service: service.clone(),
        node: node.clone(),
        id: id.clone(),
        poll: Duration::from_millis(state.dump.poll_interval_ms),
        max_wait: Duration::from_secs(state.dump.max_wait_secs),
        armed: true,
    };
    let result = download(service, &node, &id, &state).await;
    disposal.armed = false;
    dispose(service, &node, &id).await;
    let body = result?;

    let disposition = format!("attachment; filename=\"{}.hprof.gz\"", id);
    Ok((
        [
            (header::CONTENT_TYPE, "application/gzip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}

async fn dispose(service: &ServerService, node: &NodeId, id: &str) {
    if let Err(e) = service.dispose_heap_dump(node, id).await {
        tracing::warn!(error = %e, node = %node, id = %id, operation = "dispose_heap_dump", "heap dump dispose failed");
    }
}

/// Disposes the dump in the background if the handler is dropped mid-download
/// (client went away). Waits for generation to finish first so no file is left behind.
struct Disposal {
    service: Arc<ServerService>,
    node: NodeId,
    id: String,
    poll: Duration,
    max_wait: Duration,
    armed: bool,
}

impl Drop for Disposal {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let service = self.service.clone();
        let node = self.node.clone();
        let id = std::mem::take(&mut self.id);
        let poll = self.poll;
        let deadline = Instant::now() + self.max_wait;
        tracing::info!(node = %node, id = %id, "heap dump download abandoned; disposing");
        tokio::spawn(async move {
            while !service.is_heap_dump_complete(&node, &id).await.unwrap_or(true)
                && Instant::now() < deadline
            {
                tokio::time::sleep(poll).await;
            }
            dispose(&service, &node, &id).await;
        });
    }
}

async fn download(
    service: &ServerService,
    node: &NodeId,
    id: &str,
    state: &AppState,
) -> Result<Vec<u8>, ApiError> {
    let poll = Duration::from_millis(state.dump.poll_interval_ms);
    let deadline = Instant::now() + Duration::from_secs(state.dump.max_wait_secs);
    while !service.is_heap_dump_complete(node, id).await? {
        if Instant::now() >= deadline {
            return Err(ApiError::new(
                StatusCode::GATEWAY_TIMEOUT,
                format!("heap dump {} did not complete in time", id),
            ));
        }
        tokio::time::sleep(poll).await;
    }

    let length = service.get_heap_dump_length(node, id).await?;
    if length == 0 {
        return Err(ApiError::new(
            StatusCode::BAD_GATEWAY,
            format!("heap dump {} failed on {}", id, node),
        ));
    }

    let chunk_size = u64::from(state.dump.chunk_size);
    let mut body = Vec::with_capacity(usize::try_from(length).unwrap_or(0));
    let mut offset = 0u64;
    while offset < length {
        let want = (length - offset).min(chunk_size) as u32;
        let chunk = service.get_heap_dump_content(node, id, offset, want).await?;
        if chunk.is_empty() {
            return Err(ApiError::new(
                StatusCode::BAD_GATEWAY,
                format!("heap dump {} truncated at {} of {} bytes", id, offset, length),
            ));
        }
        offset += chunk.len() as u64;
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}
