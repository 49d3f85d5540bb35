// GET handlers: version, members, metrics, usage

use axum::{
    Json,
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};

use super::{ApiError, AppState};
use crate::cluster::NodeId;
use crate::models::to_csv;

/// GET /version: service name and version from Cargo.toml at build time.
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /api/nodes: current cluster members, sorted.
pub(super) async fn nodes_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut members = state.service.members();
    members.sort();
    Json(members)
}

pub(super) async fn metrics_handler(
    State(state): State<AppState>,
    Path(node): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let node = NodeId::new(node);
    match state.service.current_metrics(&node)? {
        Some(metrics) => Ok(Json(metrics)),
        None => Err(ApiError::not_found(format!("no metrics for {}", node))),
    }
}

pub(super) async fn usage_handler(
    State(state): State<AppState>,
    Path(node): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let usage = state.service.usage(&NodeId::new(node))?;
    Ok(Json(usage))
}

pub(super) async fn usage_csv_handler(
    State(state): State<AppState>,
    Path(node): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let usage = state.service.usage(&NodeId::new(node))?;
    Ok(([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], to_csv(&usage)))
}
