// HTTP routes: metrics views and dump downloads for any cluster member

mod dump;
mod http;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::DumpConfig;
use crate::error::MonitorError;
use crate::server_service::ServerService;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) service: Arc<ServerService>,
    pub(crate) dump: DumpConfig,
}

pub fn app(service: Arc<ServerService>, dump: DumpConfig) -> Router {
    let state = AppState { service, dump };
    Router::new()
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/nodes", get(http::nodes_handler)) // GET /api/nodes
        .route("/api/nodes/{node}/metrics", get(http::metrics_handler))
        .route("/api/nodes/{node}/usage", get(http::usage_handler))
        .route("/api/nodes/{node}/usage.csv", get(http::usage_csv_handler))
        .route("/api/nodes/{node}/thread-dump", get(dump::thread_dump_handler))
        .route("/api/nodes/{node}/heap-dump", get(dump::heap_dump_handler))
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}

/// Handler error rendered as `{ "error": ... }` with a matching status.
pub(crate) struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub(crate) fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

impl From<MonitorError> for ApiError {
    fn from(e: MonitorError) -> Self {
        let status = match e {
            MonitorError::HeapDumpInProgress(_) => StatusCode::CONFLICT,
            MonitorError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            MonitorError::NoReply { .. }
            | MonitorError::UnexpectedReply(_)
            | MonitorError::Transport(_)
            | MonitorError::Codec(_) => StatusCode::BAD_GATEWAY,
            MonitorError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        tracing::warn!(error = %e, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}
