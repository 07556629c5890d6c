use crate::config::{Config, SourceConfig};
use crate::error::IngestError;
use crate::metrics;
use crate::pipeline::orchestrator::RunCoordinator;
use crate::sources::{build_adapters, parse_source_list};
use crate::types::{IngestResult, IngestRun};
use axum::{
    extract::{Query, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use hyper::Server;
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: RunCoordinator,
    pub sources: Arc<Vec<SourceConfig>>,
    pub secret_header: String,
    /// Without a secret the trigger rejects every request
    pub secret: Option<String>,
}

impl AppState {
    pub fn new(coordinator: RunCoordinator, config: &Config) -> Self {
        Self {
            coordinator,
            sources: Arc::new(config.sources.clone()),
            secret_header: config.server.secret_header.to_lowercase(),
            secret: config.server.secret.clone(),
        }
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(secret) = self.secret.as_deref().filter(|s| !s.is_empty()) else {
            return false;
        };
        headers
            .get(self.secret_header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(|given| given == secret)
            .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
pub struct IngestParams {
    /// Comma-separated source names; all enabled sources when absent
    pub sources: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestSummary {
    pub total: usize,
    pub created: usize,
    pub updated: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<IngestSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngestResponse {
    fn completed(result: IngestResult) -> Self {
        Self {
            success: true,
            results: Some(IngestSummary {
                total: result.total,
                created: result.created,
                updated: result.updated,
                errors: result.errors,
            }),
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self { success: false, results: None, error: Some(error.into()) }
    }
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "event-ingest",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn metrics_text() -> impl IntoResponse {
    match metrics::render() {
        Some(body) => (StatusCode::OK, body),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed".to_string()),
    }
}

/// Trigger one ingestion run and report its outcome.
async fn trigger_ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<IngestParams>,
) -> Response {
    if !state.authorized(&headers) {
        warn!("Rejected ingest trigger with missing or wrong secret");
        return (StatusCode::UNAUTHORIZED, Json(IngestResponse::failed("unauthorized"))).into_response();
    }

    let only = params.sources.as_deref().map(parse_source_list).filter(|names| !names.is_empty());
    let adapters = match build_adapters(&state.sources, only.as_deref()) {
        Ok(adapters) => adapters,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(IngestResponse::failed(e.to_string()))).into_response(),
    };

    info!(sources = adapters.len(), "Ingest triggered over HTTP");
    match state.coordinator.run_ingestion(adapters).await {
        Ok(result) => (StatusCode::OK, Json(IngestResponse::completed(result))).into_response(),
        Err(e @ IngestError::LockContention { .. }) => {
            (StatusCode::SERVICE_UNAVAILABLE, Json(IngestResponse::failed(e.to_string()))).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(IngestResponse::failed(e.to_string()))).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct RunsParams {
    pub limit: Option<usize>,
}

async fn list_runs(State(state): State<AppState>, Query(params): Query<RunsParams>) -> Response {
    let limit = params.limit.unwrap_or(20).clamp(1, 200);
    match state.coordinator.recent_runs(limit).await {
        Ok(runs) => Json::<Vec<IngestRun>>(runs).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Create the HTTP router with all routes
pub fn create_server(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .route("/api/ingest", post(trigger_ingest))
        .route("/api/runs", get(list_runs))
        .layer(ServiceBuilder::new().layer(cors))
        .with_state(state)
}

/// Serve on an already bound listener.
pub async fn serve(state: AppState, listener: TcpListener) -> Result<(), hyper::Error> {
    let app = create_server(state);
    Server::from_tcp(listener)?.serve(app.into_make_service()).await
}

/// Start the HTTP server on the specified port
pub async fn start_server(state: AppState, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    info!("HTTP server listening on http://{addr}");
    serve(state, listener).await?;
    Ok(())
}
