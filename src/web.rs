//! HTTP routes for the chart repository.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower_http::{services::ServeDir, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use crate::store::IndexStore;

/// Prefix archives are served under.
pub const CHARTS_PREFIX: &str = "/charts";
/// Path of the index document.
pub const INDEX_PATH: &str = "/charts/index.yaml";
/// Content type of the index document.
pub const INDEX_CONTENT_TYPE: &str = "application/x-yaml";

/// Build the router.
///
/// Health routes are answered directly. The index and archive routes go
/// through [`log_request`]; archives are read straight from `repo_dir`.
pub fn router(store: Arc<IndexStore>, repo_dir: impl AsRef<Path>, timeout: Duration) -> Router {
    let charts = Router::new()
        .route(INDEX_PATH, get(serve_index))
        .nest_service(CHARTS_PREFIX, ServeDir::new(repo_dir.as_ref()))
        .layer(middleware::from_fn(log_request))
        .with_state(store);

    Router::new()
        .route("/liveness", get(health))
        .route("/readiness", get(health))
        .merge(charts)
        .layer(request_timeout(timeout))
        .layer(TraceLayer::new_for_http())
}

/// Answer `408 Request Timeout` for requests that run longer than `timeout`.
pub fn request_timeout(timeout: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn serve_index(State(store): State<Arc<IndexStore>>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, INDEX_CONTENT_TYPE)], store.read())
}

/// Log method, status, elapsed time and URI of each request.
pub async fn log_request(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();

    let response = next.run(req).await;

    info!(
        method = %method,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        uri = %uri,
        "Request completed"
    );
    response
}
