//! Health endpoint: reports whether the backing store is serving.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use notably_engine::kv::KvStore;
use serde::Serialize;
use std::time::Duration;

use crate::AppState;

/// How long the probe waits on the backing table before reporting it down.
const STORE_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Create health routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Health check handler; probes the physical table's readiness through the
/// same adapter the request path uses.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let version = env!("CARGO_PKG_VERSION").to_string();
    match state.kv.await_ready(STORE_PROBE_TIMEOUT).await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".to_string(),
                version,
            }),
        ),
        Err(err) => {
            tracing::warn!(%err, "backing store not ready");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable".to_string(),
                    version,
                }),
            )
        }
    }
}
