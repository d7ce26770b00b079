//! Health and status handlers

use crate::api::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use ward_types::{HealthSnapshot, HealthStatus};

/// Health endpoint. Polls now; answers 503 while critical so load
/// balancers can act on the status code alone.
pub async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<HealthSnapshot>) {
    let snapshot = state.context.get_health();
    let code = match snapshot.status {
        HealthStatus::Critical => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (code, Json(snapshot))
}

/// Daemon status response
#[derive(Debug, Serialize)]
pub struct DaemonStatusResponse {
    pub version: String,
    pub uptime_secs: i64,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub scheduler_running: bool,
    pub breakers: usize,
    pub errors: usize,
    /// Last scheduled snapshot, without polling.
    pub latest_health: Option<HealthSnapshot>,
}

/// Daemon status endpoint
pub async fn daemon_status(State(state): State<AppState>) -> Json<DaemonStatusResponse> {
    Json(DaemonStatusResponse {
        version: state.version.clone(),
        uptime_secs: state.uptime_secs(),
        started_at: state.started_at,
        scheduler_running: state.context.is_scheduler_running(),
        breakers: state.context.breakers().len(),
        errors: state.context.ledger().len(),
        latest_health: state.context.latest_health(),
    })
}
