//! Circuit breaker handlers

use crate::api::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use ward_types::CircuitBreakerStats;

/// Stats for every breaker
pub async fn list_breakers(State(state): State<AppState>) -> Json<Vec<CircuitBreakerStats>> {
    Json(state.context.breaker_stats())
}

/// Force one breaker closed
pub async fn reset_breaker(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<CircuitBreakerStats>> {
    state.context.reset_breaker(&name)?;
    let breaker = state
        .context
        .breakers()
        .get(&name)
        .ok_or_else(|| ApiError::NotFound(format!("circuit breaker not found: {}", name)))?;
    Ok(Json(breaker.stats()))
}

/// Count of reset breakers
#[derive(Debug, Serialize)]
pub struct ResetAllResponse {
    pub reset: usize,
}

/// Force every breaker closed
pub async fn reset_all_breakers(State(state): State<AppState>) -> Json<ResetAllResponse> {
    Json(ResetAllResponse {
        reset: state.context.reset_all_breakers(),
    })
}
