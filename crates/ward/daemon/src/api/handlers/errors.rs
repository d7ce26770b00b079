//! Error ledger handlers

use crate::api::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use ward_types::{ClassifiedError, ErrorId, ErrorKind, ErrorSummary, RawSignal};

/// Ingest a raw failure signal
///
/// Nominal readings are accepted with `204 No Content`.
pub async fn report_signal(
    State(state): State<AppState>,
    Json(signal): Json<RawSignal>,
) -> Response {
    match state.context.report_signal(&signal) {
        Some(recorded) => (StatusCode::ACCEPTED, Json(recorded)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// Filters for listing errors
#[derive(Debug, Default, Deserialize)]
pub struct ListErrorsQuery {
    /// Only entries of this kind
    pub kind: Option<ErrorKind>,

    /// Include resolved entries (default true)
    pub include_resolved: Option<bool>,
}

/// List ledger entries, most recent first
pub async fn list_errors(
    State(state): State<AppState>,
    Query(query): Query<ListErrorsQuery>,
) -> Json<Vec<ClassifiedError>> {
    let include_resolved = query.include_resolved.unwrap_or(true);
    let errors = state
        .context
        .errors()
        .into_iter()
        .filter(|e| query.kind.map_or(true, |kind| e.kind == kind))
        .filter(|e| include_resolved || !e.resolved)
        .collect();
    Json(errors)
}

/// Aggregate error summary
pub async fn error_summary(State(state): State<AppState>) -> Json<ErrorSummary> {
    Json(state.context.get_error_summary())
}

/// Mark an entry resolved
pub async fn resolve_error(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ClassifiedError>> {
    let id: ErrorId = id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid error id {}: {}", id, e)))?;
    Ok(Json(state.context.resolve_error(&id)?))
}

/// Count of removed entries
#[derive(Debug, Serialize)]
pub struct ClearResolvedResponse {
    pub removed: usize,
}

/// Drop every resolved entry
pub async fn clear_resolved(State(state): State<AppState>) -> Json<ClearResolvedResponse> {
    Json(ClearResolvedResponse {
        removed: state.context.clear_resolved_errors(),
    })
}
