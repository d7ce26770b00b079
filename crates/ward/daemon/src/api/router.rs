//! API Router configuration

use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState, enable_cors: bool) -> Router {
    let api_routes = Router::new()
        // Ingestion
        .route("/signals", post(handlers::report_signal))
        // Errors
        .route("/errors", get(handlers::list_errors))
        .route("/errors/summary", get(handlers::error_summary))
        .route("/errors/clear-resolved", post(handlers::clear_resolved))
        .route("/errors/:id/resolve", post(handlers::resolve_error))
        // Breakers
        .route("/breakers", get(handlers::list_breakers))
        .route("/breakers/reset", post(handlers::reset_all_breakers))
        .route("/breakers/:name/reset", post(handlers::reset_breaker))
        // Daemon
        .route("/status", get(handlers::daemon_status));

    let router = Router::new()
        .route("/healthz", get(handlers::healthz))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http());

    let router = if enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}
