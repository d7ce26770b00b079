//! Application state for API handlers

use std::sync::Arc;
use ward_resilience::ResilienceContext;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// The resilience context served by this daemon
    pub context: Arc<ResilienceContext>,

    /// Daemon version
    pub version: String,

    /// Daemon start time
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Create new application state
    pub fn new(context: Arc<ResilienceContext>) -> Self {
        Self {
            context,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: chrono::Utc::now(),
        }
    }

    /// Seconds since the daemon started
    pub fn uptime_secs(&self) -> i64 {
        (chrono::Utc::now() - self.started_at).num_seconds()
    }
}
