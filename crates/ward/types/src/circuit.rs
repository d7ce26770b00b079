//! Circuit breaker state types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally.
    Closed,

    /// Circuit is open, requests are rejected without being attempted.
    Open,

    /// Circuit is letting a limited number of trial requests through.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Point-in-time statistics for one breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    /// Breaker name.
    pub name: String,

    /// Current state.
    pub state: CircuitState,

    /// Consecutive failures in the closed state.
    pub failure_count: u32,

    /// When the breaker last opened, if it is open.
    pub opened_at: Option<DateTime<Utc>>,

    /// Time of the last state transition.
    pub last_transition: DateTime<Utc>,

    /// Calls that reached the underlying operation.
    pub total_calls: u64,

    /// Calls whose underlying operation failed.
    pub total_failures: u64,

    /// Calls refused without invoking the operation.
    pub rejected_calls: u64,
}
