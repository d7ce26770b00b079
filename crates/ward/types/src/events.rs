//! Event types for ward observability
//!
//! Events are broadcast to any subscriber of a resilience context. Delivery is
//! best-effort: slow subscribers lag and drop events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CircuitState, ErrorId, ErrorKind, HealthStatus, Severity};

/// Resilience activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ResilienceEvent {
    /// A signal was folded into the ledger.
    ErrorRecorded {
        id: ErrorId,
        kind: ErrorKind,
        severity: Severity,
        source: String,
        occurrences: u64,
    },

    /// A kind crossed its per-window threshold.
    ThresholdBreached {
        kind: ErrorKind,
        count: u64,
        threshold: u32,
    },

    /// A breaker changed state.
    BreakerTransition {
        name: String,
        from: CircuitState,
        to: CircuitState,
        at: DateTime<Utc>,
    },

    /// Derived health status changed between polls.
    HealthChanged {
        old_status: HealthStatus,
        new_status: HealthStatus,
        at: DateTime<Utc>,
    },

    /// A ledger entry was handed to mitigation.
    MitigationApplied {
        id: ErrorId,
        kind: ErrorKind,
        hook_invoked: bool,
    },

    /// A ledger entry was resolved.
    ErrorResolved { id: ErrorId },
}
