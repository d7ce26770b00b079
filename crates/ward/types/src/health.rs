//! Health snapshot types
//!
//! A snapshot is an immutable value: it is produced fresh on every poll and
//! never updated in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{CircuitBreakerStats, ErrorKind};

/// Overall system status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

impl HealthStatus {
    /// Derive status from counts. First matching rule wins:
    ///
    /// 1. critical if the error rate reaches `critical_rate` or any breaker is open
    /// 2. degraded if the error rate reaches `degraded_rate` or any breaker is half-open
    /// 3. healthy otherwise
    pub fn derive(
        error_rate: usize,
        open_circuits: usize,
        half_open_circuits: usize,
        degraded_rate: usize,
        critical_rate: usize,
    ) -> Self {
        if error_rate >= critical_rate || open_circuits > 0 {
            HealthStatus::Critical
        } else if error_rate >= degraded_rate || half_open_circuits > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Critical => write!(f, "critical"),
        }
    }
}

/// Single health summary of the whole system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Derived status.
    pub status: HealthStatus,

    /// Ledger entries seen within the last minute.
    pub error_rate_last_minute: usize,

    /// Breakers currently open.
    pub open_circuits: usize,

    /// Breakers currently half-open.
    pub half_open_circuits: usize,

    /// Breakers currently closed.
    pub closed_circuits: usize,

    /// Entries per kind within the last minute.
    pub by_kind: BTreeMap<ErrorKind, usize>,

    /// Per-breaker detail.
    pub breakers: Vec<CircuitBreakerStats>,

    /// When the snapshot was produced.
    pub generated_at: DateTime<Utc>,
}

/// Aggregate view of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    /// Entries held by the ledger, resolved or not.
    pub total: usize,

    /// Entries seen within the summary window.
    pub recent_count: usize,

    /// Recent entries per kind.
    pub by_kind: BTreeMap<ErrorKind, usize>,

    /// Unresolved entries with critical severity.
    pub critical_count: usize,
}
