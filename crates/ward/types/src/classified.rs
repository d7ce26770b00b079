//! Failure taxonomy and ledger entry types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::ErrorId;

/// Closed taxonomy of failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Recoverable I/O failure (timeouts, bad responses). Retry-eligible.
    TransientIo,
    /// Environment instability such as repeated reloads.
    ReloadStorm,
    /// Logic bug signature: an update loop that never settles.
    RunawayUpdate,
    /// Broken invariant, including breaker-open and threshold escalations.
    InvariantViolation,
    /// Memory or CPU exhaustion.
    ResourcePressure,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 5] = [
        ErrorKind::TransientIo,
        ErrorKind::ReloadStorm,
        ErrorKind::RunawayUpdate,
        ErrorKind::InvariantViolation,
        ErrorKind::ResourcePressure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransientIo => "transient-io",
            ErrorKind::ReloadStorm => "reload-storm",
            ErrorKind::RunawayUpdate => "runaway-update",
            ErrorKind::InvariantViolation => "invariant-violation",
            ErrorKind::ResourcePressure => "resource-pressure",
        }
    }

    /// Whether retrying the failed operation can reasonably succeed.
    pub fn is_retry_eligible(&self) -> bool {
        matches!(self, ErrorKind::TransientIo)
    }

    /// Mitigation a host is expected to wire up for this kind.
    pub fn recommended_mitigation(&self) -> &'static str {
        match self {
            ErrorKind::TransientIo => "retry with backoff",
            ErrorKind::ReloadStorm => "schedule a reload cooldown",
            ErrorKind::RunawayUpdate => "open circuit and alert",
            ErrorKind::InvariantViolation => "alert operators",
            ErrorKind::ResourcePressure => "request garbage collection",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unknown kind name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown error kind: {0}")]
pub struct ParseKindError(pub String);

impl FromStr for ErrorKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ParseKindError(s.to_string()))
    }
}

/// Severity of a classified error.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Output of classification, before the ledger assigns identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedErrorDraft {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub source: String,
    pub message: String,
    pub detail: Option<serde_json::Value>,
}

impl ClassifiedErrorDraft {
    pub fn new(
        kind: ErrorKind,
        severity: Severity,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            severity,
            source: source.into(),
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// A deduplicated ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedError {
    /// Identity, stable while the entry is live.
    pub id: ErrorId,

    /// Failure kind.
    pub kind: ErrorKind,

    /// Highest severity observed for this entry.
    pub severity: Severity,

    /// Originating component or operation.
    pub source: String,

    /// Human-readable detail.
    pub message: String,

    /// Optional structured payload (stack, URL, counters).
    pub detail: Option<serde_json::Value>,

    /// When the entry was created.
    pub first_seen: DateTime<Utc>,

    /// When the entry was last matched.
    pub last_seen: DateTime<Utc>,

    /// Number of identical signals folded into this entry.
    pub occurrences: u64,

    /// Set by explicit resolution.
    pub resolved: bool,

    /// When the entry was resolved.
    pub resolved_at: Option<DateTime<Utc>>,

    /// Set once a mitigation has been dispatched for this entry.
    pub mitigation_applied: bool,
}

impl ClassifiedError {
    /// Materialise a draft as a fresh entry.
    pub fn from_draft(draft: ClassifiedErrorDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: ErrorId::generate(),
            kind: draft.kind,
            severity: draft.severity,
            source: draft.source,
            message: draft.message,
            detail: draft.detail,
            first_seen: now,
            last_seen: now,
            occurrences: 1,
            resolved: false,
            resolved_at: None,
            mitigation_applied: false,
        }
    }

    /// Whether a draft describes the same failure as this entry.
    pub fn matches(&self, draft: &ClassifiedErrorDraft) -> bool {
        self.kind == draft.kind && self.source == draft.source && self.message == draft.message
    }

    /// Entries awaiting mitigation.
    pub fn needs_mitigation(&self) -> bool {
        !self.resolved && !self.mitigation_applied
    }
}
