//! Raw failure signals pushed in by collaborators

use serde::{Deserialize, Serialize};

/// An unstructured failure report.
///
/// Signals are deliberately loose: the classifier has to cope with anything a
/// network layer, renderer or memory monitor decides to send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSignal {
    /// Reporting component, if known.
    pub source: Option<String>,

    /// Signal body.
    pub payload: SignalPayload,
}

/// Body of a raw signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalPayload {
    /// Free-form text such as "404 for /api/x".
    Text { text: String },

    /// An HTTP request that came back with an error status.
    HttpFailure { status: u16, url: String },

    /// An operation that exceeded its deadline.
    Timeout { operation: String, elapsed_ms: u64 },

    /// Memory usage as a percentage of the available budget.
    MemoryUsage { used_percent: f64 },

    /// Arbitrary JSON forwarded verbatim.
    Json { value: serde_json::Value },
}

impl RawSignal {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            source: None,
            payload: SignalPayload::Text { text: text.into() },
        }
    }

    pub fn http_failure(status: u16, url: impl Into<String>) -> Self {
        Self {
            source: None,
            payload: SignalPayload::HttpFailure {
                status,
                url: url.into(),
            },
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            source: None,
            payload: SignalPayload::Timeout {
                operation: operation.into(),
                elapsed_ms,
            },
        }
    }

    pub fn memory_usage(used_percent: f64) -> Self {
        Self {
            source: None,
            payload: SignalPayload::MemoryUsage { used_percent },
        }
    }

    pub fn json(value: serde_json::Value) -> Self {
        Self {
            source: None,
            payload: SignalPayload::Json { value },
        }
    }

    /// Attach the reporting component.
    pub fn from_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}
