//! Rule-based failure classification.
//!
//! Normalises heterogeneous signals into the fixed [`ErrorKind`] taxonomy.
//! Classification is pure and total: malformed input is itself classified
//! rather than rejected, so reporting a failure can never fail the caller.

use std::fmt::Display;

use serde_json::{json, Value};
use ward_types::{ClassifiedErrorDraft, ErrorKind, RawSignal, Severity, SignalPayload};

/// Source used when neither the signal nor its text names one.
const UNKNOWN_SOURCE: &str = "unknown";

/// Source attributed to memory readings without an explicit reporter.
const MEMORY_SOURCE: &str = "memory-monitor";

/// Memory usage at or above this percentage is resource pressure.
pub const MEMORY_PRESSURE_PERCENT: f64 = 70.0;

/// A case-insensitive substring rule.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationRule {
    pub kind: ErrorKind,
    pub severity: Severity,
    patterns: Vec<String>,
}

impl ClassificationRule {
    pub fn new<I, S>(kind: ErrorKind, severity: Severity, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            kind,
            severity,
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().to_lowercase())
                .collect(),
        }
    }

    fn matches(&self, lowered: &str) -> bool {
        self.patterns.iter().any(|p| lowered.contains(p.as_str()))
    }
}

/// Built-in rules, checked in order after any custom rules.
fn builtin_rules() -> Vec<ClassificationRule> {
    vec![
        ClassificationRule::new(
            ErrorKind::RunawayUpdate,
            Severity::High,
            [
                "maximum update depth exceeded",
                "too many re-renders",
                "infinite update loop",
                "maximum call stack size exceeded",
            ],
        ),
        ClassificationRule::new(
            ErrorKind::ResourcePressure,
            Severity::High,
            [
                "out of memory",
                "heap out of memory",
                "memory limit exceeded",
                "allocation failed",
                "cpu throttled",
            ],
        ),
        ClassificationRule::new(
            ErrorKind::ReloadStorm,
            Severity::Medium,
            [
                "hot reload",
                "full reload",
                "fast refresh",
                "[hmr]",
                "reload loop",
            ],
        ),
        ClassificationRule::new(
            ErrorKind::InvariantViolation,
            Severity::High,
            [
                "invariant violation",
                "invariant failed",
                "assertion failed",
                "panicked at",
                "entered unreachable code",
            ],
        ),
        ClassificationRule::new(
            ErrorKind::TransientIo,
            Severity::Medium,
            [
                "timed out",
                "timeout",
                "failed to fetch",
                "network error",
                "networkerror",
                "connection refused",
                "connection reset",
                "econnrefused",
                "econnreset",
                "chunkloaderror",
                "loading chunk",
            ],
        ),
    ]
}

/// Classifies raw signals.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    custom_rules: Vec<ClassificationRule>,
    builtin_rules: Vec<ClassificationRule>,
    max_message_len: usize,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(512)
    }
}

impl ErrorClassifier {
    /// Create a classifier that truncates messages to `max_message_len` chars.
    pub fn new(max_message_len: usize) -> Self {
        Self {
            custom_rules: Vec::new(),
            builtin_rules: builtin_rules(),
            max_message_len: max_message_len.max(1),
        }
    }

    /// Add a rule checked before the built-ins. Custom rules keep insertion order.
    pub fn with_rule(mut self, rule: ClassificationRule) -> Self {
        self.custom_rules.push(rule);
        self
    }

    /// Classify a raw signal.
    pub fn classify(&self, signal: &RawSignal) -> ClassifiedErrorDraft {
        let explicit = signal
            .source
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        match &signal.payload {
            SignalPayload::Text { text } => self.classify_text(explicit, text, None),
            SignalPayload::HttpFailure { status, url } => {
                let message = format!("{} for {}", status, url);
                let source = explicit.unwrap_or(url.as_str());
                let detail = json!({ "status": status, "url": url });
                self.draft(
                    ErrorKind::TransientIo,
                    status_severity(*status),
                    source,
                    &message,
                    Some(detail),
                )
            }
            SignalPayload::Timeout {
                operation,
                elapsed_ms,
            } => {
                let message = format!("{} timed out", operation);
                let source = explicit.unwrap_or(operation.as_str());
                let detail = json!({ "elapsed_ms": elapsed_ms });
                self.draft(
                    ErrorKind::TransientIo,
                    Severity::Medium,
                    source,
                    &message,
                    Some(detail),
                )
            }
            SignalPayload::MemoryUsage { used_percent } => {
                self.classify_memory(explicit, *used_percent)
            }
            SignalPayload::Json { value } => self.classify_json(explicit, value),
        }
    }

    /// Whether a signal reports a healthy reading rather than a failure.
    ///
    /// Only in-range memory readings below [`MEMORY_PRESSURE_PERCENT`] are
    /// nominal; malformed readings are still failures.
    pub fn is_nominal(&self, signal: &RawSignal) -> bool {
        match signal.payload {
            SignalPayload::MemoryUsage { used_percent } => {
                (0.0..MEMORY_PRESSURE_PERCENT).contains(&used_percent)
            }
            _ => false,
        }
    }

    /// Classify the failure of a protected operation. The operation name is
    /// always the source.
    pub fn classify_failure(&self, operation: &str, error: &dyn Display) -> ClassifiedErrorDraft {
        self.classify_text(Some(operation), &error.to_string(), None)
    }

    fn classify_text(
        &self,
        explicit: Option<&str>,
        text: &str,
        detail: Option<Value>,
    ) -> ClassifiedErrorDraft {
        let text = text.trim();
        if text.is_empty() {
            return self.malformed(explicit, "empty text", detail);
        }

        let lowered = text.to_lowercase();
        let source = explicit
            .map(str::to_string)
            .or_else(|| extract_location(text))
            .unwrap_or_else(|| UNKNOWN_SOURCE.to_string());

        let (kind, severity) = self
            .custom_rules
            .iter()
            .find(|rule| rule.matches(&lowered))
            .or_else(|| {
                self.builtin_rules
                    .iter()
                    .take_while(|rule| rule.kind != ErrorKind::TransientIo)
                    .find(|rule| rule.matches(&lowered))
            })
            .map(|rule| (rule.kind, rule.severity))
            .or_else(|| {
                http_status_in(text).map(|status| (ErrorKind::TransientIo, status_severity(status)))
            })
            .or_else(|| {
                self.builtin_rules
                    .iter()
                    .find(|rule| rule.matches(&lowered))
                    .map(|rule| (rule.kind, rule.severity))
            })
            .unwrap_or((ErrorKind::TransientIo, Severity::Low));

        self.draft(kind, severity, &source, text, detail)
    }

    fn classify_memory(&self, explicit: Option<&str>, used_percent: f64) -> ClassifiedErrorDraft {
        if !used_percent.is_finite() || !(0.0..=100.0).contains(&used_percent) {
            return self.malformed(
                explicit,
                "memory usage out of range",
                Some(json!({ "used_percent": used_percent.to_string() })),
            );
        }

        // Bucketed so that readings in the same band deduplicate.
        let (severity, band) = match used_percent {
            p if p >= 95.0 => (Severity::Critical, 95),
            p if p >= 85.0 => (Severity::High, 85),
            p if p >= MEMORY_PRESSURE_PERCENT => (Severity::Medium, 70),
            _ => (Severity::Low, 0),
        };
        let message = if band == 0 {
            "memory usage nominal".to_string()
        } else {
            format!("memory usage above {}%", band)
        };

        self.draft(
            ErrorKind::ResourcePressure,
            severity,
            explicit.unwrap_or(MEMORY_SOURCE),
            &message,
            Some(json!({ "used_percent": used_percent })),
        )
    }

    fn classify_json(&self, explicit: Option<&str>, value: &Value) -> ClassifiedErrorDraft {
        match value {
            Value::String(text) => self.classify_text(explicit, text, None),
            Value::Object(map) => match map.get("message").and_then(Value::as_str) {
                Some(text) => {
                    let source = explicit.or_else(|| map.get("source").and_then(Value::as_str));
                    self.classify_text(source, text, Some(value.clone()))
                }
                None => self.malformed(explicit, "object without message", Some(value.clone())),
            },
            Value::Null => self.malformed(explicit, "null", None),
            other => self.malformed(explicit, json_type_name(other), Some(other.clone())),
        }
    }

    fn malformed(
        &self,
        explicit: Option<&str>,
        what: &str,
        detail: Option<Value>,
    ) -> ClassifiedErrorDraft {
        self.draft(
            ErrorKind::InvariantViolation,
            Severity::Medium,
            explicit.unwrap_or("classifier"),
            &format!("malformed signal: {}", what),
            detail,
        )
    }

    fn draft(
        &self,
        kind: ErrorKind,
        severity: Severity,
        source: &str,
        message: &str,
        detail: Option<Value>,
    ) -> ClassifiedErrorDraft {
        ClassifiedErrorDraft {
            kind,
            severity,
            source: source.to_string(),
            message: truncate(message, self.max_message_len),
            detail,
        }
    }
}

fn status_severity(status: u16) -> Severity {
    match status {
        429 | 500..=599 => Severity::Medium,
        _ => Severity::Low,
    }
}

/// First standalone three-digit token in the 400..=599 range.
fn http_status_in(text: &str) -> Option<u16> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| token.len() == 3 && token.bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|token| token.parse::<u16>().ok())
        .find(|status| (400..=599).contains(status))
}

/// First path or URL mentioned in the text.
fn extract_location(text: &str) -> Option<String> {
    text.split_whitespace()
        .map(|token| token.trim_matches(|c: char| matches!(c, '"' | '\'' | ',' | ';' | ')' | '(')))
        .find(|token| {
            (token.starts_with('/') && token.len() > 1)
                || token.starts_with("http://")
                || token.starts_with("https://")
        })
        .map(str::to_string)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn truncate(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((idx, _)) => message[..idx].to_string(),
        None => message.to_string(),
    }
}
