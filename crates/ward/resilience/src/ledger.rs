//! Deduplicating error ledger.
//!
//! The ledger exclusively owns [`ClassifiedError`] entries. Identical signals
//! (same kind, source and message) fold into a single live entry; threshold
//! breaches are derived from the ledger contents rather than stored in it.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use ward_types::{
    ClassifiedError, ClassifiedErrorDraft, ErrorId, ErrorKind, ErrorSummary, ResilienceEvent,
    Severity,
};

use crate::clock::{window_start, Clock};
use crate::error::{ResilienceError, ResilienceResult};

/// Source prefix of synthetic threshold-breach entries.
pub const THRESHOLD_SOURCE_PREFIX: &str = "threshold:";

/// Occurrence timestamps kept per entry for windowed counting.
const MAX_HITS_PER_ENTRY: usize = 1024;

type DedupKey = (ErrorKind, String, String);

struct LedgerEntry {
    error: ClassifiedError,
    hits: VecDeque<DateTime<Utc>>,
}

impl LedgerEntry {
    fn hit(&mut self, at: DateTime<Utc>) {
        if self.hits.len() == MAX_HITS_PER_ENTRY {
            self.hits.pop_front();
        }
        self.hits.push_back(at);
    }

    fn hits_since(&self, since: DateTime<Utc>) -> u64 {
        self.hits.iter().rev().take_while(|at| **at >= since).count() as u64
    }

    fn is_synthetic(&self) -> bool {
        self.error.source.starts_with(THRESHOLD_SOURCE_PREFIX)
    }
}

/// Thresholds checked after every recorded failure.
struct Escalation {
    thresholds: BTreeMap<ErrorKind, u32>,
    window: Duration,
}

#[derive(Default)]
struct LedgerState {
    entries: HashMap<ErrorId, LedgerEntry>,
    live: HashMap<DedupKey, ErrorId>,
}

/// Process-wide store of classified errors.
pub struct ErrorLedger {
    state: RwLock<LedgerState>,
    clock: Arc<dyn Clock>,
    event_tx: Option<broadcast::Sender<ResilienceEvent>>,
    escalation: Option<Escalation>,
}

impl ErrorLedger {
    /// Create an empty ledger.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            clock,
            event_tx: None,
            escalation: None,
        }
    }

    /// Publish ledger activity on an event channel.
    pub fn with_events(mut self, event_tx: broadcast::Sender<ResilienceEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Escalate threshold breaches on every record.
    ///
    /// Whatever records a failure (signal ingestion, a breaker, the retry
    /// executor) then triggers the same escalation check.
    pub fn with_escalation(
        mut self,
        thresholds: BTreeMap<ErrorKind, u32>,
        window: Duration,
    ) -> Self {
        self.escalation = Some(Escalation { thresholds, window });
        self
    }

    /// Fold a draft into the ledger.
    ///
    /// A matching live entry has its occurrence count incremented and
    /// `last_seen` refreshed; otherwise a new entry is created. With
    /// escalation configured, breaches are escalated afterwards.
    pub fn record(&self, draft: ClassifiedErrorDraft) -> ClassifiedError {
        let now = self.clock.now();
        let key: DedupKey = (draft.kind, draft.source.clone(), draft.message.clone());

        let recorded = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let existing = state.live.get(&key).copied();

            match existing.and_then(|id| state.entries.get_mut(&id)) {
                Some(entry) => {
                    entry.error.occurrences += 1;
                    entry.error.last_seen = now;
                    entry.error.severity = entry.error.severity.max(draft.severity);
                    if draft.detail.is_some() {
                        entry.error.detail = draft.detail;
                    }
                    entry.hit(now);
                    entry.error.clone()
                }
                None => {
                    let error = ClassifiedError::from_draft(draft, now);
                    let mut entry = LedgerEntry {
                        error: error.clone(),
                        hits: VecDeque::new(),
                    };
                    entry.hit(now);
                    state.live.insert(key, error.id);
                    state.entries.insert(error.id, entry);
                    debug!(
                        id = %error.id,
                        kind = %error.kind,
                        severity = %error.severity,
                        source = %error.source,
                        "Recorded new error"
                    );
                    error
                }
            }
        };

        self.emit(ResilienceEvent::ErrorRecorded {
            id: recorded.id,
            kind: recorded.kind,
            severity: recorded.severity,
            source: recorded.source.clone(),
            occurrences: recorded.occurrences,
        });

        // Synthetic entries never trigger escalation themselves
        if let Some(escalation) = &self.escalation {
            if !recorded.source.starts_with(THRESHOLD_SOURCE_PREFIX) {
                self.escalate_breaches(&escalation.thresholds, escalation.window);
            }
        }

        recorded
    }

    /// Look up an entry.
    pub fn get(&self, id: &ErrorId) -> Option<ClassifiedError> {
        self.state.read().entries.get(id).map(|e| e.error.clone())
    }

    /// Entries seen within `duration`, most recent first.
    pub fn window(&self, duration: Duration) -> Vec<ClassifiedError> {
        let since = window_start(self.clock.now(), duration);
        let state = self.state.read();

        let mut recent: Vec<ClassifiedError> = state
            .entries
            .values()
            .filter(|e| e.error.last_seen >= since)
            .map(|e| e.error.clone())
            .collect();
        recent.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        recent
    }

    /// Number of entries per kind seen within `duration`.
    pub fn count_by_kind(&self, duration: Duration) -> BTreeMap<ErrorKind, usize> {
        let mut counts = BTreeMap::new();
        for error in self.window(duration) {
            *counts.entry(error.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Occurrences per kind within `duration`, ignoring synthetic
    /// threshold-breach entries.
    pub fn occurrences_by_kind(&self, duration: Duration) -> BTreeMap<ErrorKind, u64> {
        let since = window_start(self.clock.now(), duration);
        let state = self.state.read();

        let mut counts = BTreeMap::new();
        for entry in state.entries.values().filter(|e| !e.is_synthetic()) {
            let hits = entry.hits_since(since);
            if hits > 0 {
                *counts.entry(entry.error.kind).or_insert(0) += hits;
            }
        }
        counts
    }

    /// Kinds whose occurrences within `window` reach their threshold.
    pub fn check_thresholds(
        &self,
        thresholds: &BTreeMap<ErrorKind, u32>,
        window: Duration,
    ) -> Vec<ErrorKind> {
        self.breaches(thresholds, window)
            .into_iter()
            .map(|(kind, _, _)| kind)
            .collect()
    }

    /// Record a synthetic critical entry for every breached kind.
    ///
    /// Returns the synthetic entries.
    pub fn escalate_breaches(
        &self,
        thresholds: &BTreeMap<ErrorKind, u32>,
        window: Duration,
    ) -> Vec<ClassifiedError> {
        self.breaches(thresholds, window)
            .into_iter()
            .map(|(kind, count, threshold)| {
                warn!(
                    kind = %kind,
                    count = count,
                    threshold = threshold,
                    window_ms = window.as_millis() as u64,
                    "Error threshold breached"
                );
                self.emit(ResilienceEvent::ThresholdBreached {
                    kind,
                    count,
                    threshold,
                });

                let draft = ClassifiedErrorDraft::new(
                    ErrorKind::InvariantViolation,
                    Severity::Critical,
                    format!("{}{}", THRESHOLD_SOURCE_PREFIX, kind),
                    format!("{} threshold of {} breached", kind, threshold),
                )
                .with_detail(serde_json::json!({
                    "count": count,
                    "threshold": threshold,
                    "window_ms": window.as_millis() as u64,
                }));
                self.record(draft)
            })
            .collect()
    }

    fn breaches(
        &self,
        thresholds: &BTreeMap<ErrorKind, u32>,
        window: Duration,
    ) -> Vec<(ErrorKind, u64, u32)> {
        let counts = self.occurrences_by_kind(window);
        thresholds
            .iter()
            .filter_map(|(kind, threshold)| {
                let count = counts.get(kind).copied().unwrap_or(0);
                (count >= u64::from(*threshold)).then_some((*kind, count, *threshold))
            })
            .collect()
    }

    /// Mark an entry resolved. The entry stays inspectable until evicted, and
    /// a later identical signal opens a fresh entry.
    pub fn resolve(&self, id: &ErrorId) -> ResilienceResult<ClassifiedError> {
        let now = self.clock.now();
        let resolved = {
            let mut state = self.state.write();
            let entry = state
                .entries
                .get_mut(id)
                .ok_or(ResilienceError::ErrorNotFound(*id))?;

            if entry.error.resolved {
                return Ok(entry.error.clone());
            }

            entry.error.resolved = true;
            entry.error.resolved_at = Some(now);
            let error = entry.error.clone();
            state
                .live
                .remove(&(error.kind, error.source.clone(), error.message.clone()));
            error
        };

        info!(id = %id, kind = %resolved.kind, source = %resolved.source, "Error resolved");
        self.emit(ResilienceEvent::ErrorResolved { id: *id });

        Ok(resolved)
    }

    /// Remove resolved entries resolved more than `older_than` ago.
    ///
    /// Unresolved entries are never evicted.
    pub fn evict(&self, older_than: Duration) -> usize {
        let horizon = window_start(self.clock.now(), older_than);
        self.remove_resolved(|error| error.resolved_at.is_some_and(|at| at <= horizon))
    }

    /// Remove every resolved entry regardless of age.
    pub fn clear_resolved(&self) -> usize {
        self.remove_resolved(|_| true)
    }

    fn remove_resolved(&self, predicate: impl Fn(&ClassifiedError) -> bool) -> usize {
        let mut state = self.state.write();
        let before = state.entries.len();
        state
            .entries
            .retain(|_, entry| !(entry.error.resolved && predicate(&entry.error)));
        let removed = before - state.entries.len();

        if removed > 0 {
            debug!(removed = removed, "Evicted resolved errors");
        }
        removed
    }

    /// Atomically claim every unresolved entry not yet mitigated.
    ///
    /// Claimed entries are flagged `mitigation_applied` before this returns,
    /// so each entry is handed out at most once.
    pub fn claim_unmitigated(&self) -> Vec<ClassifiedError> {
        let mut state = self.state.write();
        let mut claimed: Vec<ClassifiedError> = state
            .entries
            .values_mut()
            .filter(|e| e.error.needs_mitigation())
            .map(|e| {
                e.error.mitigation_applied = true;
                e.error.clone()
            })
            .collect();
        claimed.sort_by(|a, b| a.first_seen.cmp(&b.first_seen));
        claimed
    }

    /// Aggregate view over the ledger.
    pub fn summary(&self, window: Duration) -> ErrorSummary {
        let recent = self.window(window);
        let state = self.state.read();

        let mut by_kind = BTreeMap::new();
        for error in &recent {
            *by_kind.entry(error.kind).or_insert(0) += 1;
        }

        ErrorSummary {
            total: state.entries.len(),
            recent_count: recent.len(),
            by_kind,
            critical_count: state
                .entries
                .values()
                .filter(|e| !e.error.resolved && e.error.severity == Severity::Critical)
                .count(),
        }
    }

    /// Every entry, most recent first.
    pub fn all(&self) -> Vec<ClassifiedError> {
        let mut all: Vec<ClassifiedError> = self
            .state
            .read()
            .entries
            .values()
            .map(|e| e.error.clone())
            .collect();
        all.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        all
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn emit(&self, event: ResilienceEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}
