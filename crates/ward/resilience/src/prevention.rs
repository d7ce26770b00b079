//! Mitigation dispatch.
//!
//! Each tick claims every unresolved, unmitigated ledger entry and hands it to
//! the host's hook for its kind. An entry is dispatched at most once.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument};
use ward_types::{ClassifiedError, ErrorKind, ResilienceEvent};

use crate::ledger::ErrorLedger;

/// Host-supplied mitigation for one error kind.
///
/// Hooks run on the scheduler task: they must be quick and idempotent.
pub trait MitigationHook: Send + Sync {
    fn mitigate(&self, error: &ClassifiedError);
}

impl<F> MitigationHook for F
where
    F: Fn(&ClassifiedError) + Send + Sync,
{
    fn mitigate(&self, error: &ClassifiedError) {
        self(error)
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreventionReport {
    /// Entries claimed from the ledger.
    pub claimed: usize,
    /// Hooks that ran to completion.
    pub hooks_invoked: usize,
    /// Entries whose kind has no hook.
    pub unmapped: usize,
    /// Hooks that panicked.
    pub hooks_failed: usize,
}

/// Dispatches mitigation hooks for new ledger entries.
pub struct PreventionDispatcher {
    ledger: Arc<ErrorLedger>,
    hooks: RwLock<HashMap<ErrorKind, Arc<dyn MitigationHook>>>,
    event_tx: Option<broadcast::Sender<ResilienceEvent>>,
}

impl PreventionDispatcher {
    pub(crate) fn new(
        ledger: Arc<ErrorLedger>,
        event_tx: Option<broadcast::Sender<ResilienceEvent>>,
    ) -> Self {
        Self {
            ledger,
            hooks: RwLock::new(HashMap::new()),
            event_tx,
        }
    }

    /// Register the hook for `kind`, replacing any previous one.
    pub fn register(&self, kind: ErrorKind, hook: Arc<dyn MitigationHook>) {
        debug!(kind = %kind, "Registered mitigation hook");
        self.hooks.write().insert(kind, hook);
    }

    /// Whether a hook is registered for `kind`.
    pub fn has_hook(&self, kind: ErrorKind) -> bool {
        self.hooks.read().contains_key(&kind)
    }

    /// Dispatch hooks for every entry awaiting mitigation.
    #[instrument(skip(self))]
    pub fn tick(&self) -> PreventionReport {
        let claimed = self.ledger.claim_unmitigated();
        let mut report = PreventionReport {
            claimed: claimed.len(),
            ..Default::default()
        };
        if claimed.is_empty() {
            return report;
        }

        // Snapshot the hooks so none run under the lock.
        let hooks = self.hooks.read().clone();

        for entry in &claimed {
            let invoked = match hooks.get(&entry.kind) {
                Some(hook) => {
                    match catch_unwind(AssertUnwindSafe(|| hook.mitigate(entry))) {
                        Ok(()) => {
                            report.hooks_invoked += 1;
                            debug!(id = %entry.id, kind = %entry.kind, "Mitigation hook invoked");
                            true
                        }
                        Err(_) => {
                            report.hooks_failed += 1;
                            error!(id = %entry.id, kind = %entry.kind, "Mitigation hook panicked");
                            false
                        }
                    }
                }
                None => {
                    report.unmapped += 1;
                    info!(
                        id = %entry.id,
                        kind = %entry.kind,
                        source = %entry.source,
                        recommended = entry.kind.recommended_mitigation(),
                        "No mitigation hook registered"
                    );
                    false
                }
            };

            if let Some(tx) = &self.event_tx {
                let _ = tx.send(ResilienceEvent::MitigationApplied {
                    id: entry.id,
                    kind: entry.kind,
                    hook_invoked: invoked,
                });
            }
        }

        report
    }
}
