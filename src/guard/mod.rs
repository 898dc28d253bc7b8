// SPDX-License-Identifier: MIT
//! Revenue guard reconciliation loop.
//!
//! After every ledger change the guard service is asked "given these
//! positions, what is plausibly missing?".  The check runs in the
//! background and never blocks the mutation that triggered it; the ledger's
//! watch channel coalesces bursts so only the newest state gets checked.
//!
//! A check result is only as good as the snapshot it saw.  Results for a
//! snapshot the ledger has since left behind are discarded; a fresh check
//! is already queued at that point.  When the service is unreachable the
//! published verdict becomes "unknown", never a stale or invented "passed".

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::events::{EventBus, OfferEvent};
use crate::ledger::{LedgerSnapshot, PositionLedger};
use crate::services::{ExtractionService, GuardResult, GuardService, GuardSuggestion};

pub mod resolve;

// ─── Guard context ────────────────────────────────────────────────────────────

/// Shared free-form context handed to the guard service alongside the
/// positions, typically the wizard's partial answers.  Writers replace it
/// wholesale; `None` means "no context available".
#[derive(Clone, Default)]
pub struct GuardContext {
    slot: Arc<RwLock<Option<Value>>>,
}

impl GuardContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, context: Value) {
        *self.slot.write().expect("context lock poisoned") = Some(context);
    }

    pub fn clear(&self) {
        *self.slot.write().expect("context lock poisoned") = None;
    }

    pub fn get(&self) -> Option<Value> {
        self.slot.read().expect("context lock poisoned").clone()
    }
}

// ─── Status ───────────────────────────────────────────────────────────────────

/// Latest published guard verdict.
///
/// `result: None` means unknown; hosts render no warnings for it.  The
/// generation records which ledger state the verdict belongs to.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardStatus {
    pub result: Option<GuardResult>,
    pub checked_generation: Option<u64>,
    pub checked_at: Option<DateTime<Utc>>,
}

// ─── Guard loop ───────────────────────────────────────────────────────────────

/// Owns the recheck cycle and the accept entry point.
pub struct GuardLoop {
    guard: Arc<dyn GuardService>,
    extraction: Arc<dyn ExtractionService>,
    ledger: Arc<PositionLedger>,
    context: GuardContext,
    events: EventBus,
    status: RwLock<GuardStatus>,
    /// Serializes accepts.  One accept is exactly one append; a second
    /// accept while one is resolving gets `Busy` instead of a queue slot.
    accept_lock: Mutex<()>,
}

impl GuardLoop {
    pub fn new(
        guard: Arc<dyn GuardService>,
        extraction: Arc<dyn ExtractionService>,
        ledger: Arc<PositionLedger>,
        context: GuardContext,
        events: EventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            guard,
            extraction,
            ledger,
            context,
            events,
            status: RwLock::new(GuardStatus::default()),
            accept_lock: Mutex::new(()),
        })
    }

    /// Spawn the background recheck task.  It wakes on every ledger change
    /// and exits when the ledger is dropped.
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        let mut changes = this.ledger.subscribe_changes();
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                this.run_check().await;
            }
            debug!("ledger gone — guard loop exiting");
        })
    }

    /// Latest published verdict.
    pub fn status(&self) -> GuardStatus {
        self.status.read().expect("status lock poisoned").clone()
    }

    /// Run one check cycle right now and return the published status.
    /// Hosts use this when `auto_recheck` is off or for an explicit
    /// "check again" button.
    pub async fn recheck_now(&self) -> GuardStatus {
        self.run_check().await;
        self.status()
    }

    /// Accept one guard suggestion into the ledger.
    ///
    /// Resolves the suggestion to a priced position (zero-priced fallback on
    /// resolution failure) and appends it exactly once.  The append itself
    /// queues the follow-up recheck; on the happy path that recheck no
    /// longer flags the accepted item, but callers must tolerate it being
    /// flagged again.
    pub async fn accept(&self, suggestion: &GuardSuggestion) -> Result<LedgerSnapshot, CoreError> {
        let _accepting = self.accept_lock.try_lock().map_err(|_| CoreError::Busy)?;
        let position =
            resolve::resolve_suggestion(self.extraction.as_ref(), suggestion, &self.events).await;
        let snapshot = self.ledger.append(position);
        info!(
            suggestion = %suggestion.id,
            nr = snapshot.positions.len(),
            "guard suggestion accepted"
        );
        Ok(snapshot)
    }

    /// One check cycle: snapshot, short-circuit or call out, publish.
    async fn run_check(&self) {
        let snapshot = self.ledger.snapshot();
        if snapshot.positions.is_empty() {
            // Nothing to guard; no rules consulted, no service call made.
            self.store(Some(GuardResult::empty_pass()), snapshot.generation);
            return;
        }
        let context = self.context.get();
        match self
            .guard
            .check(&snapshot.positions, context.as_ref())
            .await
        {
            Ok(result) => {
                debug!(
                    passed = result.passed,
                    missing = result.missing.len(),
                    generation = snapshot.generation,
                    "guard check completed"
                );
                self.store(Some(result), snapshot.generation);
            }
            Err(err) => {
                warn!(error = %err, "guard check failed — verdict is unknown");
                self.store(None, snapshot.generation);
            }
        }
    }

    /// Publish a verdict, unless the ledger has moved on since the snapshot
    /// it was computed for.
    fn store(&self, result: Option<GuardResult>, generation: u64) {
        if self.ledger.generation() != generation {
            debug!(
                generation,
                current = self.ledger.generation(),
                "discarding stale guard verdict"
            );
            return;
        }
        {
            let mut status = self.status.write().expect("status lock poisoned");
            status.result = result.clone();
            status.checked_generation = Some(generation);
            status.checked_at = Some(Utc::now());
        }
        self.events.emit(OfferEvent::GuardResultChanged { result });
    }
}
