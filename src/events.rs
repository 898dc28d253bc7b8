//! Typed event bus between the offer core and its host UI.
//!
//! Every observable state change is published here exactly once.  Hosts
//! subscribe and re-render; slow or absent subscribers never block the core
//! (tokio broadcast drops the oldest events on lag).

use serde::Serialize;
use tokio::sync::broadcast;

use crate::ledger::OfferTotals;
use crate::services::{GuardResult, Suggestion};

/// Where a wholesale ledger replacement came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MaterializeSource {
    Chat,
    Wizard,
}

/// State-change notifications emitted by the core.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum OfferEvent {
    /// The wizard moved to a new step (or reached done/finalized).
    WizardStepChanged { step: Option<String>, done: bool },
    /// Preview lines replaced.  An empty list means the preview was cleared;
    /// stale previews are never left standing.
    PreviewChanged { suggestions: Vec<Suggestion> },
    /// Ledger content changed; `generation` increases on every mutation.
    PositionsChanged { generation: u64, count: usize },
    /// Totals recomputed after a ledger mutation.
    TotalsChanged { totals: OfferTotals },
    /// New guard verdict published.  `None` means unknown: the guard service
    /// was unreachable and the previous verdict no longer applies.
    GuardResultChanged { result: Option<GuardResult> },
    /// Extraction or catalog lookup failed for one position; a zero-priced
    /// placeholder was inserted instead.  Non-blocking notice for the host.
    ResolutionNotice { name: String, detail: String },
    /// A confirmed chat exchange or finalized wizard run replaced the ledger.
    OfferMaterialized {
        source: MaterializeSource,
        count: usize,
    },
    /// The draft was cleared by an explicit new-offer action.
    OfferCleared,
}

/// Broadcasts [`OfferEvent`]s to all connected host views.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OfferEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<OfferEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers.
    pub fn emit(&self, event: OfferEvent) {
        // Ignore errors; no subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
