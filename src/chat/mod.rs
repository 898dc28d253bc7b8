//! Chat-driven offer materialization.
//!
//! The host feeds every chat exchange through [`ChatFlow::on_reply`].  Most
//! exchanges are just conversation; once one is detected as a confirmation,
//! the accumulated transcript is sent to the extraction service and the
//! returned positions replace the ledger wholesale.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::events::{EventBus, MaterializeSource, OfferEvent};
use crate::guard::GuardContext;
use crate::ledger::PositionLedger;
use crate::services::ExtractionService;

pub mod confirm;

/// Transcript lines kept for extraction.  Old turns beyond this are dropped;
/// the agreed quantities are always in the recent tail of the conversation.
const MAX_TRANSCRIPT_LINES: usize = 40;

/// What a single chat exchange led to.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatOutcome {
    /// Ordinary conversation; nothing changed.
    NotConfirmed,
    /// Confirmation detected and the ledger was replaced.
    Materialized { count: usize },
    /// Confirmation detected but extraction found no positions.  The ledger
    /// was left untouched rather than wiped by a false positive.
    NothingExtracted,
    /// Confirmation detected but the extraction service failed.  The ledger
    /// was left untouched; retry by re-sending the confirmation.
    ExtractionFailed { detail: String },
}

/// Drives offer creation from the chat surface.
pub struct ChatFlow {
    extraction: Arc<dyn ExtractionService>,
    ledger: Arc<PositionLedger>,
    guard_context: GuardContext,
    events: EventBus,
    /// Conversation so far.  The lock also serializes materialization, so a
    /// duplicated reply event cannot replace the ledger twice.
    transcript: Mutex<Vec<String>>,
}

impl ChatFlow {
    pub fn new(
        extraction: Arc<dyn ExtractionService>,
        ledger: Arc<PositionLedger>,
        guard_context: GuardContext,
        events: EventBus,
    ) -> Self {
        Self {
            extraction,
            ledger,
            guard_context,
            events,
            transcript: Mutex::new(Vec::new()),
        }
    }

    /// Record one exchange and materialize the offer if it confirms.
    ///
    /// `server_flag` is the backend's own confirmation verdict for this
    /// reply.  Never errors: service failures degrade to an outcome the host
    /// can render.
    pub async fn on_reply(&self, outgoing: &str, reply: &str, server_flag: bool) -> ChatOutcome {
        let mut transcript = self.transcript.lock().await;
        if !outgoing.trim().is_empty() {
            transcript.push(format!("user: {}", outgoing.trim()));
        }
        if !reply.trim().is_empty() {
            transcript.push(format!("assistant: {}", reply.trim()));
        }
        if transcript.len() > MAX_TRANSCRIPT_LINES {
            let excess = transcript.len() - MAX_TRANSCRIPT_LINES;
            transcript.drain(..excess);
        }

        if !confirm::detect(outgoing, reply, server_flag) {
            return ChatOutcome::NotConfirmed;
        }

        let text = transcript.join("\n");
        match self.extraction.extract(&text).await {
            Ok(resp) if resp.positions.is_empty() => {
                warn!("chat confirmed but extraction returned no positions — ledger kept");
                self.events.emit(OfferEvent::ResolutionNotice {
                    name: "chat".to_string(),
                    detail: "no positions could be extracted from the conversation".to_string(),
                });
                ChatOutcome::NothingExtracted
            }
            Ok(resp) => {
                let count = resp.positions.len();
                // A chat offer carries no wizard context; drop any leftover
                // partial answers so the guard judges the chat offer alone.
                self.guard_context.clear();
                let snapshot = self.ledger.replace(resp.positions);
                info!(
                    count,
                    netto = snapshot.totals.netto,
                    "chat confirmation materialized offer"
                );
                self.events.emit(OfferEvent::OfferMaterialized {
                    source: MaterializeSource::Chat,
                    count,
                });
                ChatOutcome::Materialized { count }
            }
            Err(err) => {
                warn!(error = %err, "extraction failed after chat confirmation — ledger kept");
                self.events.emit(OfferEvent::ResolutionNotice {
                    name: "chat".to_string(),
                    detail: err.to_string(),
                });
                ChatOutcome::ExtractionFailed {
                    detail: err.to_string(),
                }
            }
        }
    }

    /// Forget the conversation (new-offer action).
    pub async fn reset(&self) {
        self.transcript.lock().await.clear();
    }

    /// Number of transcript lines currently held.
    pub async fn transcript_len(&self) -> usize {
        self.transcript.lock().await.len()
    }
}
