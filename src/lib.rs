pub mod chat;
pub mod config;
pub mod error;
pub mod events;
pub mod guard;
pub mod ledger;
pub mod services;
pub mod wizard;

pub use error::{CoreError, ServiceError};

use std::sync::Arc;

use tracing::info;

use chat::ChatFlow;
use config::CoreConfig;
use events::{EventBus, MaterializeSource, OfferEvent};
use guard::{GuardContext, GuardLoop};
use ledger::{LedgerSnapshot, PositionLedger};
use services::http::BackendClient;
use services::{ExtractionService, FinalizeService, GuardService, StepService};
use wizard::WizardController;

/// The four backend seams, injected as trait objects so hosts and tests can
/// substitute any of them.
#[derive(Clone)]
pub struct OfferServices {
    pub steps: Arc<dyn StepService>,
    pub finalizer: Arc<dyn FinalizeService>,
    pub extraction: Arc<dyn ExtractionService>,
    pub guard: Arc<dyn GuardService>,
}

/// Result of materializing a finalized wizard run.
#[derive(Debug, Clone)]
pub struct FinalizedOffer {
    /// Human summary from the finalize service, for display above the list.
    pub summary: String,
    pub snapshot: LedgerSnapshot,
}

/// One offer workspace: ledger, wizard, chat flow and guard loop wired to a
/// single event bus.  Hosts hold one `OfferCore` per open offer draft.
pub struct OfferCore {
    pub config: Arc<CoreConfig>,
    pub events: EventBus,
    pub ledger: Arc<PositionLedger>,
    pub wizard: Arc<WizardController>,
    pub chat: Arc<ChatFlow>,
    pub guard: Arc<GuardLoop>,
    extraction: Arc<dyn ExtractionService>,
    /// Background recheck task, if `guard.auto_recheck` is on.
    guard_task: Option<tokio::task::JoinHandle<()>>,
}

impl OfferCore {
    /// Wire the core from explicit service implementations.
    pub fn new(config: CoreConfig, services: OfferServices) -> Self {
        let config = Arc::new(config);
        let events = EventBus::new();
        let guard_context = GuardContext::new();

        let ledger = Arc::new(PositionLedger::new(config.vat_rate, events.clone()));
        let wizard = Arc::new(WizardController::new(
            Arc::clone(&services.steps),
            Arc::clone(&services.finalizer),
            guard_context.clone(),
            events.clone(),
        ));
        let chat = Arc::new(ChatFlow::new(
            Arc::clone(&services.extraction),
            Arc::clone(&ledger),
            guard_context.clone(),
            events.clone(),
        ));
        let guard = GuardLoop::new(
            Arc::clone(&services.guard),
            Arc::clone(&services.extraction),
            Arc::clone(&ledger),
            guard_context,
            events.clone(),
        );

        let guard_task = if config.guard.auto_recheck {
            Some(guard.spawn())
        } else {
            None
        };

        Self {
            config,
            events,
            ledger,
            wizard,
            chat,
            guard,
            extraction: services.extraction,
            guard_task,
        }
    }

    /// Wire the core against the HTTP backend from `config`.
    pub fn connect(config: CoreConfig) -> Result<Self, ServiceError> {
        let client = Arc::new(BackendClient::new(&config)?);
        let services = OfferServices {
            steps: Arc::clone(&client) as Arc<dyn StepService>,
            finalizer: Arc::clone(&client) as Arc<dyn FinalizeService>,
            extraction: Arc::clone(&client) as Arc<dyn ExtractionService>,
            guard: client as Arc<dyn GuardService>,
        };
        Ok(Self::new(config, services))
    }

    /// Subscribe to all state-change events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<OfferEvent> {
        self.events.subscribe()
    }

    /// Finalize the wizard run and materialize its positions into the
    /// ledger, replacing whatever was there.
    ///
    /// Position names are resolved against the catalog one by one; a failed
    /// resolution degrades that line to a zero-priced position instead of
    /// failing the materialization.
    pub async fn finalize_wizard(&self) -> Result<FinalizedOffer, CoreError> {
        let outcome = self.wizard.finalize().await?;
        let resolved = guard::resolve::resolve_wizard_positions(
            self.extraction.as_ref(),
            &outcome.positions,
            &self.events,
        )
        .await;
        let snapshot = self.ledger.replace(resolved);
        info!(
            count = snapshot.positions.len(),
            netto = snapshot.totals.netto,
            "wizard offer materialized"
        );
        self.events.emit(OfferEvent::OfferMaterialized {
            source: MaterializeSource::Wizard,
            count: snapshot.positions.len(),
        });
        Ok(FinalizedOffer {
            summary: outcome.summary,
            snapshot,
        })
    }

    /// Explicit new-offer action: abandon the wizard run, forget the chat
    /// transcript, clear the ledger and start a fresh draft.
    pub async fn new_offer(&self) -> Result<LedgerSnapshot, CoreError> {
        self.wizard.reset().await?;
        self.chat.reset().await;
        Ok(self.ledger.clear())
    }
}

impl Drop for OfferCore {
    fn drop(&mut self) {
        if let Some(task) = self.guard_task.take() {
            task.abort();
        }
    }
}
