//! Wizard session controller.
//!
//! Drives the server-held questionnaire one step at a time.  The remote
//! session cannot retract an answer, so backward navigation is a replay:
//! open a fresh session and re-submit everything except the last answer.
//! That makes the remote `session_id` a disposable cache key; it is replaced
//! without ceremony and never treated as identity.
//!
//! At most one backend round trip runs at a time.  Further calls are
//! rejected with `Busy` instead of queued, so a stale queued answer can
//! never land on a question it was not meant for.

use std::sync::{Arc, RwLock};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::CoreError;
use crate::events::{EventBus, OfferEvent};
use crate::guard::GuardContext;
use crate::services::{
    AnswerValue, FinalizeService, StepAnswer, StepService, StepUi, Suggestion, WizardOutcome,
    WizardStep,
};

pub mod numeric;

// ─── State & views ────────────────────────────────────────────────────────────

/// Lifecycle of one questionnaire run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WizardState {
    /// No run active.
    Idle,
    /// A question is on screen.
    Asking,
    /// All questions answered; finalize is the only forward move.
    Done,
    /// Finalize succeeded; the run is over and its session is dead.
    Finalized,
}

/// Rendering snapshot for the host UI.  Cheap to clone, safe to read from
/// any thread while a round trip is in flight.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WizardView {
    pub state: WizardState,
    /// Step key of the current question, if one is on screen.
    pub step: Option<String>,
    pub question: Option<String>,
    pub ui: Option<StepUi>,
    /// True once the session has no further questions.
    pub done: bool,
    /// Current preview lines.  Replaced wholesale on every step; empty means
    /// no preview.
    pub preview: Vec<Suggestion>,
    /// Number of committed answers, which is also how far `back()` can go.
    pub answered: usize,
}

impl WizardView {
    fn idle() -> Self {
        Self {
            state: WizardState::Idle,
            step: None,
            question: None,
            ui: None,
            done: false,
            preview: Vec::new(),
            answered: 0,
        }
    }
}

/// Outcome of a free-text quantity confirmation.
#[derive(Debug, Clone)]
pub enum QuantityOutcome {
    /// The coerced value was submitted and the wizard advanced.
    Submitted(WizardView),
    /// A submission was already in flight; this duplicate was dropped.
    Dropped,
}

struct WizardInner {
    state: WizardState,
    /// Committed answers in order.  This is the authoritative navigation
    /// state; the remote session is only a cache of having submitted it.
    history: Vec<StepAnswer>,
    current: Option<WizardStep>,
    preview: Vec<Suggestion>,
}

// ─── Controller ───────────────────────────────────────────────────────────────

/// Serialized front end to the step and finalize services.
///
/// The inner mutex is held across backend round trips on purpose: holding it
/// is what makes `try_lock` a reliable busy signal for every other call.
pub struct WizardController {
    steps: Arc<dyn StepService>,
    finalizer: Arc<dyn FinalizeService>,
    inner: Mutex<WizardInner>,
    view: RwLock<WizardView>,
    guard_context: GuardContext,
    events: EventBus,
}

impl WizardController {
    pub fn new(
        steps: Arc<dyn StepService>,
        finalizer: Arc<dyn FinalizeService>,
        guard_context: GuardContext,
        events: EventBus,
    ) -> Self {
        Self {
            steps,
            finalizer,
            inner: Mutex::new(WizardInner {
                state: WizardState::Idle,
                history: Vec::new(),
                current: None,
                preview: Vec::new(),
            }),
            view: RwLock::new(WizardView::idle()),
            guard_context,
            events,
        }
    }

    /// Begin a fresh run.  Valid from `Idle` only; call [`reset`] first to
    /// abandon a previous run.
    ///
    /// [`reset`]: WizardController::reset
    pub async fn start(&self) -> Result<WizardView, CoreError> {
        let mut inner = self.acquire()?;
        if inner.state != WizardState::Idle {
            return Err(CoreError::InvalidState {
                operation: "start",
                state: inner.state,
            });
        }
        let step = self
            .steps
            .next(None, None)
            .await
            .map_err(CoreError::SessionUnavailable)?;
        info!(session_id = %step.session_id, "wizard run started");
        inner.history.clear();
        Ok(self.apply_step(&mut inner, step))
    }

    /// Submit the answer to the current question and advance.
    pub async fn answer(&self, value: AnswerValue) -> Result<WizardView, CoreError> {
        let mut inner = self.acquire()?;
        if inner.state != WizardState::Asking {
            return Err(CoreError::InvalidState {
                operation: "answer",
                state: inner.state,
            });
        }
        let (step_key, session_id) = {
            let current = inner.current.as_ref().expect("Asking implies a current step");
            (current.step.clone(), current.session_id.clone())
        };
        let answer = StepAnswer {
            step: step_key,
            value,
        };
        let step = self
            .steps
            .next(Some(&session_id), Some(&answer))
            .await
            .map_err(CoreError::SessionUnavailable)?;
        inner.history.push(answer);
        Ok(self.apply_step(&mut inner, step))
    }

    /// Commit a free-text quantity for a `number` question.
    ///
    /// Coercion never fails (empty or unparsable text becomes 0.0), and a
    /// duplicate confirmation while one is still in flight is silently
    /// dropped rather than surfaced as an error.
    pub async fn confirm_quantity(&self, raw: &str) -> Result<QuantityOutcome, CoreError> {
        let value = AnswerValue::Number(numeric::coerce_quantity(raw));
        match self.answer(value).await {
            Ok(view) => Ok(QuantityOutcome::Submitted(view)),
            Err(CoreError::Busy) => {
                debug!("duplicate quantity confirmation dropped, submission in flight");
                Ok(QuantityOutcome::Dropped)
            }
            Err(err) => Err(err),
        }
    }

    /// Go one question back.
    ///
    /// Replays all but the last answer against a brand-new session; the old
    /// session id is abandoned.  Cost is one round trip per remaining
    /// answer.  Nothing is committed until the whole replay succeeds, so a
    /// failure mid-replay leaves the current step, history and preview
    /// exactly as they were.
    pub async fn back(&self) -> Result<WizardView, CoreError> {
        let mut inner = self.acquire()?;
        match inner.state {
            WizardState::Asking | WizardState::Done => {}
            state => {
                return Err(CoreError::InvalidState {
                    operation: "back",
                    state,
                })
            }
        }
        if inner.history.is_empty() {
            return Err(CoreError::HistoryEmpty);
        }

        let replay: Vec<StepAnswer> = inner.history[..inner.history.len() - 1].to_vec();
        let mut step = self
            .steps
            .next(None, None)
            .await
            .map_err(CoreError::SessionUnavailable)?;
        for answer in &replay {
            let session_id = step.session_id.clone();
            step = self
                .steps
                .next(Some(&session_id), Some(answer))
                .await
                .map_err(CoreError::SessionUnavailable)?;
        }
        debug!(
            replayed = replay.len(),
            session_id = %step.session_id,
            "back navigation replayed onto fresh session"
        );
        inner.history.pop();
        Ok(self.apply_step(&mut inner, step))
    }

    /// Close the run and fetch its raw positions.  Valid from `Done` only.
    /// Does not touch any ledger; materialization is the caller's move.
    pub async fn finalize(&self) -> Result<WizardOutcome, CoreError> {
        let mut inner = self.acquire()?;
        if inner.state != WizardState::Done {
            return Err(CoreError::InvalidState {
                operation: "finalize",
                state: inner.state,
            });
        }
        let session_id = inner
            .current
            .as_ref()
            .expect("Done implies a current step")
            .session_id
            .clone();
        let outcome = self
            .finalizer
            .finalize(&session_id)
            .await
            .map_err(CoreError::SessionUnavailable)?;
        info!(
            positions = outcome.positions.len(),
            "wizard run finalized"
        );
        inner.state = WizardState::Finalized;
        inner.history.clear();
        inner.current = None;
        let had_preview = !inner.preview.is_empty();
        inner.preview.clear();
        self.publish(&inner, had_preview);
        Ok(outcome)
    }

    /// Abandon the current run and return to `Idle`.  The remote session, if
    /// any, is simply forgotten.
    pub async fn reset(&self) -> Result<WizardView, CoreError> {
        let mut inner = self.acquire()?;
        inner.state = WizardState::Idle;
        inner.history.clear();
        inner.current = None;
        let had_preview = !inner.preview.is_empty();
        inner.preview.clear();
        // A fresh run answers from scratch; stale partial context must not
        // leak into guard checks.
        self.guard_context.clear();
        Ok(self.publish(&inner, had_preview))
    }

    /// Current rendering snapshot.  Never blocks on an in-flight round trip.
    pub fn view(&self) -> WizardView {
        self.view.read().expect("view lock poisoned").clone()
    }

    pub fn state(&self) -> WizardState {
        self.view.read().expect("view lock poisoned").state
    }

    fn acquire(&self) -> Result<MutexGuard<'_, WizardInner>, CoreError> {
        self.inner.try_lock().map_err(|_| CoreError::Busy)
    }

    /// Adopt a freshly fetched step: update state, preview, guard context,
    /// the published view and the event stream.
    fn apply_step(&self, inner: &mut WizardInner, step: WizardStep) -> WizardView {
        let preview_changed = inner.preview != step.suggestions;
        inner.preview = step.suggestions.clone();
        inner.state = if step.done {
            WizardState::Done
        } else {
            WizardState::Asking
        };
        self.guard_context
            .set(Value::Object(step.context_partial.clone()));
        inner.current = Some(step);
        self.publish(inner, preview_changed)
    }

    fn publish(&self, inner: &WizardInner, preview_changed: bool) -> WizardView {
        let view = WizardView {
            state: inner.state,
            step: inner.current.as_ref().map(|s| s.step.clone()),
            question: inner.current.as_ref().map(|s| s.question.clone()),
            ui: inner.current.as_ref().map(|s| s.ui.clone()),
            done: inner.state == WizardState::Done,
            preview: inner.preview.clone(),
            answered: inner.history.len(),
        };
        *self.view.write().expect("view lock poisoned") = view.clone();
        self.events.emit(OfferEvent::WizardStepChanged {
            step: view.step.clone(),
            done: view.done,
        });
        if preview_changed {
            self.events.emit(OfferEvent::PreviewChanged {
                suggestions: view.preview.clone(),
            });
        }
        view
    }
}
