// Wizard controller tests: replay-based back navigation, busy rejection,
// state gating, quantity coercion.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use offerkern::error::{CoreError, ServiceError};
use offerkern::events::EventBus;
use offerkern::guard::GuardContext;
use offerkern::services::{
    AnswerValue, FinalizeService, StepAnswer, StepService, StepUi, Suggestion, WizardOutcome,
    WizardPosition, WizardStep,
};
use offerkern::wizard::{QuantityOutcome, WizardController, WizardState};

// ─── Scripted backend ─────────────────────────────────────────────────────────

/// Deterministic three-question backend.  Sessions are append-only maps of
/// answers, exactly like the real one: there is no way to retract an answer.
struct ScriptedBackend {
    sessions: Mutex<HashMap<String, Vec<StepAnswer>>>,
    session_seq: AtomicUsize,
    calls: AtomicUsize,
    fail_next: AtomicBool,
    /// When set, steps come back without suggestions.
    suppress_suggestions: AtomicBool,
    /// When armed, `next()` parks until `gate.notify_one()`.
    gate: Notify,
    gate_armed: AtomicBool,
}

impl ScriptedBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            session_seq: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
            suppress_suggestions: AtomicBool::new(false),
            gate: Notify::new(),
            gate_armed: AtomicBool::new(false),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn step_for(&self, session_id: String, answers: &[StepAnswer]) -> WizardStep {
        let mut context_partial = serde_json::Map::new();
        for answer in answers {
            context_partial.insert(
                answer.step.clone(),
                serde_json::to_value(&answer.value).unwrap(),
            );
        }
        // A preview appears once the area is known.
        let suggestions = if self.suppress_suggestions.load(Ordering::SeqCst) {
            Vec::new()
        } else {
            answers
                .iter()
                .find(|a| a.step == "flaeche_qm")
                .and_then(|a| match &a.value {
                    AnswerValue::Number(qm) => Some(vec![Suggestion {
                        name: "Wandfläche streichen".to_string(),
                        menge: *qm,
                        einheit: "m²".to_string(),
                        text: format!("ca. {qm} m²"),
                    }]),
                    _ => None,
                })
                .unwrap_or_default()
        };

        let done = answers.len() >= 3;
        let (step, question, ui) = match answers.len() {
            0 => (
                "gewerk",
                "Welches Gewerk?",
                StepUi::SingleSelect {
                    options: vec!["Maler".into(), "Boden".into()],
                },
            ),
            1 => (
                "flaeche_qm",
                "Wie viele Quadratmeter?",
                StepUi::Number {
                    min: Some(0.0),
                    max: None,
                    step: None,
                },
            ),
            2 => (
                "zusatz",
                "Welche Zusatzleistungen?",
                StepUi::MultiSelect {
                    options: vec!["Abdecken".into(), "Entsorgung".into()],
                },
            ),
            _ => ("fertig", "Alle Angaben komplett.", StepUi::Info),
        };
        WizardStep {
            session_id,
            step: step.to_string(),
            question: question.to_string(),
            ui,
            context_partial,
            done,
            suggestions,
        }
    }
}

#[async_trait]
impl StepService for ScriptedBackend {
    async fn next(
        &self,
        session_id: Option<&str>,
        answer: Option<&StepAnswer>,
    ) -> Result<WizardStep, ServiceError> {
        if self.gate_armed.load(Ordering::SeqCst) {
            self.gate.notified().await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ServiceError::Transport("connection refused".to_string()));
        }
        let mut sessions = self.sessions.lock().unwrap();
        let sid = match session_id {
            None => {
                let sid = format!("s-{}", self.session_seq.fetch_add(1, Ordering::SeqCst));
                sessions.insert(sid.clone(), Vec::new());
                sid
            }
            Some(sid) => sid.to_string(),
        };
        let answers = sessions.get_mut(&sid).ok_or_else(|| ServiceError::Status {
            status: 404,
            body: "unknown session".to_string(),
        })?;
        if let Some(answer) = answer {
            answers.push(answer.clone());
        }
        let answers = answers.clone();
        Ok(self.step_for(sid, &answers))
    }
}

#[async_trait]
impl FinalizeService for ScriptedBackend {
    async fn finalize(&self, session_id: &str) -> Result<WizardOutcome, ServiceError> {
        let sessions = self.sessions.lock().unwrap();
        let answers = sessions.get(session_id).ok_or_else(|| ServiceError::Status {
            status: 404,
            body: "unknown session".to_string(),
        })?;
        let qm = answers
            .iter()
            .find_map(|a| match (&a.step[..], &a.value) {
                ("flaeche_qm", AnswerValue::Number(qm)) => Some(*qm),
                _ => None,
            })
            .unwrap_or(0.0);
        let mut positions = vec![WizardPosition {
            name: "Wandfläche streichen".to_string(),
            menge: qm,
            einheit: "m²".to_string(),
        }];
        if let Some(AnswerValue::Multi(extras)) =
            answers.iter().find(|a| a.step == "zusatz").map(|a| &a.value)
        {
            for extra in extras {
                positions.push(WizardPosition {
                    name: extra.clone(),
                    menge: 1.0,
                    einheit: "Stk".to_string(),
                });
            }
        }
        Ok(WizardOutcome {
            summary: format!("Malerarbeiten, {} Positionen", positions.len()),
            positions,
            done: true,
        })
    }
}

// ─── Instant-done backend ─────────────────────────────────────────────────────

/// Backend with nothing left to ask: the very first step is already terminal.
struct InstantDoneBackend;

#[async_trait]
impl StepService for InstantDoneBackend {
    async fn next(
        &self,
        session_id: Option<&str>,
        _answer: Option<&StepAnswer>,
    ) -> Result<WizardStep, ServiceError> {
        Ok(WizardStep {
            session_id: session_id.unwrap_or("s-fixed").to_string(),
            step: "fertig".to_string(),
            question: "Alle Angaben liegen bereits vor.".to_string(),
            ui: StepUi::Info,
            context_partial: serde_json::Map::new(),
            done: true,
            suggestions: Vec::new(),
        })
    }
}

#[async_trait]
impl FinalizeService for InstantDoneBackend {
    async fn finalize(&self, _session_id: &str) -> Result<WizardOutcome, ServiceError> {
        Ok(WizardOutcome {
            summary: "Standardangebot".to_string(),
            positions: vec![WizardPosition {
                name: "Anfahrtspauschale".to_string(),
                menge: 1.0,
                einheit: "Stk".to_string(),
            }],
            done: true,
        })
    }
}

fn controller(backend: &Arc<ScriptedBackend>) -> WizardController {
    WizardController::new(
        Arc::clone(backend) as Arc<dyn StepService>,
        Arc::clone(backend) as Arc<dyn FinalizeService>,
        GuardContext::new(),
        EventBus::new(),
    )
}

fn context_of(view_context: &GuardContext) -> Value {
    view_context.get().unwrap_or(Value::Null)
}

// ─── Forward flow ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn full_run_reaches_done() {
    let backend = ScriptedBackend::new();
    let wizard = controller(&backend);

    let view = wizard.start().await.unwrap();
    assert_eq!(view.state, WizardState::Asking);
    assert_eq!(view.step.as_deref(), Some("gewerk"));
    assert_eq!(view.answered, 0);

    wizard.answer("Maler".into()).await.unwrap();
    wizard.answer(AnswerValue::Number(45.0)).await.unwrap();
    let view = wizard
        .answer(vec!["Abdecken".to_string()].into())
        .await
        .unwrap();
    assert!(view.done);
    assert_eq!(view.state, WizardState::Done);
    assert_eq!(view.answered, 3);
}

#[tokio::test]
async fn preview_appears_and_is_replaced() {
    let backend = ScriptedBackend::new();
    let wizard = controller(&backend);

    let view = wizard.start().await.unwrap();
    assert!(view.preview.is_empty());

    wizard.answer("Maler".into()).await.unwrap();
    let view = wizard.answer(AnswerValue::Number(45.0)).await.unwrap();
    assert_eq!(view.preview.len(), 1);
    assert_eq!(view.preview[0].menge, 45.0);
}

#[tokio::test]
async fn empty_suggestions_clear_a_standing_preview() {
    let backend = ScriptedBackend::new();
    let wizard = controller(&backend);
    wizard.start().await.unwrap();
    wizard.answer("Maler".into()).await.unwrap();
    let view = wizard.answer(AnswerValue::Number(45.0)).await.unwrap();
    assert_eq!(view.preview.len(), 1);

    // The next step carries no suggestions; the stale preview must not linger.
    backend.suppress_suggestions.store(true, Ordering::SeqCst);
    let view = wizard
        .answer(vec!["Abdecken".to_string()].into())
        .await
        .unwrap();
    assert!(view.preview.is_empty());
}

#[tokio::test]
async fn first_step_already_terminal_goes_straight_to_done() {
    let backend = Arc::new(InstantDoneBackend);
    let wizard = WizardController::new(
        Arc::clone(&backend) as Arc<dyn StepService>,
        Arc::clone(&backend) as Arc<dyn FinalizeService>,
        GuardContext::new(),
        EventBus::new(),
    );

    let view = wizard.start().await.unwrap();
    assert_eq!(view.state, WizardState::Done);
    assert!(view.done);
    assert_eq!(view.answered, 0);

    // No question was ever asked, yet finalize is immediately legal.
    let outcome = wizard.finalize().await.unwrap();
    assert_eq!(outcome.positions.len(), 1);
    assert_eq!(wizard.state(), WizardState::Finalized);
}

#[tokio::test]
async fn answer_before_start_is_rejected() {
    let backend = ScriptedBackend::new();
    let wizard = controller(&backend);
    let err = wizard.answer("Maler".into()).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::InvalidState {
            operation: "answer",
            state: WizardState::Idle,
        }
    ));
}

#[tokio::test]
async fn finalize_before_done_is_rejected() {
    let backend = ScriptedBackend::new();
    let wizard = controller(&backend);
    wizard.start().await.unwrap();
    let err = wizard.finalize().await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidState { operation: "finalize", .. }));
}

#[tokio::test]
async fn second_start_requires_reset() {
    let backend = ScriptedBackend::new();
    let wizard = controller(&backend);
    wizard.start().await.unwrap();
    assert!(matches!(
        wizard.start().await.unwrap_err(),
        CoreError::InvalidState { operation: "start", .. }
    ));
    wizard.reset().await.unwrap();
    assert!(wizard.start().await.is_ok());
}

// ─── Back navigation ──────────────────────────────────────────────────────────

#[tokio::test]
async fn back_equals_replay_from_scratch() {
    let backend = ScriptedBackend::new();
    let guard_context = GuardContext::new();
    let wizard = WizardController::new(
        Arc::clone(&backend) as Arc<dyn StepService>,
        Arc::clone(&backend) as Arc<dyn FinalizeService>,
        guard_context.clone(),
        EventBus::new(),
    );

    wizard.start().await.unwrap();
    wizard.answer("Maler".into()).await.unwrap();
    let after_one = context_of(&guard_context);
    wizard.answer(AnswerValue::Number(45.0)).await.unwrap();

    let view = wizard.back().await.unwrap();
    // Same question, same accumulated context as after the first answer.
    assert_eq!(view.step.as_deref(), Some("flaeche_qm"));
    assert_eq!(view.answered, 1);
    assert_eq!(context_of(&guard_context), after_one);
}

#[tokio::test]
async fn back_uses_a_fresh_session() {
    let backend = ScriptedBackend::new();
    let wizard = controller(&backend);
    wizard.start().await.unwrap();
    wizard.answer("Maler".into()).await.unwrap();
    wizard.answer(AnswerValue::Number(45.0)).await.unwrap();

    let sessions_before = backend.session_seq.load(Ordering::SeqCst);
    wizard.back().await.unwrap();
    assert_eq!(backend.session_seq.load(Ordering::SeqCst), sessions_before + 1);
}

#[tokio::test]
async fn back_costs_one_call_per_remaining_answer() {
    let backend = ScriptedBackend::new();
    let wizard = controller(&backend);
    wizard.start().await.unwrap();
    wizard.answer("Maler".into()).await.unwrap();
    wizard.answer(AnswerValue::Number(45.0)).await.unwrap();
    wizard
        .answer(vec!["Abdecken".to_string()].into())
        .await
        .unwrap();

    let calls_before = backend.calls();
    wizard.back().await.unwrap();
    // One fresh-session call plus one replay call per kept answer.
    assert_eq!(backend.calls(), calls_before + 3);
}

#[tokio::test]
async fn back_from_done_returns_to_last_question() {
    let backend = ScriptedBackend::new();
    let wizard = controller(&backend);
    wizard.start().await.unwrap();
    wizard.answer("Maler".into()).await.unwrap();
    wizard.answer(AnswerValue::Number(45.0)).await.unwrap();
    wizard
        .answer(vec!["Abdecken".to_string()].into())
        .await
        .unwrap();
    assert_eq!(wizard.state(), WizardState::Done);

    let view = wizard.back().await.unwrap();
    assert_eq!(view.state, WizardState::Asking);
    assert_eq!(view.step.as_deref(), Some("zusatz"));
}

#[tokio::test]
async fn back_with_empty_history_is_rejected() {
    let backend = ScriptedBackend::new();
    let wizard = controller(&backend);
    wizard.start().await.unwrap();
    assert!(matches!(
        wizard.back().await.unwrap_err(),
        CoreError::HistoryEmpty
    ));
}

#[tokio::test]
async fn failed_replay_leaves_state_untouched() {
    let backend = ScriptedBackend::new();
    let wizard = controller(&backend);
    wizard.start().await.unwrap();
    wizard.answer("Maler".into()).await.unwrap();
    wizard.answer(AnswerValue::Number(45.0)).await.unwrap();
    let before = wizard.view();

    backend.fail_next.store(true, Ordering::SeqCst);
    let err = wizard.back().await.unwrap_err();
    assert!(matches!(err, CoreError::SessionUnavailable(_)));

    let after = wizard.view();
    assert_eq!(after.step, before.step);
    assert_eq!(after.answered, before.answered);
    // And back still works once the backend recovers.
    let view = wizard.back().await.unwrap();
    assert_eq!(view.answered, 1);
}

// ─── Service failure ──────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_answer_keeps_the_current_question() {
    let backend = ScriptedBackend::new();
    let wizard = controller(&backend);
    wizard.start().await.unwrap();

    backend.fail_next.store(true, Ordering::SeqCst);
    let err = wizard.answer("Maler".into()).await.unwrap_err();
    assert!(matches!(err, CoreError::SessionUnavailable(_)));

    let view = wizard.view();
    assert_eq!(view.step.as_deref(), Some("gewerk"));
    assert_eq!(view.answered, 0);
    // Retry succeeds without any repair step.
    assert!(wizard.answer("Maler".into()).await.is_ok());
}

// ─── Busy rejection ───────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_call_is_rejected_not_queued() {
    let backend = ScriptedBackend::new();
    let wizard = Arc::new(controller(&backend));
    wizard.start().await.unwrap();

    backend.gate_armed.store(true, Ordering::SeqCst);
    let first = {
        let wizard = Arc::clone(&wizard);
        tokio::spawn(async move { wizard.answer("Maler".into()).await })
    };
    // Let the spawned call take the lock and park inside the backend.
    tokio::task::yield_now().await;

    let err = wizard.answer("Boden".into()).await.unwrap_err();
    assert!(matches!(err, CoreError::Busy));

    backend.gate_armed.store(false, Ordering::SeqCst);
    backend.gate.notify_one();
    first.await.unwrap().unwrap();

    // Only the first answer landed.
    assert_eq!(wizard.view().answered, 1);
}

#[tokio::test]
async fn duplicate_quantity_confirm_is_dropped_silently() {
    let backend = ScriptedBackend::new();
    let wizard = Arc::new(controller(&backend));
    wizard.start().await.unwrap();
    wizard.answer("Maler".into()).await.unwrap();

    backend.gate_armed.store(true, Ordering::SeqCst);
    let first = {
        let wizard = Arc::clone(&wizard);
        tokio::spawn(async move { wizard.confirm_quantity("45").await })
    };
    tokio::task::yield_now().await;

    // The double-press: no error, no second submission.
    let outcome = wizard.confirm_quantity("45").await.unwrap();
    assert!(matches!(outcome, QuantityOutcome::Dropped));

    backend.gate_armed.store(false, Ordering::SeqCst);
    backend.gate.notify_one();
    let outcome = first.await.unwrap().unwrap();
    assert!(matches!(outcome, QuantityOutcome::Submitted(_)));
    assert_eq!(wizard.view().answered, 2);
}

// ─── Quantity coercion ────────────────────────────────────────────────────────

#[tokio::test]
async fn quantity_text_is_coerced_on_confirm() {
    let backend = ScriptedBackend::new();
    let guard_context = GuardContext::new();
    let wizard = WizardController::new(
        Arc::clone(&backend) as Arc<dyn StepService>,
        Arc::clone(&backend) as Arc<dyn FinalizeService>,
        guard_context.clone(),
        EventBus::new(),
    );
    wizard.start().await.unwrap();
    wizard.answer("Maler".into()).await.unwrap();

    wizard.confirm_quantity("45,5").await.unwrap();
    let context = context_of(&guard_context);
    assert_eq!(context["flaeche_qm"], serde_json::json!(45.5));
}

#[tokio::test]
async fn empty_quantity_coerces_to_zero() {
    let backend = ScriptedBackend::new();
    let guard_context = GuardContext::new();
    let wizard = WizardController::new(
        Arc::clone(&backend) as Arc<dyn StepService>,
        Arc::clone(&backend) as Arc<dyn FinalizeService>,
        guard_context.clone(),
        EventBus::new(),
    );
    wizard.start().await.unwrap();
    wizard.answer("Maler".into()).await.unwrap();

    wizard.confirm_quantity("  ").await.unwrap();
    let context = context_of(&guard_context);
    assert_eq!(context["flaeche_qm"], serde_json::json!(0.0));
}

// ─── Finalize ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn finalize_returns_positions_and_ends_the_run() {
    let backend = ScriptedBackend::new();
    let wizard = controller(&backend);
    wizard.start().await.unwrap();
    wizard.answer("Maler".into()).await.unwrap();
    wizard.answer(AnswerValue::Number(45.0)).await.unwrap();
    wizard
        .answer(vec!["Abdecken".to_string(), "Entsorgung".to_string()].into())
        .await
        .unwrap();

    let outcome = wizard.finalize().await.unwrap();
    assert_eq!(outcome.positions.len(), 3);
    assert_eq!(outcome.positions[0].menge, 45.0);
    assert_eq!(wizard.state(), WizardState::Finalized);

    // The dead session stays dead: no further answers, no further back.
    assert!(matches!(
        wizard.answer("x".into()).await.unwrap_err(),
        CoreError::InvalidState { .. }
    ));
    assert!(matches!(
        wizard.back().await.unwrap_err(),
        CoreError::InvalidState { .. }
    ));
}
