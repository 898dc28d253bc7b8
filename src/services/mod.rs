//! Wire contract with the offer backend.
//!
//! The core talks to four remote collaborators: the wizard step service, the
//! wizard finalize service, the position extraction service, and the revenue
//! guard rule engine.  Each is a trait here so hosts and tests can swap the
//! HTTP client for scripted fakes.
//!
//! Field names are the German wire vocabulary the backend speaks (`menge`,
//! `einheit`, `epreis`) — they are kept verbatim rather than translated so
//! payloads can be diffed against backend logs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ServiceError;
use crate::ledger::OfferPosition;

pub mod http;

// ─── Wizard step types ────────────────────────────────────────────────────────

/// One step of the server-held questionnaire session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WizardStep {
    /// Opaque session handle.  A disposable cache key, not identity — `back()`
    /// replaces it wholesale.
    pub session_id: String,
    /// Stable key identifying which question this step asks.
    pub step: String,
    /// Question text, ready for display.
    pub question: String,
    /// Which input widget the host should render.
    pub ui: StepUi,
    /// Every answer accumulated so far, keyed by step.  Equal to the ordered
    /// replay of the local history — the replay-on-back trick depends on it.
    #[serde(default)]
    pub context_partial: serde_json::Map<String, Value>,
    /// True once the session has no further questions.
    #[serde(default)]
    pub done: bool,
    /// Uncommitted preview lines derived from the partial context.
    #[serde(default)]
    pub suggestions: Vec<Suggestion>,
}

/// Input widget descriptor for the current question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StepUi {
    SingleSelect {
        options: Vec<String>,
    },
    MultiSelect {
        options: Vec<String>,
    },
    Number {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
        #[serde(default)]
        step: Option<f64>,
    },
    /// No input; informational step acknowledged by advancing.
    Info,
}

/// A preview line shown beneath the wizard.  Not part of any ledger until the
/// run is finalized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Suggestion {
    pub name: String,
    pub menge: f64,
    pub einheit: String,
    /// Short display text ("ca. 45 m² Fläche").
    pub text: String,
}

/// One committed answer, as sent to the step service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepAnswer {
    pub step: String,
    pub value: AnswerValue,
}

/// Answer payload.  The wire shape depends on the question's `ui`; untagged
/// so numbers, strings and string lists serialize as plain JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Number(f64),
    Text(String),
    Multi(Vec<String>),
}

impl From<f64> for AnswerValue {
    fn from(n: f64) -> Self {
        AnswerValue::Number(n)
    }
}

impl From<&str> for AnswerValue {
    fn from(s: &str) -> Self {
        AnswerValue::Text(s.to_string())
    }
}

impl From<Vec<String>> for AnswerValue {
    fn from(items: Vec<String>) -> Self {
        AnswerValue::Multi(items)
    }
}

// ─── Finalize types ───────────────────────────────────────────────────────────

/// Raw named position from a finalized run: quantity and unit, no price yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WizardPosition {
    pub name: String,
    pub menge: f64,
    pub einheit: String,
}

/// Finalize response: a human summary plus the raw positions to resolve.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WizardOutcome {
    pub summary: String,
    #[serde(default)]
    pub positions: Vec<WizardPosition>,
    #[serde(default)]
    pub done: bool,
}

// ─── Extraction types ─────────────────────────────────────────────────────────

/// A priced position as the extraction service returns it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawPosition {
    pub name: String,
    pub menge: f64,
    pub einheit: String,
    pub epreis: f64,
}

/// Extraction response for free text or a product name lookup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractResponse {
    #[serde(default)]
    pub positions: Vec<RawPosition>,
    /// Unparsed backend output, kept for diagnostics only.
    #[serde(default)]
    pub raw: Option<String>,
}

// ─── Guard types ──────────────────────────────────────────────────────────────

/// Severity of a guard finding, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// One position the guard flags as plausibly missing from the offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardSuggestion {
    /// Stable across recomputations — safe to key UI state and accepts on.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub menge: Option<f64>,
    #[serde(default)]
    pub einheit: Option<String>,
    /// Why the rule fired, in customer-facing language.
    pub reason: String,
    pub severity: Severity,
    /// Rule family ("vorarbeiten", "entsorgung", ...).
    pub category: String,
}

/// Diagnostic record of a single rule evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleFire {
    pub id: String,
    pub hit: bool,
}

/// Verdict of one guard check over a ledger snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardResult {
    pub passed: bool,
    #[serde(default)]
    pub missing: Vec<GuardSuggestion>,
    #[serde(default)]
    pub rules_fired: Vec<RuleFire>,
}

impl GuardResult {
    /// The short-circuit verdict for an empty ledger — no rules consulted.
    pub fn empty_pass() -> Self {
        Self {
            passed: true,
            missing: Vec::new(),
            rules_fired: Vec::new(),
        }
    }
}

// ─── Service traits ───────────────────────────────────────────────────────────

/// Advances the server-held questionnaire one step at a time.
#[async_trait]
pub trait StepService: Send + Sync {
    /// Request the next step.  `session_id: None` opens a fresh session; at
    /// most one answer travels per call, so a replay is one call per history
    /// entry.
    async fn next(
        &self,
        session_id: Option<&str>,
        answer: Option<&StepAnswer>,
    ) -> Result<WizardStep, ServiceError>;
}

/// Closes a questionnaire session and returns its raw positions.
#[async_trait]
pub trait FinalizeService: Send + Sync {
    async fn finalize(&self, session_id: &str) -> Result<WizardOutcome, ServiceError>;
}

/// Turns free text or a product name into priced catalog positions.
#[async_trait]
pub trait ExtractionService: Send + Sync {
    async fn extract(&self, text: &str) -> Result<ExtractResponse, ServiceError>;
}

/// The revenue guard rule engine: flags plausibly missing positions.
#[async_trait]
pub trait GuardService: Send + Sync {
    async fn check(
        &self,
        positions: &[OfferPosition],
        context: Option<&Value>,
    ) -> Result<GuardResult, ServiceError>;
}
