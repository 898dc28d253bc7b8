// SPDX-License-Identifier: MIT
//! Error taxonomy of the offer core.
//!
//! Only three failures ever reach a caller: the backend was unreachable, an
//! operation was invoked in the wrong wizard state, or a wizard round trip
//! is already in flight.  Extraction and guard failures are absorbed inside
//! the core (zero-priced fallback, "unknown" guard status) and surface as
//! events, never as errors.

use crate::wizard::WizardState;

/// Failure of a single backend round trip.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Network-level failure (connect, timeout, TLS).
    #[error("transport error: {0}")]
    Transport(String),

    /// Backend answered with a non-success HTTP status.
    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Body arrived but did not decode into the expected shape.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        ServiceError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Malformed(err.to_string())
    }
}

/// Errors surfaced to hosts embedding the core.
///
/// All of these leave state untouched: the failed operation can simply be
/// retried once the condition clears.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The step or finalize service could not be reached.  Retryable; the
    /// wizard keeps its previous step and history.
    #[error("wizard backend unavailable: {0}")]
    SessionUnavailable(#[source] ServiceError),

    /// Operation called outside its valid wizard state.
    #[error("{operation} is not valid while the wizard is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: WizardState,
    },

    /// `back()` with nothing answered yet.
    #[error("no answers to navigate back over")]
    HistoryEmpty,

    /// Another wizard call (or guard accept) is still in flight.  Calls are
    /// rejected rather than queued; the caller retries after the running one
    /// settles.
    #[error("another call is already in flight")]
    Busy,
}
