//! HTTP implementation of the backend service traits.
//!
//! One [`BackendClient`] serves all four seams; the backend multiplexes
//! them under `/api`.  Auth is a bearer token when configured, requests and
//! responses are JSON throughout.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::CoreConfig;
use crate::error::ServiceError;
use crate::ledger::OfferPosition;
use crate::services::{
    ExtractResponse, ExtractionService, FinalizeService, GuardResult, GuardService, StepAnswer,
    StepService, WizardOutcome, WizardStep,
};
use async_trait::async_trait;

/// Cap on error bodies carried into [`ServiceError::Status`].
const MAX_ERROR_BODY: usize = 300;

pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BackendClient {
    pub fn new(config: &CoreConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.api_base_url.clone(),
            token: config.api_token.clone(),
        })
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Value,
    ) -> Result<T, ServiceError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "backend call");

        let mut req = self.http.post(&url).json(&body);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body: truncate_body(&text),
            });
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl StepService for BackendClient {
    async fn next(
        &self,
        session_id: Option<&str>,
        answer: Option<&StepAnswer>,
    ) -> Result<WizardStep, ServiceError> {
        self.post_json(
            "/api/wizard/next",
            json!({
                "sessionId": session_id,
                "answer": answer,
            }),
        )
        .await
    }
}

#[async_trait]
impl FinalizeService for BackendClient {
    async fn finalize(&self, session_id: &str) -> Result<WizardOutcome, ServiceError> {
        self.post_json(
            "/api/wizard/finalize",
            json!({ "sessionId": session_id }),
        )
        .await
    }
}

#[async_trait]
impl ExtractionService for BackendClient {
    async fn extract(&self, text: &str) -> Result<ExtractResponse, ServiceError> {
        self.post_json("/api/positions/extract", json!({ "text": text }))
            .await
    }
}

#[async_trait]
impl GuardService for BackendClient {
    async fn check(
        &self,
        positions: &[OfferPosition],
        context: Option<&Value>,
    ) -> Result<GuardResult, ServiceError> {
        self.post_json(
            "/api/guard/check",
            json!({
                "positions": positions,
                "context": context,
            }),
        )
        .await
    }
}

/// Keep error bodies log-sized without splitting a UTF-8 character.
fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{} [truncated]", &body[..end])
}
