//! Stateless backend
//!
//! One authenticated HTTP POST per exchange against a local inference
//! endpoint. No session, no teardown.

use super::error::ExchangeError;
use crate::config::{ReasoningEffort, StatelessSettings};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    reasoning: ReasoningEffort,
    input: &'a str,
    stream: bool,
}

pub struct StatelessBackend {
    client: Client,
    settings: StatelessSettings,
    url: String,
    timeout: Duration,
}

impl StatelessBackend {
    pub fn new(settings: StatelessSettings, timeout: Duration) -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExchangeError::backend_unavailable(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: settings.endpoint_url(),
            settings,
            timeout,
        })
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    pub async fn answer(&self, prompt: &str) -> Result<String, ExchangeError> {
        let request = ChatRequest {
            model: &self.settings.model,
            reasoning: self.settings.reasoning,
            input: prompt,
            stream: false,
        };

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.settings.token))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.classify(&e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.classify(&e))?;

        if !status.is_success() {
            return Err(ExchangeError::transport(format!("HTTP {status} error: {body}")));
        }

        let parsed: Value = serde_json::from_str(&body)
            .map_err(|e| ExchangeError::transport(format!("Failed to parse response: {e}")))?;
        let output = parsed
            .get("output")
            .and_then(Value::as_array)
            .ok_or_else(|| ExchangeError::malformed_response("Response has no output list"))?;

        extract_answer(output)
    }

    fn classify(&self, e: &reqwest::Error) -> ExchangeError {
        if e.is_timeout() {
            ExchangeError::timeout(self.timeout)
        } else if e.is_connect() {
            ExchangeError::backend_unavailable(format!("Connection failed: {e}"))
        } else {
            ExchangeError::transport(format!("Request failed: {e}"))
        }
    }
}

/// Text content of one output element; non-objects have none
fn item_text(item: &Value) -> Option<&str> {
    item.as_object()?.get("content").and_then(Value::as_str)
}

fn item_kind(item: &Value) -> Option<&str> {
    item.as_object()?.get("type").and_then(Value::as_str)
}

/// Pick the answer out of the output list.
///
/// Prefers the last `message` element; reasoning traces come before it.
/// Falls back to the last element carrying text. Elements of any other
/// shape are skipped.
fn extract_answer(output: &[Value]) -> Result<String, ExchangeError> {
    let answer = output
        .iter()
        .rev()
        .find(|item| item_kind(item) == Some("message") && item_text(item).is_some())
        .or_else(|| output.iter().rev().find(|item| item_text(item).is_some()))
        .and_then(item_text);

    match answer {
        Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
        Some(_) => Err(ExchangeError::malformed_response("Answer content is empty")),
        None if output.is_empty() => Err(ExchangeError::malformed_response("Response output is empty")),
        None => Err(ExchangeError::malformed_response("No output element carries content")),
    }
}
