//! Client for the text-generation collaborator.
//!
//! Speaks the OpenAI-compatible chat-completion wire format. Every call
//! pins `temperature` to 0 so repeated enrichment of the same function
//! is as deterministic as the backend allows.

use crate::error::AnalysisError;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TextGenClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl TextGenClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// One chat completion: system prompt, user prompt, model id.
    pub async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        model: &str,
    ) -> Result<String, AnalysisError> {
        debug!(model, "requesting text generation");
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&build_request(model, system_prompt, user_prompt))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalysisError::Timeout
                } else {
                    AnalysisError::Transport(e.to_string())
                }
            })?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;

        if let Some(error) = body.get("error") {
            return Err(AnalysisError::TextGen(error.to_string()));
        }

        body.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AnalysisError::TextGen("response carried no content".to_string()))
    }
}

fn build_request(model: &str, system_prompt: &str, user_prompt: &str) -> Value {
    json!({
        "model": model,
        "temperature": 0,
        "messages": [
            {"role": "system", "content": system_prompt},
            {"role": "user", "content": user_prompt},
        ],
    })
}

// ── Tests ────────────────────────────────────────────────────────
