//! HTTP client for an OpenAI-compatible model backend (Ollama's `/v1` API)
//!
//! Three calls cross the wire:
//! - `GET {base}/models` lists the models the backend can serve
//! - `POST {base}/chat/completions` generates one non-streaming completion
//! - `POST {native_root}/api/pull` asks the server to download a model

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::config::BackendConfig;
use super::error::BackendError;
use crate::metrics::{BACKEND_RETRIES, LLM_CALL_TIME};

/// A message in a chat-completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String, // "system", "user", "assistant"
    pub content: String,
    /// Speaker name, used to tell participants apart in multi-party chats
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            name: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

/// Response from `/chat/completions`; every field is optional so that a
/// malformed body surfaces as a protocol mismatch instead of a decode panic.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// A successful generation
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    /// Attempts spent, including the successful one
    pub attempts: u32,
    pub latency: Duration,
}

/// Client bound to a single [`BackendConfig`]
#[derive(Clone)]
pub struct BackendClient {
    config: Arc<BackendConfig>,
    http: reqwest::Client,
}

impl BackendClient {
    /// Create a client with its own connection pool
    pub fn new(config: Arc<BackendConfig>) -> Self {
        Self::with_http(reqwest::Client::new(), config)
    }

    /// Create a client that shares an existing connection pool
    pub fn with_http(http: reqwest::Client, config: Arc<BackendConfig>) -> Self {
        Self { config, http }
    }

    pub fn config(&self) -> &Arc<BackendConfig> {
        &self.config
    }

    /// List model identifiers known to the backend
    ///
    /// Accepts both the OpenAI shape (`{"data":[{"id":..}]}`) and Ollama's
    /// native tag listing (`{"models":[{"name":..}]}`).
    pub async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let endpoint = self.config.endpoint("models");

        let response = self
            .authorized(self.http.get(&endpoint))
            .timeout(self.config.timeout())
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(self.config.id(), e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::from_reqwest(self.config.id(), e))?;
        self.check_status(status, &text, None)?;

        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| self.mismatch(format!("model list: {}", e)))?;

        let ids = if let Some(data) = value["data"].as_array() {
            data.iter()
                .filter_map(|m| m["id"].as_str())
                .map(str::to_string)
                .collect()
        } else if let Some(models) = value["models"].as_array() {
            models
                .iter()
                .filter_map(|m| m["name"].as_str().or_else(|| m["model"].as_str()))
                .map(str::to_string)
                .collect()
        } else {
            return Err(self.mismatch("model list has neither `data` nor `models`"));
        };

        Ok(ids)
    }

    /// Send one chat-completion request without retrying
    ///
    /// # Arguments
    /// * `messages` - The conversation to complete
    /// * `max_tokens` - Optional cap on generated tokens
    /// * `trace_id` - Optional trace ID forwarded as `X-Trace-Id`
    pub async fn chat_once(
        &self,
        messages: &[ChatMessage],
        max_tokens: Option<u32>,
        trace_id: Option<&str>,
    ) -> Result<String, BackendError> {
        let endpoint = self.config.endpoint("chat/completions");
        let body = ChatRequest {
            model: self.config.model_name(),
            messages,
            stream: false,
            temperature: self.config.temperature(),
            max_tokens,
        };

        let mut request = self
            .authorized(self.http.post(&endpoint))
            .timeout(self.config.timeout())
            .json(&body);

        if let Some(tid) = trace_id {
            request = request.header("X-Trace-Id", tid);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(self.config.id(), e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::from_reqwest(self.config.id(), e))?;
        self.check_status(status, &text, Some(self.config.model_name()))?;

        if text.is_empty() {
            return Err(self.mismatch("empty response body"));
        }

        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| self.mismatch(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or_else(|| self.mismatch("missing choices[0].message.content"))?;

        if content.trim().is_empty() {
            return Err(self.mismatch("empty completion"));
        }

        Ok(content)
    }

    /// Send a chat-completion request, retrying transport failures
    ///
    /// Retries follow the backend's [`RetryPolicy`](super::RetryPolicy).
    /// Protocol mismatches and missing models fail on the first attempt.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        trace_id: Option<&str>,
    ) -> Result<Completion, BackendError> {
        let policy = self.config.retry_policy();
        let start = Instant::now();
        let mut attempt = 0u32;

        loop {
            match self.chat_once(messages, None, trace_id).await {
                Ok(content) => {
                    let latency = start.elapsed();
                    LLM_CALL_TIME
                        .with_label_values(&[self.config.id(), self.config.model_name()])
                        .observe(latency.as_secs_f64());
                    return Ok(Completion {
                        content,
                        attempts: attempt + 1,
                        latency,
                    });
                }
                Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        backend = %self.config.id(),
                        attempt = attempt + 1,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Backend call failed, retrying"
                    );
                    BACKEND_RETRIES.with_label_values(&[self.config.id()]).inc();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Ask the server to download `model`
    ///
    /// Returns once the server has accepted the request. The download
    /// continues server-side; [`PullProgress::finish`] drains the progress
    /// stream and reports a failure the server announces along the way.
    pub async fn pull_model(&self, model: &str) -> Result<PullProgress, BackendError> {
        let endpoint = format!("{}/api/pull", self.config.native_root());
        debug!(backend = %self.config.id(), model, endpoint = %endpoint, "Requesting model pull");

        let request = self
            .authorized(self.http.post(&endpoint))
            .json(&serde_json::json!({
                "model": model,
                "stream": true
            }));

        // Only the handshake is bounded; the progress stream can outlive the timeout
        let response = tokio::time::timeout(self.config.timeout(), request.send())
            .await
            .map_err(|_| BackendError::Connectivity {
                backend: self.config.id().to_string(),
                detail: "pull request timed out".to_string(),
            })?
            .map_err(|e| BackendError::from_reqwest(self.config.id(), e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(self.status_error(status, &text, None));
        }

        Ok(PullProgress { response })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.config.api_key().is_empty() {
            request
        } else {
            request.bearer_auth(self.config.api_key())
        }
    }

    fn check_status(
        &self,
        status: StatusCode,
        body: &str,
        model: Option<&str>,
    ) -> Result<(), BackendError> {
        if status.is_success() {
            Ok(())
        } else {
            Err(self.status_error(status, body, model))
        }
    }

    /// Map a non-success status to the error taxonomy
    fn status_error(&self, status: StatusCode, body: &str, model: Option<&str>) -> BackendError {
        let snippet: String = body.chars().take(200).collect();

        if status == StatusCode::NOT_FOUND {
            if let Some(model) = model {
                return BackendError::ModelMissing {
                    backend: self.config.id().to_string(),
                    model: model.to_string(),
                };
            }
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return BackendError::Connectivity {
                backend: self.config.id().to_string(),
                detail: format!("HTTP {}: {}", status, snippet),
            };
        }
        self.mismatch(format!("HTTP {}: {}", status, snippet))
    }

    fn mismatch(&self, detail: impl Into<String>) -> BackendError {
        BackendError::ProtocolMismatch {
            backend: self.config.id().to_string(),
            detail: detail.into(),
        }
    }
}

/// Progress stream of an accepted pull
pub struct PullProgress {
    response: reqwest::Response,
}

impl PullProgress {
    /// Drain the newline-delimited progress stream
    ///
    /// Returns the error text if the server reports `{"error": ...}`.
    pub async fn finish(self) -> Result<(), String> {
        let mut stream = self.response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| e.to_string())?;
            buffer.extend_from_slice(&bytes);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                check_progress_line(&line)?;
            }
        }
        check_progress_line(&buffer)
    }
}

fn check_progress_line(line: &[u8]) -> Result<(), String> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(());
    }
    match serde_json::from_slice::<serde_json::Value>(line) {
        Ok(data) => match data["error"].as_str() {
            Some(err) => Err(err.to_string()),
            None => Ok(()),
        },
        // Progress lines are informational; skip anything we cannot read
        Err(_) => Ok(()),
    }
}
