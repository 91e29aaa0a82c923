//! OpenRouter chat backend.
//!
//! Routes every voter and research call through OpenRouter's unified API,
//! giving access to many model providers with a single API key. Uses the
//! OpenAI-compatible chat completions format.
//!
//! One call per `complete`: retry and backoff live in the voter client so
//! that malformed answers are never retried.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use super::{ChatBackend, ChatRequest};
use crate::types::AugurError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

const DEFAULT_TIMEOUT_SECS: u64 = 120;

const SERVICE: &str = "openrouter";

// ---------------------------------------------------------------------------
// API types (OpenAI-compatible)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct OpenRouterClient {
    http: Client,
    api_key: SecretString,
    base_url: String,
    total_tokens: AtomicU64,
    total_calls: AtomicU64,
}

impl OpenRouterClient {
    /// Create a new OpenRouter client.
    ///
    /// - `api_key`: OpenRouter API key.
    /// - `base_url`: API root, defaults to the public endpoint.
    /// - `timeout`: per-request timeout, defaults to 120s.
    pub fn new(
        api_key: SecretString,
        base_url: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout.unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS)))
            .build()
            .context("Failed to build OpenRouter HTTP client")?;

        Ok(Self {
            http,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            total_tokens: AtomicU64::new(0),
            total_calls: AtomicU64::new(0),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Total tokens reported by the API across all successful calls.
    pub fn total_tokens(&self) -> u64 {
        self.total_tokens.load(Ordering::Relaxed)
    }

    /// Total number of successful API calls.
    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }
}

/// Map an HTTP status onto the error taxonomy.
fn classify_status(status: StatusCode, body: String) -> AugurError {
    let message = format!("HTTP {status}: {body}");
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        AugurError::TransientRemote {
            service: SERVICE.to_string(),
            message,
        }
    } else {
        AugurError::Remote {
            service: SERVICE.to_string(),
            message,
        }
    }
}

fn transient(message: String) -> AugurError {
    AugurError::TransientRemote {
        service: SERVICE.to_string(),
        message,
    }
}

#[async_trait]
impl ChatBackend for OpenRouterClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, AugurError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.user,
        });

        let body = ChatCompletionRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages,
        };

        debug!(model = %request.model, "Sending OpenRouter chat completion");

        let response = self
            .http
            .post(self.endpoint())
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .header("Content-Type", "application/json")
            .header("X-Title", "AUGUR Consensus Agent")
            .json(&body)
            .send()
            .await
            .map_err(|e| transient(format!("request error: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, text));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| transient(format!("unreadable response body: {e}")))?;

        if let Some(usage) = &parsed.usage {
            self.total_tokens
                .fetch_add(usage.total_tokens, Ordering::Relaxed);
        }
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
