//! LLM integration for multi-model voting.
//!
//! Defines the `ChatBackend` trait (one chat-completion round trip) and
//! provides the OpenRouter implementation, the prompt templates, the
//! response normalizer and the retrying voter client built on top.

pub mod normalizer;
pub mod openrouter;
pub mod prompt;
pub mod voter;

use async_trait::async_trait;

use crate::types::AugurError;

/// A single chat-completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    /// System instruction. Omitted from the wire when `None`.
    pub system: Option<String>,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Abstraction over chat-completion endpoints.
///
/// Implementors perform exactly one outbound call and classify failures:
/// `TransientRemote` for anything worth retrying (timeouts, 429, 5xx),
/// `Remote` for outright rejections. Retrying is the caller's job.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send the request and return the assistant's text.
    async fn complete(&self, request: &ChatRequest) -> Result<String, AugurError>;
}
