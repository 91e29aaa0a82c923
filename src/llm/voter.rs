//! Voter client.
//!
//! Asks one remote model for a ballot. Transient failures (timeouts, 429,
//! 5xx) are retried with exponential backoff; malformed answers and outright
//! rejections fail immediately. Wall-clock latency is measured across all
//! attempts and reported on success and failure alike.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::normalizer::{parse_vote, ParsedVote};
use super::{ChatBackend, ChatRequest};
use crate::types::AugurError;

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Total attempts per voter call, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Upper bound on any single backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `attempt` (0-based; attempt 0 never waits).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A successful voter call.
#[derive(Debug, Clone)]
pub struct VoterResponse {
    pub vote: ParsedVote,
    /// `{"text": <raw>, "model": <model id>}`
    pub raw: serde_json::Value,
    pub latency_ms: u64,
    pub attempts: u32,
}

/// A failed voter call, still carrying the time spent.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{source}")]
pub struct VoterFailure {
    #[source]
    pub source: AugurError,
    pub latency_ms: u64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub const DEFAULT_TEMPERATURE: f32 = 0.3;
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

pub struct VoterClient {
    backend: Arc<dyn ChatBackend>,
    retry: RetryPolicy,
    temperature: f32,
    max_tokens: u32,
}

impl VoterClient {
    pub fn new(backend: Arc<dyn ChatBackend>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            retry,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Override sampling settings.
    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// Ask `model_id` (registered as `voter`) for a ballot.
    pub async fn cast_vote(
        &self,
        voter: &str,
        model_id: &str,
        system: &str,
        prompt: &str,
    ) -> Result<VoterResponse, VoterFailure> {
        let request = ChatRequest {
            model: model_id.to_string(),
            system: Some(system.to_string()),
            user: prompt.to_string(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let started = Instant::now();
        let elapsed_ms = |started: Instant| started.elapsed().as_millis() as u64;
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let delay = self.retry.delay_for(attempt);
            if !delay.is_zero() {
                debug!(voter, model = model_id, attempt, delay_ms = delay.as_millis() as u64, "Retrying voter call");
                tokio::time::sleep(delay).await;
            }
            attempt += 1;

            match self.backend.complete(&request).await {
                Ok(text) => {
                    let vote = parse_vote(&text).map_err(|source| VoterFailure {
                        source,
                        latency_ms: elapsed_ms(started),
                    })?;
                    return Ok(VoterResponse {
                        vote,
                        raw: serde_json::json!({ "text": text, "model": model_id }),
                        latency_ms: elapsed_ms(started),
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!(voter, model = model_id, attempt, error = %e, "Transient voter error");
                }
                Err(source) => {
                    return Err(VoterFailure {
                        source,
                        latency_ms: elapsed_ms(started),
                    });
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
