//! Research context providers.
//!
//! Defines the `ResearchProvider` trait used to enrich voter prompts with
//! current factual context. Research is strictly best-effort: the fan-out
//! coordinator wraps every call in its own timeout and turns any failure
//! into an empty context.

pub mod research;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::Market;

/// Abstraction over external research sources.
#[async_trait]
pub trait ResearchProvider: Send + Sync {
    /// Produce a factual summary relevant to the market's question.
    async fn research(&self, market: &Market) -> Result<String>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}
