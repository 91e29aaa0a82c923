//! Web research via a search-augmented chat model.
//!
//! Sends the market question to a research model (Perplexity sonar by
//! default) through the shared chat backend and returns its summary.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use super::ResearchProvider;
use crate::llm::prompt::build_research_prompt;
use crate::llm::{ChatBackend, ChatRequest};
use crate::types::Market;

pub const DEFAULT_RESEARCH_MODEL: &str = "perplexity/sonar-pro";
const DEFAULT_TEMPERATURE: f32 = 0.2;
const DEFAULT_MAX_TOKENS: u32 = 2000;

pub struct WebResearcher {
    backend: Arc<dyn ChatBackend>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl WebResearcher {
    pub fn new(backend: Arc<dyn ChatBackend>, model: Option<String>) -> Self {
        Self {
            backend,
            model: model.unwrap_or_else(|| DEFAULT_RESEARCH_MODEL.to_string()),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl ResearchProvider for WebResearcher {
    async fn research(&self, market: &Market) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            system: None,
            user: build_research_prompt(market),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let started = Instant::now();
        let summary = self
            .backend
            .complete(&request)
            .await
            .with_context(|| format!("Research call failed (model={})", self.model))?;

        info!(
            market_id = %market.id,
            model = %self.model,
            length = summary.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Web research complete"
        );

        Ok(summary.trim().to_string())
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
