//! Deterministic stand-ins for the remote services.
//!
//! `ScriptedBackend` answers chat completions by model id and counts the
//! calls it receives. `ScriptedFeed` serves markets, prices and
//! resolutions from in-memory tables that test code can change mid-run.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use augur::llm::{ChatBackend, ChatRequest};
use augur::platforms::MarketFeed;
use augur::types::{AugurError, Market};

/// Canned reply for one model.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Reject(String),
}

#[derive(Default)]
pub struct ScriptedBackend {
    replies: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<ChatRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer `model` with a well-formed vote.
    pub fn vote(&self, model: &str, prediction: &str, confidence: f64) {
        let body = format!(
            r#"{{"prediction":"{prediction}","confidence":{confidence},"reasoning":"scripted"}}"#
        );
        self.reply(model, Reply::Text(body));
    }

    pub fn reply(&self, model: &str, reply: Reply) {
        self.replies.lock().unwrap().insert(model.to_string(), reply);
    }

    pub fn calls_to(&self, model: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|r| r.model == model).count()
    }

    pub fn last_prompt_to(&self, model: &str) -> Option<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.model == model)
            .map(|r| r.user.clone())
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn complete(&self, request: &ChatRequest) -> Result<String, AugurError> {
        self.calls.lock().unwrap().push(request.clone());
        let reply = self.replies.lock().unwrap().get(&request.model).cloned();
        match reply {
            Some(Reply::Text(t)) => Ok(t),
            Some(Reply::Reject(msg)) => Err(AugurError::Remote {
                service: "scripted".into(),
                message: msg,
            }),
            None => Err(AugurError::Remote {
                service: "scripted".into(),
                message: format!("no script for model {}", request.model),
            }),
        }
    }
}

#[derive(Default)]
pub struct ScriptedFeed {
    markets: Mutex<Vec<Market>>,
    prices: Mutex<HashMap<String, Vec<f64>>>,
    resolutions: Mutex<HashMap<String, String>>,
    /// If set, every call fails with this message.
    force_error: Mutex<Option<String>>,
}

impl ScriptedFeed {
    pub fn with_markets(markets: Vec<Market>) -> Arc<Self> {
        let feed = Self::default();
        *feed.markets.lock().unwrap() = markets;
        Arc::new(feed)
    }

    pub fn set_prices(&self, market_id: &str, prices: &[f64]) {
        self.prices.lock().unwrap().insert(market_id.to_string(), prices.to_vec());
    }

    pub fn settle(&self, market_id: &str, outcome: &str) {
        self.resolutions
            .lock()
            .unwrap()
            .insert(market_id.to_string(), outcome.to_string());
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    fn check(&self) -> Result<()> {
        match self.force_error.lock().unwrap().as_ref() {
            Some(err) => Err(anyhow!("{err}")),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MarketFeed for ScriptedFeed {
    async fn fetch_active_markets(&self) -> Result<Vec<Market>> {
        self.check()?;
        Ok(self.markets.lock().unwrap().clone())
    }

    async fn fetch_prices(&self, market_id: &str) -> Result<Option<Vec<f64>>> {
        self.check()?;
        Ok(self.prices.lock().unwrap().get(market_id).cloned())
    }

    async fn check_resolution(&self, market_id: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self.resolutions.lock().unwrap().get(market_id).cloned())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
