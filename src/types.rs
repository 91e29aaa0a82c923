//! Shared types for the AUGUR agent.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that the voter, strategy,
//! engine and storage modules can depend on them without circular
//! references.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Choice
// ---------------------------------------------------------------------------

/// A directional call: back YES, back NO, or stay out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Choice {
    #[serde(rename = "YES")]
    Yes,
    #[serde(rename = "NO")]
    No,
    #[serde(rename = "NO_TRADE")]
    NoTrade,
}

impl Choice {
    /// Lenient conversion from free text. Anything outside the three-way
    /// enum collapses to `NoTrade`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_uppercase().as_str() {
            "YES" => Choice::Yes,
            "NO" => Choice::No,
            _ => Choice::NoTrade,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Choice::Yes => "YES",
            Choice::No => "NO",
            Choice::NoTrade => "NO_TRADE",
        }
    }

    /// Whether this is a directional (YES/NO) call.
    pub fn is_directional(&self) -> bool {
        !matches!(self, Choice::NoTrade)
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Choice {
    type Err = AugurError;

    /// Strict parse used when reading stored records.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "YES" => Ok(Choice::Yes),
            "NO" => Ok(Choice::No),
            "NO_TRADE" => Ok(Choice::NoTrade),
            other => Err(AugurError::Storage(format!("unknown choice: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

/// Lifecycle of a market: `active` → `closed` → `resolved`, or `archived`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    Active,
    Closed,
    Resolved,
    Archived,
}

impl MarketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketStatus::Active => "active",
            MarketStatus::Closed => "closed",
            MarketStatus::Resolved => "resolved",
            MarketStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MarketStatus {
    type Err = AugurError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(MarketStatus::Active),
            "closed" => Ok(MarketStatus::Closed),
            "resolved" => Ok(MarketStatus::Resolved),
            "archived" => Ok(MarketStatus::Archived),
            other => Err(AugurError::Storage(format!("unknown market status: {other}"))),
        }
    }
}

/// A binary prediction market as ingested from the market feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Market {
    pub id: String,
    pub question: String,
    pub description: Option<String>,
    pub slug: Option<String>,
    /// Outcome labels, typically `["Yes", "No"]`.
    pub outcomes: Vec<String>,
    /// Prices parallel to `outcomes`, each in 0.0–1.0. Need not sum to 1.
    pub outcome_prices: Vec<f64>,
    pub volume: f64,
    pub liquidity: f64,
    pub end_date: Option<DateTime<Utc>>,
    pub status: MarketStatus,
    /// Winning outcome label once resolved.
    pub outcome: Option<String>,
    /// Cached research summary from the last pipeline run.
    pub research: Option<String>,
    pub research_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let yes = self.yes_price().map(|p| format!("{:.0}¢", p * 100.0));
        let no = self.no_price().map(|p| format!("{:.0}¢", p * 100.0));
        write!(
            f,
            "[{}] {} (YES: {} | NO: {} | vol: ${:.0} | {})",
            self.id,
            self.question,
            yes.as_deref().unwrap_or("N/A"),
            no.as_deref().unwrap_or("N/A"),
            self.volume,
            self.status,
        )
    }
}

impl Market {
    /// A fresh active binary market with no prices yet.
    pub fn new(id: impl Into<String>, question: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            question: question.into(),
            description: None,
            slug: None,
            outcomes: vec!["Yes".to_string(), "No".to_string()],
            outcome_prices: Vec::new(),
            volume: 0.0,
            liquidity: 0.0,
            end_date: None,
            status: MarketStatus::Active,
            outcome: None,
            research: None,
            research_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder-style price setter.
    pub fn with_prices(mut self, prices: &[f64]) -> Self {
        self.outcome_prices = prices.to_vec();
        self
    }

    /// First outcome price (the YES side), if any.
    pub fn yes_price(&self) -> Option<f64> {
        self.outcome_prices.first().copied()
    }

    /// Second outcome price (the NO side), if any.
    pub fn no_price(&self) -> Option<f64> {
        self.outcome_prices.get(1).copied()
    }

    /// `outcome_prices` and `outcomes` must line up when both are present.
    pub fn prices_consistent(&self) -> bool {
        self.outcomes.is_empty()
            || self.outcome_prices.is_empty()
            || self.outcomes.len() == self.outcome_prices.len()
    }
}

// ---------------------------------------------------------------------------
// Vote
// ---------------------------------------------------------------------------

/// One voter's judgement on one market for one pipeline run.
///
/// Errored votes are kept for audit but never counted as ballots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vote {
    pub id: Uuid,
    pub market_id: String,
    /// Voter name (roster key), e.g. "claude".
    pub voter: String,
    pub choice: Choice,
    /// 0.0–1.0
    pub confidence: f64,
    pub rationale: String,
    pub raw_response: serde_json::Value,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Vote {
    /// A vote recording a voter failure: `NO_TRADE` at zero confidence.
    pub fn failed(market_id: &str, voter: &str, error: String, latency_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            market_id: market_id.to_string(),
            voter: voter.to_string(),
            choice: Choice::NoTrade,
            confidence: 0.0,
            rationale: String::new(),
            raw_response: serde_json::json!({ "error": error }),
            latency_ms,
            error: Some(error),
            created_at: Utc::now(),
        }
    }

    /// Whether this vote counts toward the tally.
    pub fn is_ballot(&self) -> bool {
        self.error.is_none()
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(e) => write!(f, "{} on {}: ERROR ({e})", self.voter, self.market_id),
            None => write!(
                f,
                "{} on {}: {} @ {:.0}% ({}ms)",
                self.voter,
                self.market_id,
                self.choice,
                self.confidence * 100.0,
                self.latency_ms,
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// The single consensus record for a market. Upserted on every run;
/// resolution fields stay `None` until the market settles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    pub id: Uuid,
    pub market_id: String,
    pub final_decision: Choice,
    pub avg_confidence: f64,
    pub agreement_ratio: f64,
    /// Proposed stake in USD.
    pub bet_amount: f64,
    /// Market price of the chosen side at decision time.
    pub bet_odds: f64,
    /// Latest YES price snapshot.
    pub current_odds: f64,
    pub pnl: Option<f64>,
    pub is_correct: Option<bool>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Decision {
    /// A `NO_TRADE` decision with every numeric field zero.
    pub fn no_trade(market_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            market_id: market_id.to_string(),
            final_decision: Choice::NoTrade,
            avg_confidence: 0.0,
            agreement_ratio: 0.0,
            bet_amount: 0.0,
            bet_odds: 0.0,
            current_odds: 0.0,
            pnl: None,
            is_correct: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    /// Whether a stake was actually proposed.
    pub fn has_bet(&self) -> bool {
        self.final_decision.is_directional() && self.bet_amount > 0.0
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} (conf {:.0}%, agree {:.0}%, bet ${:.2} @ {:.2})",
            self.market_id,
            self.final_decision,
            self.avg_confidence * 100.0,
            self.agreement_ratio * 100.0,
            self.bet_amount,
            self.bet_odds,
        )
    }
}

// ---------------------------------------------------------------------------
// Voters
// ---------------------------------------------------------------------------

/// A configured voter: a display name mapped onto a remote model id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoterConfig {
    pub name: String,
    /// Remote model identifier, e.g. "anthropic/claude-sonnet-4".
    pub model_id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Snapshot of the enabled voters taken once at the start of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoterRoster {
    voters: BTreeMap<String, String>,
}

impl VoterRoster {
    /// Build a snapshot from configs, keeping only enabled voters.
    pub fn from_configs(configs: &[VoterConfig]) -> Self {
        let voters = configs
            .iter()
            .filter(|v| v.enabled)
            .map(|v| (v.name.clone(), v.model_id.clone()))
            .collect();
        Self { voters }
    }

    pub fn len(&self) -> usize {
        self.voters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voters.is_empty()
    }

    /// (voter name, model id) pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.voters.iter().map(|(n, m)| (n.as_str(), m.as_str()))
    }
}

// ---------------------------------------------------------------------------
// Numeric helpers
// ---------------------------------------------------------------------------

/// Round half away from zero to `dp` decimal places.
///
/// Goes through `Decimal` so that e.g. 70.00000000000001 lands on 70.0
/// and 2/3 on 0.6667 without binary float artefacts.
pub fn round_to(value: f64, dp: u32) -> f64 {
    Decimal::from_f64(value)
        .map(|d| d.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for AUGUR.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AugurError {
    /// Network failure, timeout, rate limit or 5xx. Retried.
    #[error("Transient remote error ({service}): {message}")]
    TransientRemote { service: String, message: String },

    /// Upstream rejected the request outright (4xx other than 429).
    #[error("Remote error ({service}): {message}")]
    Remote { service: String, message: String },

    /// Voter output could not be parsed. Never retried.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Research or price source down. Callers degrade gracefully.
    #[error("Upstream unavailable ({service}): {message}")]
    UpstreamUnavailable { service: String, message: String },

    #[error("Decision for market {0} is already resolved")]
    DuplicateResolution(String),

    #[error("Market not found: {0}")]
    MarketNotFound(String),

    /// Market or its decision already settled. Runs are refused.
    #[error("Market {0} is already resolved")]
    AlreadyResolved(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AugurError {
    /// Whether the voter client should try again.
    pub fn is_transient(&self) -> bool {
        matches!(self, AugurError::TransientRemote { .. })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
