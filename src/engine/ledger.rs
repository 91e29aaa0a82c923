//! Ledger: resolution scoring and performance reports.
//!
//! Resolution is terminal. The store applies it conditionally, so a second
//! event for the same market (say the authoritative status flip arriving
//! after the price-inferred one) is rejected rather than double-counting
//! P&L. Reports are derived read-only from decision and vote history.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;

use crate::storage::{ResolutionRecord, Store};
use crate::types::{round_to, AugurError, Choice, Decision};

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// "YES"/"Y" (any case, trimmed) is YES; anything else is NO.
pub fn normalize_outcome(outcome: &str) -> Choice {
    match outcome.trim().to_uppercase().as_str() {
        "YES" | "Y" => Choice::Yes,
        _ => Choice::No,
    }
}

/// Score `decision` against a realised outcome label.
///
/// No bet (NO_TRADE or zero stake) scores zero with undefined correctness.
/// A winning bet pays out at the decimal odds implied by `bet_odds`; a
/// losing bet, or any bet with no positive odds to pay out at, forfeits
/// the stake.
pub fn score(decision: &Decision, outcome: &str, resolved_at: DateTime<Utc>) -> ResolutionRecord {
    if !decision.has_bet() {
        return ResolutionRecord {
            pnl: 0.0,
            is_correct: None,
            resolved_at,
        };
    }

    let correct = decision.final_decision == normalize_outcome(outcome);
    let pnl = if correct && decision.bet_odds > 0.0 {
        round_to(decision.bet_amount * (1.0 / decision.bet_odds - 1.0), 2)
    } else {
        -decision.bet_amount
    };

    ResolutionRecord {
        pnl,
        is_correct: Some(correct),
        resolved_at,
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PerformanceSummary {
    pub total_markets: u64,
    pub total_votes: u64,
    pub resolved_markets: u64,
    pub accuracy_pct: f64,
    pub total_pnl: f64,
    pub win_rate: f64,
    pub avg_confidence: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VoterPerformance {
    pub voter: String,
    pub total_votes: u64,
    pub correct: u64,
    pub incorrect: u64,
    pub no_trade: u64,
    pub accuracy_pct: f64,
    pub avg_confidence: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PnlPoint {
    /// YYYY-MM-DD of the resolution.
    pub date: String,
    pub pnl: f64,
    pub cumulative_pnl: f64,
}

fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default()
}

fn money(value: Decimal) -> f64 {
    value
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        .to_f64()
        .unwrap_or(0.0)
}

fn pct(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round_to(part as f64 / whole as f64 * 100.0, 1)
    }
}

fn mean_nonzero(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values
        .filter(|v| *v != 0.0)
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        round_to(sum / n as f64, 3)
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

pub struct Ledger {
    store: Arc<dyn Store>,
}

impl Ledger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Resolve the market's decision with `outcome`.
    ///
    /// Fails with `DuplicateResolution` if it was already resolved and
    /// `MarketNotFound` if there is no decision for the market.
    pub async fn resolve(&self, market_id: &str, outcome: &str) -> Result<Decision> {
        let decision = self
            .store
            .get_decision(market_id)
            .await?
            .ok_or_else(|| AugurError::MarketNotFound(market_id.to_string()))?;
        if decision.is_resolved() {
            return Err(AugurError::DuplicateResolution(market_id.to_string()).into());
        }

        let record = score(&decision, outcome, Utc::now());
        if !self.store.apply_resolution(market_id, &record).await? {
            // Lost a race with another resolver.
            return Err(AugurError::DuplicateResolution(market_id.to_string()).into());
        }

        info!(
            market_id,
            outcome,
            decision = %decision.final_decision,
            is_correct = ?record.is_correct,
            pnl = record.pnl,
            "Market resolved"
        );

        Ok(Decision {
            pnl: Some(record.pnl),
            is_correct: record.is_correct,
            resolved_at: Some(record.resolved_at),
            ..decision
        })
    }

    pub async fn summary(&self) -> Result<PerformanceSummary> {
        let total_markets = self.store.list_markets(None).await?.len() as u64;
        let total_votes = self.store.count_votes().await?;
        let resolved = self.store.resolved_decisions().await?;

        let scored = resolved.iter().filter(|d| d.is_correct.is_some()).count() as u64;
        let correct = resolved.iter().filter(|d| d.is_correct == Some(true)).count() as u64;
        let total_pnl: Decimal = resolved.iter().map(|d| to_decimal(d.pnl.unwrap_or(0.0))).sum();
        let accuracy = pct(correct, scored);

        let all = self.store.list_decisions(1, u32::MAX).await?;
        let avg_confidence = mean_nonzero(all.iter().map(|d| d.avg_confidence));

        Ok(PerformanceSummary {
            total_markets,
            total_votes,
            resolved_markets: resolved.len() as u64,
            accuracy_pct: accuracy,
            total_pnl: money(total_pnl),
            win_rate: accuracy,
            avg_confidence,
        })
    }

    /// Per-voter stats. A directional vote on a scored market counts as
    /// correct when the market's Decision was correct, regardless of which
    /// side the voter took.
    pub async fn by_voter(&self) -> Result<Vec<VoterPerformance>> {
        let outcomes: HashMap<String, bool> = self
            .store
            .resolved_decisions()
            .await?
            .into_iter()
            .filter_map(|d| d.is_correct.map(|c| (d.market_id, c)))
            .collect();

        let mut by_voter: BTreeMap<String, Vec<_>> = BTreeMap::new();
        for vote in self.store.all_votes().await? {
            by_voter.entry(vote.voter.clone()).or_default().push(vote);
        }

        Ok(by_voter
            .into_iter()
            .map(|(voter, votes)| {
                let mut correct = 0;
                let mut incorrect = 0;
                let mut no_trade = 0;
                for v in &votes {
                    if !v.choice.is_directional() {
                        no_trade += 1;
                        continue;
                    }
                    match outcomes.get(&v.market_id) {
                        Some(true) => correct += 1,
                        Some(false) => incorrect += 1,
                        None => {}
                    }
                }
                VoterPerformance {
                    voter,
                    total_votes: votes.len() as u64,
                    correct,
                    incorrect,
                    no_trade,
                    accuracy_pct: pct(correct, correct + incorrect),
                    avg_confidence: mean_nonzero(votes.iter().map(|v| v.confidence)),
                }
            })
            .collect())
    }

    /// Cumulative P&L in resolution order.
    pub async fn pnl_history(&self) -> Result<Vec<PnlPoint>> {
        let mut cumulative = Decimal::ZERO;
        Ok(self
            .store
            .resolved_decisions()
            .await?
            .into_iter()
            .map(|d| {
                let pnl = to_decimal(d.pnl.unwrap_or(0.0));
                cumulative += pnl;
                PnlPoint {
                    date: d
                        .resolved_at
                        .map(|t| t.format("%Y-%m-%d").to_string())
                        .unwrap_or_default(),
                    pnl: money(pnl),
                    cumulative_pnl: money(cumulative),
                }
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
