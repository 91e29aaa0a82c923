//! In-process store used by tests and dry runs.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{ResolutionRecord, Store};
use crate::types::{Choice, Decision, Market, MarketStatus, Vote, VoterConfig};

#[derive(Default)]
struct Inner {
    markets: HashMap<String, Market>,
    /// (market_id, voter) → vote
    votes: BTreeMap<(String, String), Vote>,
    decisions: HashMap<String, Decision>,
    voters: BTreeMap<String, VoterConfig>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(a: &Decision, b: &Decision) -> std::cmp::Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.market_id.cmp(&a.market_id))
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_market(&self, market: &Market) -> Result<()> {
        let mut inner = self.inner.write().await;
        let mut next = market.clone();
        if let Some(prev) = inner.markets.get(&market.id) {
            next.created_at = prev.created_at;
            if next.research.is_none() {
                next.research = prev.research.clone();
                next.research_at = prev.research_at;
            }
            if prev.status == MarketStatus::Resolved {
                next.status = MarketStatus::Resolved;
                next.outcome = prev.outcome.clone();
            }
        }
        next.updated_at = Utc::now();
        inner.markets.insert(next.id.clone(), next);
        Ok(())
    }

    async fn get_market(&self, market_id: &str) -> Result<Option<Market>> {
        Ok(self.inner.read().await.markets.get(market_id).cloned())
    }

    async fn list_markets(&self, status: Option<MarketStatus>) -> Result<Vec<Market>> {
        let inner = self.inner.read().await;
        let mut markets: Vec<Market> = inner
            .markets
            .values()
            .filter(|m| status.map_or(true, |s| m.status == s))
            .cloned()
            .collect();
        markets.sort_by(|a, b| b.volume.total_cmp(&a.volume).then_with(|| a.id.cmp(&b.id)));
        Ok(markets)
    }

    async fn set_market_research(&self, market_id: &str, research: &str, at: DateTime<Utc>) -> Result<()> {
        if let Some(m) = self.inner.write().await.markets.get_mut(market_id) {
            m.research = Some(research.to_string());
            m.research_at = Some(at);
            m.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_market_resolved(&self, market_id: &str, outcome: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(m) = inner.markets.get_mut(market_id) else {
            return Ok(false);
        };
        m.status = MarketStatus::Resolved;
        m.outcome = Some(outcome.to_string());
        m.updated_at = Utc::now();
        Ok(true)
    }

    async fn upsert_vote(&self, vote: &Vote) -> Result<()> {
        self.inner
            .write()
            .await
            .votes
            .insert((vote.market_id.clone(), vote.voter.clone()), vote.clone());
        Ok(())
    }

    async fn votes_for_market(&self, market_id: &str) -> Result<Vec<Vote>> {
        let inner = self.inner.read().await;
        Ok(inner
            .votes
            .values()
            .filter(|v| v.market_id == market_id)
            .cloned()
            .collect())
    }

    async fn all_votes(&self) -> Result<Vec<Vote>> {
        let mut votes: Vec<Vote> = self.inner.read().await.votes.values().cloned().collect();
        votes.sort_by_key(|v| v.created_at);
        Ok(votes)
    }

    async fn count_votes(&self) -> Result<u64> {
        Ok(self.inner.read().await.votes.len() as u64)
    }

    async fn upsert_decision(&self, decision: &Decision) -> Result<Decision> {
        let mut inner = self.inner.write().await;
        let stored = match inner.decisions.get(&decision.market_id) {
            Some(prev) if prev.is_resolved() => return Ok(prev.clone()),
            Some(prev) => Decision {
                id: prev.id,
                created_at: prev.created_at,
                pnl: prev.pnl,
                is_correct: prev.is_correct,
                resolved_at: prev.resolved_at,
                updated_at: Utc::now(),
                ..decision.clone()
            },
            None => decision.clone(),
        };
        inner.decisions.insert(stored.market_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn get_decision(&self, market_id: &str) -> Result<Option<Decision>> {
        Ok(self.inner.read().await.decisions.get(market_id).cloned())
    }

    async fn list_decisions(&self, page: u32, limit: u32) -> Result<Vec<Decision>> {
        let mut all: Vec<Decision> = self.inner.read().await.decisions.values().cloned().collect();
        all.sort_by(newest_first);
        let offset = (page.max(1) - 1) as usize * limit as usize;
        Ok(all.into_iter().skip(offset).take(limit as usize).collect())
    }

    async fn count_decisions(&self) -> Result<u64> {
        Ok(self.inner.read().await.decisions.len() as u64)
    }

    async fn open_decisions(&self) -> Result<Vec<Decision>> {
        let mut open: Vec<Decision> = self
            .inner
            .read()
            .await
            .decisions
            .values()
            .filter(|d| !d.is_resolved())
            .cloned()
            .collect();
        open.sort_by(newest_first);
        Ok(open)
    }

    async fn active_decisions(&self) -> Result<Vec<Decision>> {
        Ok(self
            .open_decisions()
            .await?
            .into_iter()
            .filter(|d| d.final_decision != Choice::NoTrade)
            .collect())
    }

    async fn resolved_decisions(&self) -> Result<Vec<Decision>> {
        let mut resolved: Vec<Decision> = self
            .inner
            .read()
            .await
            .decisions
            .values()
            .filter(|d| d.is_resolved())
            .cloned()
            .collect();
        resolved.sort_by_key(|d| d.resolved_at);
        Ok(resolved)
    }

    async fn apply_resolution(&self, market_id: &str, resolution: &ResolutionRecord) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.decisions.get_mut(market_id) {
            Some(d) if !d.is_resolved() => {
                d.pnl = Some(resolution.pnl);
                d.is_correct = resolution.is_correct;
                d.resolved_at = Some(resolution.resolved_at);
                d.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_current_odds(&self, market_id: &str, odds: f64) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(d) = inner.decisions.get_mut(market_id) else {
            return Ok(false);
        };
        d.current_odds = odds;
        d.updated_at = Utc::now();
        Ok(true)
    }

    async fn upsert_voter(&self, voter: &VoterConfig) -> Result<()> {
        self.inner
            .write()
            .await
            .voters
            .insert(voter.name.clone(), voter.clone());
        Ok(())
    }

    async fn list_voters(&self) -> Result<Vec<VoterConfig>> {
        Ok(self.inner.read().await.voters.values().cloned().collect())
    }

    async fn set_voter_enabled(&self, name: &str, enabled: bool) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(v) = inner.voters.get_mut(name) else {
            return Ok(false);
        };
        v.enabled = enabled;
        Ok(true)
    }
}
