//! Persistence layer.
//!
//! The `Store` trait owns the four record sets the agent keeps: markets,
//! votes, decisions and voters. `MemoryStore` backs tests and throwaway
//! runs; `SqliteStore` is the durable store used by the binary.
//!
//! Keys: one vote per (market, voter), one decision per market. A decision
//! upsert never touches `id` or `created_at`, leaves a resolved decision
//! untouched, and resolution itself is a conditional write that succeeds
//! at most once.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{Decision, Market, MarketStatus, Vote, VoterConfig, VoterRoster};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Realised outcome written onto a decision exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionRecord {
    pub pnl: f64,
    pub is_correct: Option<bool>,
    pub resolved_at: DateTime<Utc>,
}

#[async_trait]
pub trait Store: Send + Sync {
    // -- markets --

    /// Insert or refresh a market. Keeps cached research, `created_at`,
    /// and a previously recorded resolution.
    async fn upsert_market(&self, market: &Market) -> Result<()>;
    async fn get_market(&self, market_id: &str) -> Result<Option<Market>>;
    /// Markets ordered by volume, descending. `None` lists every status.
    async fn list_markets(&self, status: Option<MarketStatus>) -> Result<Vec<Market>>;
    async fn set_market_research(&self, market_id: &str, research: &str, at: DateTime<Utc>) -> Result<()>;
    /// Returns false for an unknown market.
    async fn mark_market_resolved(&self, market_id: &str, outcome: &str) -> Result<bool>;

    // -- votes --

    /// Keyed by (market, voter); a re-run replaces the previous vote.
    async fn upsert_vote(&self, vote: &Vote) -> Result<()>;
    /// Votes for one market in voter-name order.
    async fn votes_for_market(&self, market_id: &str) -> Result<Vec<Vote>>;
    async fn all_votes(&self) -> Result<Vec<Vote>>;
    async fn count_votes(&self) -> Result<u64>;

    // -- decisions --

    /// Insert or refresh the consensus fields; returns the stored record.
    /// A resolved decision is returned unchanged.
    async fn upsert_decision(&self, decision: &Decision) -> Result<Decision>;
    async fn get_decision(&self, market_id: &str) -> Result<Option<Decision>>;
    /// Newest first. `page` is 1-based.
    async fn list_decisions(&self, page: u32, limit: u32) -> Result<Vec<Decision>>;
    async fn count_decisions(&self) -> Result<u64>;
    /// Decisions with no resolution yet.
    async fn open_decisions(&self) -> Result<Vec<Decision>>;
    /// Unresolved decisions that are not `NO_TRADE`.
    async fn active_decisions(&self) -> Result<Vec<Decision>>;
    /// Resolved decisions ordered by `resolved_at` ascending.
    async fn resolved_decisions(&self) -> Result<Vec<Decision>>;
    /// Writes the resolution only if the decision is still unresolved.
    /// Returns whether it applied.
    async fn apply_resolution(&self, market_id: &str, resolution: &ResolutionRecord) -> Result<bool>;
    async fn update_current_odds(&self, market_id: &str, odds: f64) -> Result<bool>;

    // -- voters --

    async fn upsert_voter(&self, voter: &VoterConfig) -> Result<()>;
    async fn list_voters(&self) -> Result<Vec<VoterConfig>>;
    /// Returns false for an unknown voter.
    async fn set_voter_enabled(&self, name: &str, enabled: bool) -> Result<bool>;

    /// Snapshot of the enabled voters.
    async fn enabled_voters(&self) -> Result<VoterRoster> {
        Ok(VoterRoster::from_configs(&self.list_voters().await?))
    }
}

// ---------------------------------------------------------------------------
// Shared behaviour tests, run against every store
// ---------------------------------------------------------------------------
