//! Pipeline runner.
//!
//! `Pipeline` holds the passes the scheduler and the REST surface invoke:
//! run one market, run every unvoted market, poll the feed, refresh odds,
//! check resolutions. Each batch pass isolates per-market failures: one
//! bad market is logged and the pass moves on.
//!
//! `PipelineQueue` takes on-demand runs off the request path. `submit`
//! returns a `RunTicket` at once; the run executes on its own task and
//! the ticket can be awaited for the result or simply dropped.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::coordinator::FanOutCoordinator;
use super::ledger::Ledger;
use crate::platforms::MarketFeed;
use crate::storage::Store;
use crate::strategy::consensus;
use crate::types::{round_to, AugurError, Choice, MarketStatus, VoterConfig};

/// Result of one market run.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunSummary {
    pub market_id: String,
    pub votes: usize,
    pub errored: usize,
    /// `None` when no voters were enabled and consensus was skipped.
    pub decision: Option<Choice>,
    pub bet_amount: f64,
}

pub struct Pipeline {
    store: Arc<dyn Store>,
    feed: Arc<dyn MarketFeed>,
    coordinator: FanOutCoordinator,
    ledger: Ledger,
}

impl Pipeline {
    pub fn new(store: Arc<dyn Store>, feed: Arc<dyn MarketFeed>, coordinator: FanOutCoordinator) -> Self {
        Self {
            ledger: Ledger::new(store.clone()),
            store,
            feed,
            coordinator,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Add configured voters the store doesn't know yet. Voters already
    /// stored keep their enabled flag.
    pub async fn register_voters(&self, voters: &[VoterConfig]) -> Result<usize> {
        let known = self.store.list_voters().await?;
        let mut added = 0;
        for voter in voters {
            if known.iter().any(|k| k.name == voter.name) {
                continue;
            }
            self.store.upsert_voter(voter).await?;
            added += 1;
        }
        info!(configured = voters.len(), added, "Voters registered");
        Ok(added)
    }

    /// Full run for one market: fan out, persist votes, decide.
    pub async fn run_market(&self, market_id: &str) -> Result<RunSummary> {
        let market = self
            .store
            .get_market(market_id)
            .await?
            .ok_or_else(|| AugurError::MarketNotFound(market_id.to_string()))?;

        // Resolution is terminal: votes and decision stay as scored.
        let decision_resolved = self
            .store
            .get_decision(market_id)
            .await?
            .is_some_and(|d| d.is_resolved());
        if market.status == MarketStatus::Resolved || decision_resolved {
            warn!(market_id, "Market already resolved, refusing run");
            return Err(AugurError::AlreadyResolved(market_id.to_string()).into());
        }

        // Roster is fixed for the whole run.
        let roster = self.store.enabled_voters().await?;
        info!(market_id, voters = roster.len(), "Pipeline run started");

        let fanout = self.coordinator.collect_votes(&market, &roster).await;

        if !fanout.research.is_empty() {
            self.store
                .set_market_research(market_id, &fanout.research, chrono::Utc::now())
                .await
                .context("Failed to store research")?;
        }

        for vote in &fanout.votes {
            self.store
                .upsert_vote(vote)
                .await
                .with_context(|| format!("Failed to store vote from {}", vote.voter))?;
        }

        let errored = fanout.votes.iter().filter(|v| !v.is_ballot()).count();
        if fanout.votes.is_empty() {
            warn!(market_id, "No votes collected, skipping consensus");
            return Ok(RunSummary {
                market_id: market_id.to_string(),
                votes: 0,
                errored: 0,
                decision: None,
                bet_amount: 0.0,
            });
        }

        let outcome = consensus::decide(&market, &fanout.votes);
        let stored = self.store.upsert_decision(&outcome.decision).await?;

        info!(
            market_id,
            decision = %stored.final_decision,
            avg_confidence = stored.avg_confidence,
            agreement = stored.agreement_ratio,
            bet_amount = stored.bet_amount,
            "Pipeline run complete"
        );

        Ok(RunSummary {
            market_id: market_id.to_string(),
            votes: fanout.votes.len(),
            errored,
            decision: Some(stored.final_decision),
            bet_amount: stored.bet_amount,
        })
    }

    /// Run every active market that has no votes yet. Returns how many
    /// runs succeeded.
    pub async fn run_new_markets(&self) -> Result<usize> {
        let markets = self.store.list_markets(Some(MarketStatus::Active)).await?;
        let mut ran = 0;
        for market in markets {
            if !self.store.votes_for_market(&market.id).await?.is_empty() {
                continue;
            }
            match self.run_market(&market.id).await {
                Ok(_) => ran += 1,
                Err(e) => error!(market_id = %market.id, error = %e, "Pipeline run failed"),
            }
        }
        info!(ran, "New-market pass complete");
        Ok(ran)
    }

    /// Pull active markets from the feed into the store.
    pub async fn poll_markets(&self) -> Result<usize> {
        let markets = self
            .feed
            .fetch_active_markets()
            .await
            .with_context(|| format!("Market poll failed ({})", self.feed.name()))?;

        let mut stored = 0;
        for market in &markets {
            if !market.prices_consistent() {
                warn!(market_id = %market.id, "Outcome/price count mismatch, not stored");
                continue;
            }
            match self.store.upsert_market(market).await {
                Ok(()) => stored += 1,
                Err(e) => warn!(market_id = %market.id, error = %e, "Failed to store market"),
            }
        }
        info!(feed = self.feed.name(), fetched = markets.len(), stored, "Market poll complete");
        Ok(stored)
    }

    /// Refresh `current_odds` on every active decision from the feed.
    pub async fn update_odds(&self) -> Result<usize> {
        let active = self.store.active_decisions().await?;
        let mut updated = 0;
        for decision in &active {
            let prices = match self.feed.fetch_prices(&decision.market_id).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(market_id = %decision.market_id, error = %e, "Price fetch failed");
                    continue;
                }
            };
            let Some(yes) = prices.as_deref().and_then(|p| p.first().copied()) else {
                debug!(market_id = %decision.market_id, "No prices available");
                continue;
            };
            match self.store.update_current_odds(&decision.market_id, round_to(yes, 4)).await {
                Ok(true) => updated += 1,
                Ok(false) => {}
                Err(e) => warn!(market_id = %decision.market_id, error = %e, "Failed to store odds"),
            }
        }
        info!(active = active.len(), updated, "Odds update complete");
        Ok(updated)
    }

    /// Resolve every open decision whose market has settled.
    pub async fn check_resolutions(&self) -> Result<usize> {
        let open = self.store.open_decisions().await?;
        let mut resolved = 0;

        for decision in &open {
            let market_id = decision.market_id.as_str();
            let stored_outcome = match self.store.get_market(market_id).await {
                Ok(Some(m)) if m.status == MarketStatus::Resolved => m.outcome,
                Ok(_) => None,
                Err(e) => {
                    warn!(market_id, error = %e, "Failed to load market");
                    continue;
                }
            };

            let outcome = match stored_outcome {
                Some(o) => o,
                None => match self.feed.check_resolution(market_id).await {
                    Ok(Some(o)) => {
                        if let Err(e) = self.store.mark_market_resolved(market_id, &o).await {
                            warn!(market_id, error = %e, "Failed to mark market resolved");
                        }
                        o
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(market_id, error = %e, "Resolution check failed");
                        continue;
                    }
                },
            };

            match self.ledger.resolve(market_id, &outcome).await {
                Ok(_) => resolved += 1,
                Err(e) => match e.downcast_ref::<AugurError>() {
                    Some(AugurError::DuplicateResolution(_)) => {
                        debug!(market_id, "Already resolved, skipping");
                    }
                    _ => error!(market_id, error = %e, "Resolution failed"),
                },
            }
        }

        info!(open = open.len(), resolved, "Resolution check complete");
        Ok(resolved)
    }
}

// ---------------------------------------------------------------------------
// On-demand run queue
// ---------------------------------------------------------------------------

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

struct RunRequest {
    market_id: String,
    reply: oneshot::Sender<Result<RunSummary>>,
}

/// Acknowledgement of a queued run.
#[derive(Debug)]
pub struct RunTicket {
    pub market_id: String,
    reply: oneshot::Receiver<Result<RunSummary>>,
}

impl RunTicket {
    /// Wait for the run to finish.
    pub async fn wait(self) -> Result<RunSummary> {
        self.reply
            .await
            .context("Pipeline run dropped before completing")?
    }
}

/// Cloneable submission side of the queue.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<RunRequest>,
}

impl PipelineHandle {
    /// Queue a run without waiting for it. Fails only if the queue is
    /// full or shut down.
    pub fn submit(&self, market_id: &str) -> Result<RunTicket> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .try_send(RunRequest {
                market_id: market_id.to_string(),
                reply,
            })
            .map_err(|e| anyhow::anyhow!("Pipeline queue unavailable: {e}"))?;
        debug!(market_id, "Run queued");
        Ok(RunTicket {
            market_id: market_id.to_string(),
            reply: rx,
        })
    }
}

pub struct PipelineQueue {
    pipeline: Arc<Pipeline>,
    rx: mpsc::Receiver<RunRequest>,
}

impl PipelineQueue {
    pub fn new(pipeline: Arc<Pipeline>, capacity: usize) -> (Self, PipelineHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { pipeline, rx }, PipelineHandle { tx })
    }

    /// Spawn the dispatcher and return its handle.
    pub fn spawn(pipeline: Arc<Pipeline>, capacity: usize) -> PipelineHandle {
        let (queue, handle) = Self::new(pipeline, capacity);
        tokio::spawn(queue.run());
        handle
    }

    /// Dispatch requests until every handle is dropped. Each run gets its
    /// own task so runs for different markets proceed concurrently.
    pub async fn run(mut self) {
        while let Some(req) = self.rx.recv().await {
            let pipeline = self.pipeline.clone();
            tokio::spawn(async move {
                let result = pipeline.run_market(&req.market_id).await;
                if let Err(e) = &result {
                    error!(market_id = %req.market_id, error = %e, "On-demand run failed");
                }
                // Receiver may have been dropped: fire-and-forget.
                let _ = req.reply.send(result);
            });
        }
        info!("Pipeline queue closed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
