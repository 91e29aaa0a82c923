//! Fan-out coordinator.
//!
//! For one market: gather best-effort research, build one shared prompt,
//! then ask every voter in the roster snapshot concurrently. Each voter
//! call is isolated. A failure becomes an errored `NO_TRADE` vote and
//! never disturbs the others. The returned set is complete: every voter
//! in the roster has exactly one vote in it.

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::data::ResearchProvider;
use crate::llm::prompt::{build_prediction_prompt, system_prompt};
use crate::llm::voter::VoterClient;
use crate::types::{Market, Vote, VoterRoster};

pub const DEFAULT_RESEARCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Votes from one fan-out, plus the research text they were given.
#[derive(Debug, Clone)]
pub struct FanOut {
    pub votes: Vec<Vote>,
    /// Empty when research was disabled, failed or timed out.
    pub research: String,
}

pub struct FanOutCoordinator {
    voter: VoterClient,
    research: Option<Arc<dyn ResearchProvider>>,
    research_timeout: Duration,
}

impl FanOutCoordinator {
    pub fn new(voter: VoterClient, research: Option<Arc<dyn ResearchProvider>>) -> Self {
        Self {
            voter,
            research,
            research_timeout: DEFAULT_RESEARCH_TIMEOUT,
        }
    }

    pub fn with_research_timeout(mut self, timeout: Duration) -> Self {
        self.research_timeout = timeout;
        self
    }

    /// Research context for `market`, or "" on any failure.
    async fn gather_research(&self, market: &Market) -> String {
        let Some(provider) = &self.research else {
            return String::new();
        };

        match tokio::time::timeout(self.research_timeout, provider.research(market)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(market_id = %market.id, provider = provider.name(), error = %e, "Research failed, continuing without it");
                String::new()
            }
            Err(_) => {
                warn!(
                    market_id = %market.id,
                    provider = provider.name(),
                    timeout_secs = self.research_timeout.as_secs(),
                    "Research timed out, continuing without it"
                );
                String::new()
            }
        }
    }

    /// One vote per roster voter. Completes only when every voter has
    /// answered or failed.
    pub async fn collect_votes(&self, market: &Market, roster: &VoterRoster) -> FanOut {
        if roster.is_empty() {
            info!(market_id = %market.id, "No enabled voters");
            return FanOut {
                votes: Vec::new(),
                research: String::new(),
            };
        }

        let research = self.gather_research(market).await;
        let now = Utc::now();
        let system = system_prompt(now);
        let prompt = build_prediction_prompt(market, &research, now);
        debug!(market_id = %market.id, prompt_len = prompt.len(), research_len = research.len(), "Prompt built");

        let calls = roster.iter().map(|(voter, model_id)| {
            let (system, prompt) = (&system, &prompt);
            async move {
                match self.voter.cast_vote(voter, model_id, system, prompt).await {
                    Ok(resp) => {
                        info!(
                            market_id = %market.id,
                            voter,
                            model = model_id,
                            choice = %resp.vote.choice,
                            confidence = resp.vote.confidence,
                            latency_ms = resp.latency_ms,
                            attempts = resp.attempts,
                            "Vote received"
                        );
                        Vote {
                            id: Uuid::new_v4(),
                            market_id: market.id.clone(),
                            voter: voter.to_string(),
                            choice: resp.vote.choice,
                            confidence: resp.vote.confidence,
                            rationale: resp.vote.rationale,
                            raw_response: resp.raw,
                            latency_ms: resp.latency_ms,
                            error: None,
                            created_at: Utc::now(),
                        }
                    }
                    Err(failure) => {
                        error!(
                            market_id = %market.id,
                            voter,
                            model = model_id,
                            latency_ms = failure.latency_ms,
                            error = %failure.source,
                            "Voter failed"
                        );
                        Vote::failed(&market.id, voter, failure.source.to_string(), failure.latency_ms)
                    }
                }
            }
        });

        let votes = join_all(calls).await;
        let errored = votes.iter().filter(|v| !v.is_ballot()).count();
        info!(market_id = %market.id, votes = votes.len(), errored, "Fan-out complete");

        FanOut { votes, research }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::voter::RetryPolicy;
    use crate::llm::{ChatBackend, ChatRequest, MockChatBackend};
    use crate::types::{AugurError, Choice, VoterConfig};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn no_wait() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn roster(pairs: &[(&str, &str)]) -> VoterRoster {
        let configs: Vec<VoterConfig> = pairs
            .iter()
            .map(|(n, m)| VoterConfig {
                name: n.to_string(),
                model_id: m.to_string(),
                enabled: true,
            })
            .collect();
        VoterRoster::from_configs(&configs)
    }

    struct FixedResearch(&'static str);

    #[async_trait]
    impl ResearchProvider for FixedResearch {
        async fn research(&self, _market: &Market) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct HangingResearch;

    #[async_trait]
    impl ResearchProvider for HangingResearch {
        async fn research(&self, _market: &Market) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("too late".into())
        }
        fn name(&self) -> &str {
            "hanging"
        }
    }

    struct FailingResearch;

    #[async_trait]
    impl ResearchProvider for FailingResearch {
        async fn research(&self, _market: &Market) -> anyhow::Result<String> {
            anyhow::bail!("search API down")
        }
        fn name(&self) -> &str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_mixed_voters_are_isolated() {
        let mut backend = MockChatBackend::new();
        backend
            .expect_complete()
            .withf(|r| r.model == "m/good")
            .returning(|_| Ok(r#"{"prediction":"YES","confidence":0.9,"reasoning":"r"}"#.into()));
        backend
            .expect_complete()
            .withf(|r| r.model == "m/rejects")
            .returning(|_| {
                Err(AugurError::Remote {
                    service: "openrouter".into(),
                    message: "400 bad model".into(),
                })
            });
        backend
            .expect_complete()
            .withf(|r| r.model == "m/garbled")
            .returning(|_| Ok("I think yes".into()));

        let coord = FanOutCoordinator::new(VoterClient::new(Arc::new(backend), no_wait()), None);
        let market = Market::new("m1", "Will it rain?").with_prices(&[0.4, 0.6]);
        let out = coord
            .collect_votes(&market, &roster(&[("good", "m/good"), ("bad", "m/rejects"), ("ugly", "m/garbled")]))
            .await;

        assert_eq!(out.votes.len(), 3);
        let by_name = |n: &str| out.votes.iter().find(|v| v.voter == n).unwrap();
        assert_eq!(by_name("good").choice, Choice::Yes);
        assert!(by_name("good").is_ballot());
        for failed in ["bad", "ugly"] {
            let v = by_name(failed);
            assert_eq!(v.choice, Choice::NoTrade);
            assert_eq!(v.confidence, 0.0);
            assert!(v.error.is_some());
        }
        assert!(by_name("ugly").error.as_deref().unwrap().contains("Malformed"));
    }

    #[tokio::test]
    async fn test_empty_roster_makes_no_calls() {
        let backend = MockChatBackend::new();
        let coord = FanOutCoordinator::new(
            VoterClient::new(Arc::new(backend), no_wait()),
            Some(Arc::new(FixedResearch("unused"))),
        );
        let out = coord.collect_votes(&Market::new("m1", "?"), &VoterRoster::default()).await;
        assert!(out.votes.is_empty());
        assert!(out.research.is_empty());
    }

    #[tokio::test]
    async fn test_research_reaches_prompt() {
        let mut backend = MockChatBackend::new();
        backend
            .expect_complete()
            .withf(|r| r.user.contains("Storm front arriving Tuesday"))
            .times(1)
            .returning(|_| Ok(r#"{"prediction":"NO","confidence":0.6}"#.into()));

        let coord = FanOutCoordinator::new(
            VoterClient::new(Arc::new(backend), no_wait()),
            Some(Arc::new(FixedResearch("Storm front arriving Tuesday"))),
        );
        let out = coord.collect_votes(&Market::new("m1", "?"), &roster(&[("a", "m/a")])).await;
        assert_eq!(out.research, "Storm front arriving Tuesday");
        assert_eq!(out.votes[0].choice, Choice::No);
    }

    #[tokio::test]
    async fn test_research_failure_and_timeout_degrade_to_empty() {
        for provider in [
            Arc::new(FailingResearch) as Arc<dyn ResearchProvider>,
            Arc::new(HangingResearch) as Arc<dyn ResearchProvider>,
        ] {
            let mut backend = MockChatBackend::new();
            backend
                .expect_complete()
                .times(1)
                .returning(|_| Ok(r#"{"prediction":"YES","confidence":0.7}"#.into()));

            let coord = FanOutCoordinator::new(VoterClient::new(Arc::new(backend), no_wait()), Some(provider))
                .with_research_timeout(Duration::from_millis(50));
            let out = coord.collect_votes(&Market::new("m1", "?"), &roster(&[("a", "m/a")])).await;
            assert!(out.research.is_empty());
            assert_eq!(out.votes.len(), 1);
            assert!(out.votes[0].is_ballot());
        }
    }

    /// Tracks how many calls are in flight at once.
    struct SlowBackend {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ChatBackend for SlowBackend {
        async fn complete(&self, _request: &ChatRequest) -> Result<String, AugurError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(r#"{"prediction":"YES","confidence":0.5}"#.into())
        }
    }

    #[tokio::test]
    async fn test_voters_are_called_concurrently() {
        let backend = Arc::new(SlowBackend {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let coord = FanOutCoordinator::new(VoterClient::new(backend.clone(), no_wait()), None);
        let out = coord
            .collect_votes(&Market::new("m1", "?"), &roster(&[("a", "m/a"), ("b", "m/b"), ("c", "m/c")]))
            .await;
        assert_eq!(out.votes.len(), 3);
        assert_eq!(backend.peak.load(Ordering::SeqCst), 3);
    }
}
