//! End-to-end pipeline scenarios: poll, vote, decide, track odds, settle.

use std::sync::Arc;
use std::time::Duration;

use augur::data::research::{WebResearcher, DEFAULT_RESEARCH_MODEL};
use augur::data::ResearchProvider;
use augur::engine::coordinator::FanOutCoordinator;
use augur::engine::runner::{Pipeline, PipelineQueue};
use augur::llm::voter::{RetryPolicy, VoterClient};
use augur::storage::{MemoryStore, SqliteStore, Store};
use augur::types::{AugurError, Choice, Market, MarketStatus, VoterConfig};

use crate::mock_feed::{Reply, ScriptedBackend, ScriptedFeed};

const CLAUDE: &str = "anthropic/claude-sonnet-4";
const GPT: &str = "openai/gpt-4o";
const GEMINI: &str = "google/gemini-2.5-pro";
const DEEPSEEK: &str = "deepseek/deepseek-chat";

fn voters() -> Vec<VoterConfig> {
    [("claude", CLAUDE), ("gpt", GPT), ("gemini", GEMINI), ("deepseek", DEEPSEEK)]
        .iter()
        .map(|(name, model)| VoterConfig {
            name: name.to_string(),
            model_id: model.to_string(),
            enabled: true,
        })
        .collect()
}

fn market(id: &str, question: &str, prices: &[f64], volume: f64) -> Market {
    let mut m = Market::new(id, question).with_prices(prices);
    m.volume = volume;
    m
}

fn default_markets() -> Vec<Market> {
    vec![
        market("m-rain", "Will it rain in London on Friday?", &[0.4, 0.6], 50_000.0),
        market("m-flat", "Will the index close flat?", &[0.5, 0.5], 10_000.0),
    ]
}

async fn build(store: Arc<dyn Store>, research: bool) -> (Arc<Pipeline>, Arc<ScriptedBackend>, Arc<ScriptedFeed>) {
    let backend = ScriptedBackend::new();
    let feed = ScriptedFeed::with_markets(default_markets());
    let voter = VoterClient::new(
        backend.clone(),
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        },
    );
    let provider: Option<Arc<dyn ResearchProvider>> =
        research.then(|| Arc::new(WebResearcher::new(backend.clone(), None)) as Arc<dyn ResearchProvider>);
    let coordinator = FanOutCoordinator::new(voter, provider).with_research_timeout(Duration::from_secs(5));

    let pipeline = Arc::new(Pipeline::new(store, feed.clone(), coordinator));
    pipeline.register_voters(&voters()).await.unwrap();
    (pipeline, backend, feed)
}

async fn sqlite() -> Arc<dyn Store> {
    Arc::new(SqliteStore::connect("sqlite::memory:").await.unwrap())
}

#[tokio::test]
async fn test_full_lifecycle_over_sqlite() {
    let (pipeline, backend, feed) = build(sqlite().await, true).await;
    let store = pipeline.store().clone();

    assert_eq!(pipeline.poll_markets().await.unwrap(), 2);
    let listed = store.list_markets(Some(MarketStatus::Active)).await.unwrap();
    assert_eq!(listed[0].id, "m-rain", "highest volume first");

    // Two YES, one NO, one voter rejected outright.
    backend.reply(DEFAULT_RESEARCH_MODEL, Reply::Text("Met Office: heavy rain expected Friday".into()));
    backend.vote(CLAUDE, "YES", 0.8);
    backend.vote(GPT, "YES", 0.8);
    backend.vote(GEMINI, "NO", 0.6);
    backend.reply(DEEPSEEK, Reply::Reject("model not available".into()));

    let run = pipeline.run_market("m-rain").await.unwrap();
    assert_eq!(run.votes, 4);
    assert_eq!(run.errored, 1);
    assert_eq!(run.decision, Some(Choice::Yes));
    // edge 0.8 - 0.4 = 0.4 → $80
    assert_eq!(run.bet_amount, 80.0);

    // Rejections are not retried.
    assert_eq!(backend.calls_to(DEEPSEEK), 1);
    let prompt = backend.last_prompt_to(CLAUDE).unwrap();
    assert!(prompt.contains("heavy rain expected Friday"));

    let stored = store.get_market("m-rain").await.unwrap().unwrap();
    assert_eq!(stored.research.as_deref(), Some("Met Office: heavy rain expected Friday"));

    let votes = store.votes_for_market("m-rain").await.unwrap();
    assert_eq!(votes.len(), 4);
    let failed = votes.iter().find(|v| v.voter == "deepseek").unwrap();
    assert_eq!(failed.choice, Choice::NoTrade);
    assert!(failed.error.is_some());

    let decision = store.get_decision("m-rain").await.unwrap().unwrap();
    assert_eq!(decision.bet_odds, 0.4);
    assert_eq!(decision.agreement_ratio, 0.6667);

    // Every voter abstains on the second market.
    for model in [CLAUDE, GPT, GEMINI, DEEPSEEK] {
        backend.vote(model, "NO_TRADE", 0.5);
    }
    let run = pipeline.run_market("m-flat").await.unwrap();
    assert_eq!(run.decision, Some(Choice::NoTrade));
    assert_eq!(run.bet_amount, 0.0);

    // Only the directional decision is active.
    let active = store.active_decisions().await.unwrap();
    assert_eq!(active.len(), 1);
    feed.set_prices("m-rain", &[0.55, 0.45]);
    assert_eq!(pipeline.update_odds().await.unwrap(), 1);
    assert_eq!(store.get_decision("m-rain").await.unwrap().unwrap().current_odds, 0.55);

    // Nothing settled yet.
    assert_eq!(pipeline.check_resolutions().await.unwrap(), 0);

    feed.settle("m-rain", "Yes");
    feed.settle("m-flat", "No");
    assert_eq!(pipeline.check_resolutions().await.unwrap(), 2);

    let rain = store.get_decision("m-rain").await.unwrap().unwrap();
    assert_eq!(rain.is_correct, Some(true));
    assert_eq!(rain.pnl, Some(120.0));
    let flat = store.get_decision("m-flat").await.unwrap().unwrap();
    assert_eq!(flat.is_correct, None);
    assert_eq!(flat.pnl, Some(0.0));

    let rain_market = store.get_market("m-rain").await.unwrap().unwrap();
    assert_eq!(rain_market.status, MarketStatus::Resolved);
    assert_eq!(rain_market.outcome.as_deref(), Some("Yes"));

    // Resolution is terminal.
    assert_eq!(pipeline.check_resolutions().await.unwrap(), 0);
    let err = pipeline.ledger().resolve("m-rain", "No").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AugurError>(),
        Some(AugurError::DuplicateResolution(_))
    ));

    // A settled market can't be re-voted: the scored record stays intact.
    backend.vote(GEMINI, "NO", 0.9);
    let err = pipeline.run_market("m-rain").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AugurError>(),
        Some(AugurError::AlreadyResolved(_))
    ));
    assert_eq!(store.get_decision("m-rain").await.unwrap().unwrap(), rain);

    let summary = pipeline.ledger().summary().await.unwrap();
    assert_eq!(summary.total_markets, 2);
    assert_eq!(summary.total_votes, 8);
    assert_eq!(summary.resolved_markets, 2);
    assert_eq!(summary.total_pnl, 120.0);
    assert_eq!(summary.accuracy_pct, 100.0);

    let history = pipeline.ledger().pnl_history().await.unwrap();
    assert_eq!(history.last().unwrap().cumulative_pnl, 120.0);
}

#[tokio::test]
async fn test_no_on_cheap_side_loses_stake() {
    let (pipeline, backend, feed) = build(Arc::new(MemoryStore::new()), false).await;
    pipeline.poll_markets().await.unwrap();

    backend.vote(CLAUDE, "NO", 0.9);
    backend.vote(GPT, "NO", 0.7);
    backend.vote(GEMINI, "YES", 0.6);
    backend.vote(DEEPSEEK, "NO_TRADE", 0.5);

    let run = pipeline.run_market("m-rain").await.unwrap();
    assert_eq!(run.decision, Some(Choice::No));
    // NO priced at 0.6, majority confidence 0.8 → edge 0.2 → $40
    assert_eq!(run.bet_amount, 40.0);

    feed.settle("m-rain", "Yes");
    assert_eq!(pipeline.check_resolutions().await.unwrap(), 1);
    let d = pipeline.store().get_decision("m-rain").await.unwrap().unwrap();
    assert_eq!(d.is_correct, Some(false));
    assert_eq!(d.pnl, Some(-40.0));

    let by_voter = pipeline.ledger().by_voter().await.unwrap();
    let claude = by_voter.iter().find(|v| v.voter == "claude").unwrap();
    assert_eq!(claude.incorrect, 1);
    let deepseek = by_voter.iter().find(|v| v.voter == "deepseek").unwrap();
    assert_eq!(deepseek.no_trade, 1);
}

#[tokio::test]
async fn test_all_voters_failing_yields_no_trade() {
    let (pipeline, backend, _) = build(Arc::new(MemoryStore::new()), false).await;
    pipeline.poll_markets().await.unwrap();
    for model in [CLAUDE, GPT, GEMINI, DEEPSEEK] {
        backend.reply(model, Reply::Text("I'd rather not say".into()));
    }

    let run = pipeline.run_market("m-rain").await.unwrap();
    assert_eq!(run.votes, 4);
    assert_eq!(run.errored, 4);
    assert_eq!(run.decision, Some(Choice::NoTrade));

    let d = pipeline.store().get_decision("m-rain").await.unwrap().unwrap();
    assert_eq!(d.avg_confidence, 0.0);
    assert_eq!(d.agreement_ratio, 0.0);
    assert_eq!(d.bet_amount, 0.0);
}

#[tokio::test]
async fn test_disabled_voters_are_not_called() {
    let (pipeline, backend, _) = build(Arc::new(MemoryStore::new()), false).await;
    pipeline.poll_markets().await.unwrap();
    for name in ["gemini", "deepseek"] {
        assert!(pipeline.store().set_voter_enabled(name, false).await.unwrap());
    }
    backend.vote(CLAUDE, "YES", 0.7);
    backend.vote(GPT, "YES", 0.7);

    let run = pipeline.run_market("m-flat").await.unwrap();
    assert_eq!(run.votes, 2);
    assert_eq!(backend.calls_to(GEMINI), 0);
    assert_eq!(backend.calls_to(DEEPSEEK), 0);

    // Re-registering keeps the stored flags.
    assert_eq!(pipeline.register_voters(&voters()).await.unwrap(), 0);
    assert_eq!(pipeline.store().enabled_voters().await.unwrap().len(), 2);

    for name in ["claude", "gpt"] {
        pipeline.store().set_voter_enabled(name, false).await.unwrap();
    }
    let run = pipeline.run_market("m-rain").await.unwrap();
    assert_eq!(run.votes, 0);
    assert_eq!(run.decision, None);
    assert!(pipeline.store().get_decision("m-rain").await.unwrap().is_none());
}

#[tokio::test]
async fn test_run_new_markets_skips_voted_markets() {
    let (pipeline, backend, _) = build(Arc::new(MemoryStore::new()), false).await;
    pipeline.poll_markets().await.unwrap();
    for model in [CLAUDE, GPT, GEMINI, DEEPSEEK] {
        backend.vote(model, "YES", 0.6);
    }

    assert_eq!(pipeline.run_new_markets().await.unwrap(), 2);
    assert_eq!(pipeline.run_new_markets().await.unwrap(), 0);
    assert_eq!(backend.calls_to(CLAUDE), 2);
}

#[tokio::test]
async fn test_feed_outage_is_reported() {
    let (pipeline, _, feed) = build(Arc::new(MemoryStore::new()), false).await;
    feed.set_error("gamma api down");
    assert!(pipeline.poll_markets().await.is_err());
    feed.clear_error();
    assert_eq!(pipeline.poll_markets().await.unwrap(), 2);
}

#[tokio::test]
async fn test_rerun_supersedes_votes() {
    let (pipeline, backend, _) = build(sqlite().await, false).await;
    pipeline.poll_markets().await.unwrap();

    for model in [CLAUDE, GPT, GEMINI, DEEPSEEK] {
        backend.vote(model, "YES", 0.9);
    }
    pipeline.run_market("m-rain").await.unwrap();
    let first = pipeline.store().get_decision("m-rain").await.unwrap().unwrap();

    for model in [CLAUDE, GPT, GEMINI, DEEPSEEK] {
        backend.vote(model, "NO", 0.9);
    }
    pipeline.run_market("m-rain").await.unwrap();

    let votes = pipeline.store().votes_for_market("m-rain").await.unwrap();
    assert_eq!(votes.len(), 4);
    assert!(votes.iter().all(|v| v.choice == Choice::No));
    let second = pipeline.store().get_decision("m-rain").await.unwrap().unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.final_decision, Choice::No);
}

#[tokio::test]
async fn test_queued_runs_complete() {
    let (pipeline, backend, _) = build(Arc::new(MemoryStore::new()), false).await;
    pipeline.poll_markets().await.unwrap();
    for model in [CLAUDE, GPT, GEMINI, DEEPSEEK] {
        backend.vote(model, "YES", 0.7);
    }

    let handle = PipelineQueue::spawn(pipeline.clone(), 8);
    let rain = handle.submit("m-rain").unwrap();
    let flat = handle.submit("m-flat").unwrap();
    let ghost = handle.submit("m-ghost").unwrap();

    assert_eq!(rain.wait().await.unwrap().decision, Some(Choice::Yes));
    assert_eq!(flat.wait().await.unwrap().votes, 4);
    let err = ghost.wait().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AugurError>(),
        Some(AugurError::MarketNotFound(_))
    ));
}
