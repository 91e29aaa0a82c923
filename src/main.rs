//! AUGUR: multi-model consensus agent for prediction markets.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the pipeline over the SQLite store, starts the dashboard and
//! runs the scheduled passes with graceful shutdown.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use augur::config;
use augur::dashboard::{self, DashboardState};
use augur::data::research::WebResearcher;
use augur::data::ResearchProvider;
use augur::engine::coordinator::FanOutCoordinator;
use augur::engine::runner::{Pipeline, PipelineQueue, DEFAULT_QUEUE_CAPACITY};
use augur::llm::openrouter::OpenRouterClient;
use augur::llm::voter::VoterClient;
use augur::llm::ChatBackend;
use augur::platforms::polymarket::PolymarketClient;
use augur::storage::SqliteStore;

const BANNER: &str = r#"
    _   _   _  ___ _   _ ___
   /_\ | | | |/ __| | | | _ \
  / _ \| |_| | (_ | |_| |   /
 /_/ \_\\___/ \___|\___/|_|_\

  Multi-model consensus for prediction markets
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        voters = cfg.voters.len(),
        research = cfg.research.enabled,
        database = %cfg.storage.database_url,
        "AUGUR starting up"
    );

    // -- Initialise components -------------------------------------------

    let api_key = cfg.openrouter_api_key()?;
    let openrouter: Arc<dyn ChatBackend> = Arc::new(OpenRouterClient::new(
        api_key,
        cfg.openrouter.base_url.clone(),
        Some(Duration::from_secs(cfg.openrouter.timeout_secs)),
    )?);

    let voter = VoterClient::new(openrouter.clone(), cfg.retry.policy())
        .with_sampling(cfg.openrouter.temperature, cfg.openrouter.max_tokens);

    let research: Option<Arc<dyn ResearchProvider>> = if cfg.research.enabled {
        Some(Arc::new(
            WebResearcher::new(openrouter.clone(), cfg.research.model.clone())
                .with_sampling(cfg.research.temperature, cfg.research.max_tokens),
        ))
    } else {
        info!("Research disabled, voters will see market data only");
        None
    };

    let coordinator = FanOutCoordinator::new(voter, research)
        .with_research_timeout(Duration::from_secs(cfg.research.timeout_secs));

    let feed = Arc::new(PolymarketClient::new(
        cfg.polymarket.gamma_url.clone(),
        cfg.polymarket.market_limit,
    )?);
    let store = Arc::new(SqliteStore::connect(&cfg.storage.database_url).await?);

    let pipeline = Arc::new(Pipeline::new(store, feed, coordinator));
    let added = pipeline.register_voters(&cfg.voters).await?;
    if added > 0 {
        info!(added, "Registered new voters");
    }

    let queue = PipelineQueue::spawn(pipeline.clone(), DEFAULT_QUEUE_CAPACITY);

    if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState::new(pipeline.clone(), queue.clone()));
        dashboard::spawn_dashboard(state, cfg.dashboard.port).await?;
    } else {
        warn!("Dashboard disabled");
    }

    // -- Main loop -------------------------------------------------------

    let mut poll = tokio::time::interval(secs(cfg.agent.market_poll_interval_secs));
    let mut predict = tokio::time::interval(secs(cfg.agent.prediction_interval_secs));
    let mut odds = tokio::time::interval(secs(cfg.agent.odds_interval_secs));
    let mut resolution = tokio::time::interval(secs(cfg.agent.resolution_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        poll_secs = cfg.agent.market_poll_interval_secs,
        prediction_secs = cfg.agent.prediction_interval_secs,
        odds_secs = cfg.agent.odds_interval_secs,
        resolution_secs = cfg.agent.resolution_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = poll.tick() => {
                // Fresh markets get voted on straight away.
                match pipeline.poll_markets().await {
                    Ok(_) => log_pass("new-markets", pipeline.run_new_markets().await),
                    Err(e) => error!(error = %e, "Market poll failed, continuing to next"),
                }
            }
            _ = predict.tick() => log_pass("prediction", pipeline.run_new_markets().await),
            _ = odds.tick() => log_pass("odds", pipeline.update_odds().await),
            _ = resolution.tick() => log_pass("resolution", pipeline.check_resolutions().await),
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    let summary = pipeline.ledger().summary().await?;
    info!(
        markets = summary.total_markets,
        votes = summary.total_votes,
        resolved = summary.resolved_markets,
        pnl = format!("${:.2}", summary.total_pnl),
        "AUGUR shut down cleanly."
    );

    Ok(())
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n.max(1))
}

fn log_pass(pass: &str, result: Result<usize>) {
    if let Err(e) = result {
        error!(pass, error = %e, "Pass failed, continuing to next");
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("augur=info"));

    let json_logging = std::env::var("AUGUR_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
