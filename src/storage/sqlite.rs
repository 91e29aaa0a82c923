//! SQLite store via sqlx.
//!
//! Tables are created on connect. Timestamps are stored as fixed-width
//! RFC 3339 text so lexical order matches chronological order; outcome
//! lists, prices and raw voter responses are stored as JSON text.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::info;

use super::{ResolutionRecord, Store};
use crate::types::{Choice, Decision, Market, MarketStatus, Vote, VoterConfig};

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Bad timestamp in store: {raw}"))?
        .with_timezone(&Utc))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and ensure tables.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database URL: {url}"))?
            .create_if_missing(true);

        // An in-memory database lives and dies with its single connection.
        let in_memory = url.contains(":memory:");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {url}"))?;

        let store = Self { pool };
        store.init().await?;
        info!(url, "SQLite store ready");
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS markets (
                id TEXT PRIMARY KEY,
                question TEXT NOT NULL,
                description TEXT,
                slug TEXT,
                outcomes TEXT NOT NULL,        -- JSON array of labels
                outcome_prices TEXT NOT NULL,  -- JSON array of floats
                volume REAL NOT NULL DEFAULT 0,
                liquidity REAL NOT NULL DEFAULT 0,
                end_date TEXT,
                status TEXT NOT NULL,
                outcome TEXT,
                research TEXT,
                research_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS votes (
                id TEXT PRIMARY KEY,
                market_id TEXT NOT NULL,
                voter TEXT NOT NULL,
                choice TEXT NOT NULL,
                confidence REAL NOT NULL,
                rationale TEXT NOT NULL,
                raw_response TEXT NOT NULL,
                latency_ms INTEGER NOT NULL,
                error TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (market_id, voter)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS decisions (
                id TEXT PRIMARY KEY,
                market_id TEXT NOT NULL UNIQUE,
                final_decision TEXT NOT NULL,
                avg_confidence REAL NOT NULL,
                agreement_ratio REAL NOT NULL,
                bet_amount REAL NOT NULL,
                bet_odds REAL NOT NULL,
                current_odds REAL NOT NULL,
                pnl REAL,
                is_correct INTEGER,
                resolved_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS voters (
                name TEXT PRIMARY KEY,
                model_id TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn market_from_row(row: &SqliteRow) -> Result<Market> {
    let outcomes: String = row.try_get("outcomes")?;
    let prices: String = row.try_get("outcome_prices")?;
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Market {
        id: row.try_get("id")?,
        question: row.try_get("question")?,
        description: row.try_get("description")?,
        slug: row.try_get("slug")?,
        outcomes: serde_json::from_str(&outcomes).context("Bad outcomes JSON")?,
        outcome_prices: serde_json::from_str(&prices).context("Bad outcome_prices JSON")?,
        volume: row.try_get("volume")?,
        liquidity: row.try_get("liquidity")?,
        end_date: parse_opt_ts(row.try_get("end_date")?)?,
        status: status.parse()?,
        outcome: row.try_get("outcome")?,
        research: row.try_get("research")?,
        research_at: parse_opt_ts(row.try_get("research_at")?)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

fn vote_from_row(row: &SqliteRow) -> Result<Vote> {
    let id: String = row.try_get("id")?;
    let choice: String = row.try_get("choice")?;
    let raw: String = row.try_get("raw_response")?;
    let latency_ms: i64 = row.try_get("latency_ms")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Vote {
        id: id.parse().context("Bad vote id")?,
        market_id: row.try_get("market_id")?,
        voter: row.try_get("voter")?,
        choice: choice.parse()?,
        confidence: row.try_get("confidence")?,
        rationale: row.try_get("rationale")?,
        raw_response: serde_json::from_str(&raw).context("Bad raw_response JSON")?,
        latency_ms: latency_ms.max(0) as u64,
        error: row.try_get("error")?,
        created_at: parse_ts(&created_at)?,
    })
}

fn decision_from_row(row: &SqliteRow) -> Result<Decision> {
    let id: String = row.try_get("id")?;
    let choice: String = row.try_get("final_decision")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Decision {
        id: id.parse().context("Bad decision id")?,
        market_id: row.try_get("market_id")?,
        final_decision: Choice::from_str(&choice)?,
        avg_confidence: row.try_get("avg_confidence")?,
        agreement_ratio: row.try_get("agreement_ratio")?,
        bet_amount: row.try_get("bet_amount")?,
        bet_odds: row.try_get("bet_odds")?,
        current_odds: row.try_get("current_odds")?,
        pnl: row.try_get("pnl")?,
        is_correct: row.try_get("is_correct")?,
        resolved_at: parse_opt_ts(row.try_get("resolved_at")?)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

fn voter_from_row(row: &SqliteRow) -> Result<VoterConfig> {
    Ok(VoterConfig {
        name: row.try_get("name")?,
        model_id: row.try_get("model_id")?,
        enabled: row.try_get("enabled")?,
    })
}

fn collect<T>(rows: &[SqliteRow], f: fn(&SqliteRow) -> Result<T>) -> Result<Vec<T>> {
    rows.iter().map(f).collect()
}

// ---------------------------------------------------------------------------
// Store implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_market(&self, market: &Market) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO markets (id, question, description, slug, outcomes, outcome_prices,
                volume, liquidity, end_date, status, outcome, research, research_at,
                created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                question = excluded.question,
                description = excluded.description,
                slug = excluded.slug,
                outcomes = excluded.outcomes,
                outcome_prices = excluded.outcome_prices,
                volume = excluded.volume,
                liquidity = excluded.liquidity,
                end_date = excluded.end_date,
                status = CASE WHEN markets.status = 'resolved' THEN markets.status ELSE excluded.status END,
                outcome = CASE WHEN markets.status = 'resolved' THEN markets.outcome ELSE excluded.outcome END,
                research = COALESCE(excluded.research, markets.research),
                research_at = COALESCE(excluded.research_at, markets.research_at),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&market.id)
        .bind(&market.question)
        .bind(&market.description)
        .bind(&market.slug)
        .bind(serde_json::to_string(&market.outcomes)?)
        .bind(serde_json::to_string(&market.outcome_prices)?)
        .bind(market.volume)
        .bind(market.liquidity)
        .bind(market.end_date.map(ts))
        .bind(market.status.as_str())
        .bind(&market.outcome)
        .bind(&market.research)
        .bind(market.research_at.map(ts))
        .bind(ts(market.created_at))
        .bind(ts(Utc::now()))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert market {}", market.id))?;
        Ok(())
    }

    async fn get_market(&self, market_id: &str) -> Result<Option<Market>> {
        let row = sqlx::query("SELECT * FROM markets WHERE id = ?")
            .bind(market_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(market_from_row).transpose()
    }

    async fn list_markets(&self, status: Option<MarketStatus>) -> Result<Vec<Market>> {
        let rows = match status {
            Some(s) => {
                sqlx::query("SELECT * FROM markets WHERE status = ? ORDER BY volume DESC, id ASC")
                    .bind(s.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM markets ORDER BY volume DESC, id ASC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        collect(&rows, market_from_row)
    }

    async fn set_market_research(&self, market_id: &str, research: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE markets SET research = ?, research_at = ?, updated_at = ? WHERE id = ?")
            .bind(research)
            .bind(ts(at))
            .bind(ts(Utc::now()))
            .bind(market_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_market_resolved(&self, market_id: &str, outcome: &str) -> Result<bool> {
        let done = sqlx::query("UPDATE markets SET status = 'resolved', outcome = ?, updated_at = ? WHERE id = ?")
            .bind(outcome)
            .bind(ts(Utc::now()))
            .bind(market_id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn upsert_vote(&self, vote: &Vote) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO votes (id, market_id, voter, choice, confidence, rationale,
                raw_response, latency_ms, error, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(market_id, voter) DO UPDATE SET
                id = excluded.id,
                choice = excluded.choice,
                confidence = excluded.confidence,
                rationale = excluded.rationale,
                raw_response = excluded.raw_response,
                latency_ms = excluded.latency_ms,
                error = excluded.error,
                created_at = excluded.created_at
            "#,
        )
        .bind(vote.id.to_string())
        .bind(&vote.market_id)
        .bind(&vote.voter)
        .bind(vote.choice.as_str())
        .bind(vote.confidence)
        .bind(&vote.rationale)
        .bind(vote.raw_response.to_string())
        .bind(vote.latency_ms as i64)
        .bind(&vote.error)
        .bind(ts(vote.created_at))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert vote {}/{}", vote.market_id, vote.voter))?;
        Ok(())
    }

    async fn votes_for_market(&self, market_id: &str) -> Result<Vec<Vote>> {
        let rows = sqlx::query("SELECT * FROM votes WHERE market_id = ? ORDER BY voter ASC")
            .bind(market_id)
            .fetch_all(&self.pool)
            .await?;
        collect(&rows, vote_from_row)
    }

    async fn all_votes(&self) -> Result<Vec<Vote>> {
        let rows = sqlx::query("SELECT * FROM votes ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        collect(&rows, vote_from_row)
    }

    async fn count_votes(&self) -> Result<u64> {
        let n: i64 = sqlx::query("SELECT COUNT(*) FROM votes")
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;
        Ok(n.max(0) as u64)
    }

    async fn upsert_decision(&self, decision: &Decision) -> Result<Decision> {
        sqlx::query(
            r#"
            INSERT INTO decisions (id, market_id, final_decision, avg_confidence,
                agreement_ratio, bet_amount, bet_odds, current_odds, pnl, is_correct,
                resolved_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(market_id) DO UPDATE SET
                final_decision = excluded.final_decision,
                avg_confidence = excluded.avg_confidence,
                agreement_ratio = excluded.agreement_ratio,
                bet_amount = excluded.bet_amount,
                bet_odds = excluded.bet_odds,
                current_odds = excluded.current_odds,
                updated_at = excluded.updated_at
            WHERE decisions.resolved_at IS NULL
            "#,
        )
        .bind(decision.id.to_string())
        .bind(&decision.market_id)
        .bind(decision.final_decision.as_str())
        .bind(decision.avg_confidence)
        .bind(decision.agreement_ratio)
        .bind(decision.bet_amount)
        .bind(decision.bet_odds)
        .bind(decision.current_odds)
        .bind(decision.pnl)
        .bind(decision.is_correct)
        .bind(decision.resolved_at.map(ts))
        .bind(ts(decision.created_at))
        .bind(ts(Utc::now()))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert decision for {}", decision.market_id))?;

        self.get_decision(&decision.market_id)
            .await?
            .with_context(|| format!("Decision for {} vanished after upsert", decision.market_id))
    }

    async fn get_decision(&self, market_id: &str) -> Result<Option<Decision>> {
        let row = sqlx::query("SELECT * FROM decisions WHERE market_id = ?")
            .bind(market_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decision_from_row).transpose()
    }

    async fn list_decisions(&self, page: u32, limit: u32) -> Result<Vec<Decision>> {
        let offset = (page.max(1) - 1) as i64 * limit as i64;
        let rows = sqlx::query(
            "SELECT * FROM decisions ORDER BY created_at DESC, market_id DESC LIMIT ? OFFSET ?",
        )
        .bind(limit as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        collect(&rows, decision_from_row)
    }

    async fn count_decisions(&self) -> Result<u64> {
        let n: i64 = sqlx::query("SELECT COUNT(*) FROM decisions")
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;
        Ok(n.max(0) as u64)
    }

    async fn open_decisions(&self) -> Result<Vec<Decision>> {
        let rows = sqlx::query(
            "SELECT * FROM decisions WHERE resolved_at IS NULL ORDER BY created_at DESC, market_id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        collect(&rows, decision_from_row)
    }

    async fn active_decisions(&self) -> Result<Vec<Decision>> {
        let rows = sqlx::query(
            "SELECT * FROM decisions WHERE resolved_at IS NULL AND final_decision != 'NO_TRADE' \
             ORDER BY created_at DESC, market_id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        collect(&rows, decision_from_row)
    }

    async fn resolved_decisions(&self) -> Result<Vec<Decision>> {
        let rows = sqlx::query("SELECT * FROM decisions WHERE resolved_at IS NOT NULL ORDER BY resolved_at ASC")
            .fetch_all(&self.pool)
            .await?;
        collect(&rows, decision_from_row)
    }

    async fn apply_resolution(&self, market_id: &str, resolution: &ResolutionRecord) -> Result<bool> {
        let done = sqlx::query(
            "UPDATE decisions SET pnl = ?, is_correct = ?, resolved_at = ?, updated_at = ? \
             WHERE market_id = ? AND resolved_at IS NULL",
        )
        .bind(resolution.pnl)
        .bind(resolution.is_correct)
        .bind(ts(resolution.resolved_at))
        .bind(ts(Utc::now()))
        .bind(market_id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to resolve decision for {market_id}"))?;
        Ok(done.rows_affected() > 0)
    }

    async fn update_current_odds(&self, market_id: &str, odds: f64) -> Result<bool> {
        let done = sqlx::query("UPDATE decisions SET current_odds = ?, updated_at = ? WHERE market_id = ?")
            .bind(odds)
            .bind(ts(Utc::now()))
            .bind(market_id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn upsert_voter(&self, voter: &VoterConfig) -> Result<()> {
        sqlx::query(
            "INSERT INTO voters (name, model_id, enabled) VALUES (?, ?, ?) \
             ON CONFLICT(name) DO UPDATE SET model_id = excluded.model_id, enabled = excluded.enabled",
        )
        .bind(&voter.name)
        .bind(&voter.model_id)
        .bind(voter.enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_voters(&self) -> Result<Vec<VoterConfig>> {
        let rows = sqlx::query("SELECT * FROM voters ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;
        collect(&rows, voter_from_row)
    }

    async fn set_voter_enabled(&self, name: &str, enabled: bool) -> Result<bool> {
        let done = sqlx::query("UPDATE voters SET enabled = ? WHERE name = ?")
            .bind(enabled)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }
}
