//! Polymarket integration.
//!
//! Uses the Gamma API for market discovery, live prices and resolution
//! status. Market data is free and unauthenticated.
//!
//! Gamma API: https://gamma-api.polymarket.com

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::platforms::MarketFeed;
use crate::types::{Market, MarketStatus};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";
const DEFAULT_LIMIT: u32 = 50;
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// A closed market whose outcome trades above this price is treated as won.
const SETTLED_PRICE: f64 = 0.9;

// ---------------------------------------------------------------------------
// Gamma API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GammaMarket {
    /// Gamma ids arrive as strings or numbers depending on the endpoint.
    #[serde(default, deserialize_with = "de_opt_string")]
    pub id: Option<String>,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default, rename = "endDate")]
    pub end_date: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default, rename = "umaResolutionStatus")]
    pub uma_resolution_status: Option<String>,
    /// JSON-encoded list: "[\"Yes\",\"No\"]"
    #[serde(default)]
    pub outcomes: Option<String>,
    /// JSON-encoded list: "[\"0.65\",\"0.35\"]"
    #[serde(default, rename = "outcomePrices")]
    pub outcome_prices: Option<String>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub volume: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub liquidity: Option<f64>,
    #[serde(default)]
    pub outcome: Option<String>,
}

fn de_opt_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<String>, D::Error> {
    Ok(match serde_json::Value::deserialize(d)? {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn de_opt_f64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<f64>, D::Error> {
    Ok(match serde_json::Value::deserialize(d)? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Parse Gamma's JSON-in-a-string list format, e.g. "[\"0.65\",\"0.35\"]".
pub fn parse_string_list(s: &str) -> Vec<String> {
    serde_json::from_str::<Vec<serde_json::Value>>(s)
        .map(|items| {
            items
                .into_iter()
                .map(|v| match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parse outcome prices; any unparseable entry invalidates the list.
pub fn parse_outcome_prices(s: &str) -> Option<Vec<f64>> {
    let items = parse_string_list(s);
    if items.is_empty() {
        return None;
    }
    items.iter().map(|p| p.trim().parse::<f64>().ok()).collect()
}

fn parse_end_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|nd| nd.and_hms_opt(23, 59, 59))
                .map(|ndt| ndt.and_utc())
        })
}

impl GammaMarket {
    /// Convert into the internal `Market` type.
    pub fn to_market(&self) -> Option<Market> {
        let id = self.id.clone().filter(|id| !id.is_empty())?;
        if self.question.is_empty() {
            return None;
        }

        let mut outcomes = self.outcomes.as_deref().map(parse_string_list).unwrap_or_default();
        if outcomes.is_empty() {
            outcomes = vec!["Yes".to_string(), "No".to_string()];
        }
        let outcome_prices = self
            .outcome_prices
            .as_deref()
            .and_then(parse_outcome_prices)
            .unwrap_or_default();

        let mut market = Market::new(id, self.question.clone());
        market.description = self.description.clone();
        market.slug = self.slug.clone();
        market.outcomes = outcomes;
        market.outcome_prices = outcome_prices;
        market.volume = self.volume.unwrap_or(0.0);
        market.liquidity = self.liquidity.unwrap_or(0.0);
        market.end_date = self.end_date.as_deref().and_then(parse_end_date);
        market.status = if self.closed {
            MarketStatus::Closed
        } else {
            MarketStatus::Active
        };

        if !market.prices_consistent() {
            warn!(
                market_id = %market.id,
                outcomes = market.outcomes.len(),
                prices = market.outcome_prices.len(),
                "Outcome/price count mismatch, skipping market"
            );
            return None;
        }
        Some(market)
    }

    fn is_settled(&self) -> bool {
        self.resolved
            || self
                .uma_resolution_status
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case("resolved"))
    }

    /// Winning outcome label if the market has closed and settled.
    ///
    /// Prefers inference from a near-unity price, then the explicit
    /// outcome field.
    pub fn infer_resolution(&self) -> Option<String> {
        if !(self.closed && self.is_settled()) {
            return None;
        }

        if let Some(prices) = self.outcome_prices.as_deref().and_then(parse_outcome_prices) {
            if prices.len() >= 2 {
                if prices[0] > SETTLED_PRICE {
                    return Some("Yes".to_string());
                }
                if prices[1] > SETTLED_PRICE {
                    return Some("No".to_string());
                }
            }
        }

        self.outcome.clone().filter(|o| !o.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct PolymarketClient {
    http: Client,
    base_url: String,
    limit: u32,
}

impl PolymarketClient {
    pub fn new(base_url: Option<String>, limit: Option<u32>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build Polymarket HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url
                .unwrap_or_else(|| GAMMA_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            limit: limit.unwrap_or(DEFAULT_LIMIT),
        })
    }

    /// Fetch active markets by volume from the Gamma API.
    pub async fn fetch_gamma_markets(&self) -> Result<Vec<GammaMarket>> {
        let url = format!("{}/markets", self.base_url);
        debug!("Fetching Polymarket markets from Gamma API");

        let resp = self
            .http
            .get(&url)
            .query(&[
                ("active", "true"),
                ("closed", "false"),
                ("order", "volume"),
                ("ascending", "false"),
                ("limit", &self.limit.to_string()),
            ])
            .send()
            .await
            .context("Gamma API request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Gamma API error {status}: {body}");
        }

        let markets: Vec<GammaMarket> = resp
            .json()
            .await
            .context("Failed to parse Gamma markets response")?;

        info!(count = markets.len(), "Fetched raw Gamma markets");
        Ok(markets)
    }

    /// Fetch a single market; `None` on 404.
    pub async fn fetch_gamma_market(&self, market_id: &str) -> Result<Option<GammaMarket>> {
        let url = format!("{}/markets/{}", self.base_url, urlencoding::encode(market_id));

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Gamma API request failed for market {market_id}"))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Gamma API error {status} for market {market_id}: {body}");
        }

        let market: GammaMarket = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse Gamma market {market_id}"))?;
        Ok(Some(market))
    }
}

// ---------------------------------------------------------------------------
// MarketFeed trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl MarketFeed for PolymarketClient {
    async fn fetch_active_markets(&self) -> Result<Vec<Market>> {
        let gamma = self.fetch_gamma_markets().await?;
        let markets: Vec<Market> = gamma.iter().filter_map(GammaMarket::to_market).collect();
        info!(count = markets.len(), "Polymarket markets normalized");
        Ok(markets)
    }

    async fn fetch_prices(&self, market_id: &str) -> Result<Option<Vec<f64>>> {
        Ok(self
            .fetch_gamma_market(market_id)
            .await?
            .and_then(|gm| gm.to_market())
            .map(|m| m.outcome_prices)
            .filter(|p| !p.is_empty()))
    }

    async fn check_resolution(&self, market_id: &str) -> Result<Option<String>> {
        Ok(self
            .fetch_gamma_market(market_id)
            .await?
            .and_then(|gm| gm.infer_resolution()))
    }

    fn name(&self) -> &str {
        "polymarket"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
