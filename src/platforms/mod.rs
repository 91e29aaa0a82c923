//! Market data integrations.
//!
//! Defines the `MarketFeed` trait: the normalized view of a third-party
//! market venue that the pipeline consumes for market discovery, live
//! prices and resolution status. No order placement lives here.

pub mod polymarket;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::Market;

/// Abstraction over prediction market data sources.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// Fetch currently active markets, normalized.
    async fn fetch_active_markets(&self) -> Result<Vec<Market>>;

    /// Current outcome prices for a market, or `None` if the venue
    /// doesn't know it.
    async fn fetch_prices(&self, market_id: &str) -> Result<Option<Vec<f64>>>;

    /// Winning outcome label if the market has settled upstream.
    async fn check_resolution(&self, market_id: &str) -> Result<Option<String>>;

    /// Feed name for logging.
    fn name(&self) -> &str;
}
