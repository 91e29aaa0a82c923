//! Dashboard API route handlers.
//!
//! All endpoints return JSON. Reads go straight to the store; manual runs
//! go through the pipeline queue and are acknowledged before they finish.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::engine::ledger::{PerformanceSummary, PnlPoint, VoterPerformance};
use crate::engine::runner::{Pipeline, PipelineHandle};
use crate::types::{Decision, Market, MarketStatus, Vote, VoterConfig};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub pipeline: Arc<Pipeline>,
    pub queue: PipelineHandle,
}

impl DashboardState {
    pub fn new(pipeline: Arc<Pipeline>, queue: PipelineHandle) -> Self {
        Self { pipeline, queue }
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Unavailable(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            ApiError::Internal(e) => {
                error!(error = %e, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct MarketsQuery {
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MarketDetail {
    #[serde(flatten)]
    pub market: Market,
    pub votes: Vec<Vote>,
    pub decision: Option<Decision>,
}

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ConsensusPage {
    pub items: Vec<Decision>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
}

#[derive(Debug, Deserialize)]
pub struct VoterUpdate {
    pub enabled: bool,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /api/markets
pub async fn list_markets(State(state): State<AppState>, Query(q): Query<MarketsQuery>) -> ApiResult<Vec<Market>> {
    let status = q
        .status
        .as_deref()
        .map(str::parse::<MarketStatus>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(state.pipeline.store().list_markets(status).await?))
}

/// GET /api/markets/:id
pub async fn get_market(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<MarketDetail> {
    let store = state.pipeline.store();
    let market = store
        .get_market(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Market {id} not found")))?;
    Ok(Json(MarketDetail {
        votes: store.votes_for_market(&id).await?,
        decision: store.get_decision(&id).await?,
        market,
    }))
}

/// GET /api/consensus?page&limit
pub async fn list_consensus(State(state): State<AppState>, Query(q): Query<PageQuery>) -> ApiResult<ConsensusPage> {
    let page = q.page.unwrap_or(1).max(1);
    let limit = q.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let store = state.pipeline.store();
    Ok(Json(ConsensusPage {
        items: store.list_decisions(page, limit).await?,
        page,
        limit,
        total: store.count_decisions().await?,
    }))
}

/// GET /api/consensus/active
pub async fn active_consensus(State(state): State<AppState>) -> ApiResult<Vec<Decision>> {
    Ok(Json(state.pipeline.store().active_decisions().await?))
}

/// GET /api/predictions/:market_id
pub async fn get_predictions(State(state): State<AppState>, Path(market_id): Path<String>) -> ApiResult<Vec<Vote>> {
    Ok(Json(state.pipeline.store().votes_for_market(&market_id).await?))
}

/// POST /api/predictions/:market_id/run
pub async fn run_predictions(
    State(state): State<AppState>,
    Path(market_id): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let store = state.pipeline.store();
    let Some(market) = store.get_market(&market_id).await? else {
        return Err(ApiError::NotFound(format!("Market {market_id} not found")));
    };
    let settled = store.get_decision(&market_id).await?.is_some_and(|d| d.is_resolved());
    if market.status == MarketStatus::Resolved || settled {
        return Err(ApiError::Conflict(format!("Market {market_id} is already resolved")));
    }

    // The ticket is dropped: the caller only gets the acknowledgement.
    state
        .queue
        .submit(&market_id)
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;
    info!(market_id = %market_id, "Manual run started");

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "started", "market_id": market_id })),
    ))
}

/// GET /api/models
pub async fn list_models(State(state): State<AppState>) -> ApiResult<Vec<VoterConfig>> {
    Ok(Json(state.pipeline.store().list_voters().await?))
}

/// PUT /api/models/:name
pub async fn update_model(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<VoterUpdate>,
) -> ApiResult<VoterConfig> {
    let store = state.pipeline.store();
    if !store.set_voter_enabled(&name, body.enabled).await? {
        return Err(ApiError::NotFound(format!("Voter {name} not found")));
    }
    info!(voter = %name, enabled = body.enabled, "Voter updated");

    let updated = store
        .list_voters()
        .await?
        .into_iter()
        .find(|v| v.name == name)
        .ok_or_else(|| ApiError::NotFound(format!("Voter {name} not found")))?;
    Ok(Json(updated))
}

/// GET /api/performance/summary
pub async fn performance_summary(State(state): State<AppState>) -> ApiResult<PerformanceSummary> {
    Ok(Json(state.pipeline.ledger().summary().await?))
}

/// GET /api/performance/by-model
pub async fn performance_by_model(State(state): State<AppState>) -> ApiResult<Vec<VoterPerformance>> {
    Ok(Json(state.pipeline.ledger().by_voter().await?))
}

/// GET /api/performance/pnl-history
pub async fn pnl_history(State(state): State<AppState>) -> ApiResult<Vec<PnlPoint>> {
    Ok(Json(state.pipeline.ledger().pnl_history().await?))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_status_codes() {
        let cases = [
            (ApiError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ApiError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (ApiError::Conflict("x".into()), StatusCode::CONFLICT),
            (ApiError::Unavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (ApiError::Internal(anyhow::anyhow!("boom")), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_market_detail_flattens_market() {
        let detail = MarketDetail {
            market: Market::new("m1", "Will it rain?"),
            votes: Vec::new(),
            decision: None,
        };
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["id"], "m1");
        assert_eq!(json["question"], "Will it rain?");
        assert!(json["decision"].is_null());
    }

    #[tokio::test]
    async fn test_health_handler() {
        assert_eq!(health().await, StatusCode::OK);
    }
}
