//! Dashboard: Axum REST server over the store and pipeline.
//!
//! CORS enabled for local frontend development.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    routing::{get, post, put},
    Router,
};
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

pub use routes::{AppState, DashboardState};

/// Bind the port and serve in a background task. Returns the bound address.
pub async fn spawn_dashboard(state: AppState, port: u16) -> Result<SocketAddr> {
    let app = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind dashboard port {port}"))?;
    let bound = listener.local_addr()?;
    info!(port = bound.port(), "Dashboard server listening on http://localhost:{}", bound.port());

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Dashboard server error");
        }
    });

    Ok(bound)
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/markets", get(routes::list_markets))
        .route("/api/markets/:id", get(routes::get_market))
        .route("/api/consensus", get(routes::list_consensus))
        .route("/api/consensus/active", get(routes::active_consensus))
        .route("/api/predictions/:market_id", get(routes::get_predictions))
        .route("/api/predictions/:market_id/run", post(routes::run_predictions))
        .route("/api/models", get(routes::list_models))
        .route("/api/models/:name", put(routes::update_model))
        .route("/api/performance/summary", get(routes::performance_summary))
        .route("/api/performance/by-model", get(routes::performance_by_model))
        .route("/api/performance/pnl-history", get(routes::pnl_history))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
