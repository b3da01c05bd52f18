//! HTTP API — Axum server over the bet service.
//!
//! CORS is open for local development, as the handlers carry no auth of
//! their own: callers identify themselves by user id in the request body.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::future::Future;
use tower_http::cors::CorsLayer;
use tracing::info;

pub use routes::AppState;

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/bets", post(routes::create_bet))
        .route("/api/bets/:id", get(routes::get_bet))
        .route("/api/bets/:id/join", post(routes::join_bet))
        .route("/api/bets/:id/resolve", post(routes::resolve_bet))
        .route("/api/bets/:id/agree", post(routes::agree))
        .route("/api/bets/:id/evidence", post(routes::submit_evidence))
        .route("/api/bets/:id/payments", post(routes::record_payment))
        .route("/api/bets/:id/obligations", get(routes::get_obligations))
        .route("/api/users/:id/bets", get(routes::get_user_bets))
        .route("/api/fees", get(routes::get_fee))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

/// Serve the API until `shutdown` resolves.
pub async fn serve<F>(state: AppState, port: u16, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API port {port}"))?;

    info!(port, "API server listening on http://localhost:{port}");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
