//! REST API routes configuration

use crate::api::handlers::{self, ApiState};
use axum::{
    routing::{get, post},
    Router,
};

/// Create the API router with all routes
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Ledger
        .route("/blocks", get(handlers::get_blocks))
        .route("/peers", get(handlers::get_peers))
        .route("/pool", get(handlers::get_pool))
        // Wallet
        .route("/address", get(handlers::get_address))
        .route("/balance/{address}", get(handlers::get_balance))
        .route("/transactions", post(handlers::create_transaction))
        .route("/transactions/raw", post(handlers::submit_raw_transaction))
        // Node control
        .route("/mineBlock", post(handlers::mine_block))
        .route("/requestBlockchain", post(handlers::request_blockchain))
        .route("/initialize", post(handlers::initialize))
        .with_state(state)
}
