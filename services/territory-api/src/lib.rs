//! HTTP boundary of the territory conquest engine.

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

pub mod config;
pub mod handlers;
pub mod state;

use state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/territory/map", get(handlers::map))
        .route("/territory/claim", post(handlers::claim))
        .route(
            "/territory/stake",
            get(handlers::list_stakes).post(handlers::stake),
        )
        .route("/territory/unstake", post(handlers::unstake))
        .route("/territory/attack", post(handlers::attack))
        .route("/territory/defend", post(handlers::defend))
        .route("/territory/contests", get(handlers::list_contests))
        .route(
            "/territory/contests/resolve",
            get(handlers::expiring_contests).post(handlers::resolve_contests),
        )
        .route("/territory/:road_id", get(handlers::territory_detail))
        .with_state(state)
}
