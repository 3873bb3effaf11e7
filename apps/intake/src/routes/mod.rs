pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::pipeline::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v1/intake", post(handlers::handle_intake))
        .route("/api/v1/intake/:id", get(handlers::handle_get_ledger))
        .route("/api/v1/admin/reprocess", post(handlers::handle_reprocess))
        .with_state(state)
}
