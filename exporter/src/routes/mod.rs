pub mod health;

use axum::{Router, routing::get};

use crate::state::HealthState;

/// Router for the health listener.
pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::health))
        .fallback(health::not_found)
        .with_state(state)
}
