use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::state::HealthState;

/// Health-check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// `GET /health` and `GET /ready`
///
/// `{"status":"ok"}` while the exporter runs, 503 once shutdown started.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    if state.is_alive() {
        (StatusCode::OK, Json(HealthResponse { status: "ok" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "shutting_down",
            }),
        )
    }
}

/// Any other path.
pub async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}
