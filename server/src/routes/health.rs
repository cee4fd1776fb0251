//! Health check endpoint

use axum::{extract::State, Json};

use planet_sentinel::inference::HealthResponse;

use crate::state::SharedState;

/// GET /health - reports whether a model handle is held, and the uptime
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse::new(state.model_loaded()).with_uptime(state.uptime_seconds()))
}
