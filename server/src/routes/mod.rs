//! API route handlers

pub mod health;
pub mod predict;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

/// Build the application router
pub fn router(state: SharedState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/predict", post(predict::predict_scene))
        .route("/predict/full", post(predict::predict_full))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
