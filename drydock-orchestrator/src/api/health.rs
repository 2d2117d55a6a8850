//! Health check
//!
//! Reports the lifecycle state name alongside a plain 200.

use axum::{extract::State, http::StatusCode, response::IntoResponse};

use super::AppState;

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, state.lifecycle.state().to_string())
}
