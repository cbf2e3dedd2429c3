//! HTTP handlers.

use std::sync::Arc;

use axum::{Json, extract::State};

use hiroba_shared::time::get_jst_timestamp;

use super::super::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "uptime": state.started_at.elapsed().as_secs_f64(),
        "message": "OK",
        "timestamp": get_jst_timestamp(),
    }))
}
