//! REST endpoint handlers.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Liveness probe |
//! | `GET` | `/api/stats` | Fanout table sizes |

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::Utc;

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// `GET /api/stats`: connection, topic and subscription counts.
pub async fn stats(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let stats = state.fanout.stats().await?;
    let uptime_secs = Utc::now()
        .signed_duration_since(state.started_at)
        .num_seconds()
        .max(0);
    Ok(Json(serde_json::json!({
        "connections": stats.connections,
        "topics": stats.topics,
        "subscribed_connections": stats.subscribed_connections,
        "subscriptions": stats.subscriptions,
        "started_at": state.started_at,
        "uptime_secs": uptime_secs,
    })))
}
