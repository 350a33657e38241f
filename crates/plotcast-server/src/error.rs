//! Error types for the broadcast server's REST layer.
//!
//! [`ApiError`] converts into an Axum HTTP response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use plotcast_fanout::FanoutError;

/// Errors that can occur while answering a REST request.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The fanout task is not running.
    #[error("fanout unavailable: {0}")]
    Fanout(#[from] FanoutError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Fanout(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
