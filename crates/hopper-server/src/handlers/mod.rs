pub mod conversations;
pub mod documents;
pub mod events;
pub mod graph;
pub mod health;
pub mod query;

use axum::{http::StatusCode, response::IntoResponse, Json};

use hopper_core::HopperError;

/// Maps a failure onto a status code and the `{"error": ...}` body.
pub fn error_response(context: &str, e: &HopperError) -> axum::response::Response {
    let status = match e {
        HopperError::Validation(_) => StatusCode::BAD_REQUEST,
        HopperError::NotFound(_) => StatusCode::NOT_FOUND,
        HopperError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        HopperError::Graph(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(serde_json::json!({ "error": format!("{context}: {e}") })),
    )
        .into_response()
}
