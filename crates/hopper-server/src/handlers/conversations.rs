use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
};

use hopper_core::api_types::{ConversationParams, ConversationResponse};

use crate::handlers::error_response;
use crate::state::AppState;

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<ConversationParams>,
) -> axum::response::Response {
    let limit = params.limit.unwrap_or(state.config.conversation.max_turns);
    match state.orchestrator.history().recent_turns(&user_id, limit).await {
        Ok(turns) => Json(ConversationResponse { user_id, turns }).into_response(),
        Err(e) => error_response("History unavailable", &e),
    }
}

/// Messages the agent queued for delivery.
pub async fn list_outbox(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.outbox.messages().await)
}
