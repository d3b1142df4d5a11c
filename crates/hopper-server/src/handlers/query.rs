use axum::{
    extract::{Json, State},
    response::IntoResponse,
};
use tracing::{info, instrument};

use hopper_core::api_types::QueryRequest;
use hopper_core::Request;

use crate::handlers::error_response;
use crate::state::AppState;

#[instrument(skip(state, req), fields(user_id = %req.user_id))]
pub async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> axum::response::Response {
    let context = match req.context {
        Some(turns) => turns,
        None => match state
            .orchestrator
            .history()
            .recent_turns(&req.user_id, state.config.conversation.max_turns)
            .await
        {
            Ok(turns) => turns,
            Err(e) => {
                tracing::warn!(error = %e, "History unavailable, starting without context");
                Vec::new()
            }
        },
    };

    let mut request = Request::new(req.user_id, req.text).with_context(context);
    match state.orchestrator.handle(&mut request).await {
        Ok(response) => {
            info!(
                decision = %response.decision.tag,
                sources = response.sources.len(),
                warnings = response.warnings.len(),
                "Query answered"
            );
            Json(response).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Query failed");
            error_response("Query failed", &e)
        }
    }
}

pub async fn router_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.router().stats())
}
