use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::handlers;
use crate::state::AppState;

pub fn create_router() -> Router<AppState> {
    Router::new()
        // Health
        .route("/api/health", get(handlers::health::health_check))
        // Requests
        .route("/api/query", post(handlers::query::handle_query))
        .route("/api/router/stats", get(handlers::query::router_stats))
        // Documents
        .route("/api/documents", post(handlers::documents::ingest_document))
        .route("/api/documents/search", post(handlers::documents::search_documents))
        .route("/api/documents/{id}/metadata", patch(handlers::documents::patch_metadata))
        // Graph
        .route("/api/graph/paths", get(handlers::graph::find_paths))
        // Conversations
        .route("/api/conversations/{user_id}", get(handlers::conversations::get_conversation))
        // Outbox
        .route("/api/outbox", get(handlers::conversations::list_outbox))
        // Progress events
        .route("/api/events", get(handlers::events::stream_events))
}
