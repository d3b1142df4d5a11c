use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use tracing::{info, warn};

use hopper_core::api_types::HealthResponse;

use crate::state::AppState;

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    info!("Health check requested");

    let graph_connected = state.graph.is_available().await;
    let (entity_count, relation_count) = if graph_connected {
        let entities = state.graph.entity_count(None).await;
        let relations = state.graph.relation_count(None).await;
        match (entities, relations) {
            (Ok(e), Ok(r)) => (e, r),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Graph statistics unavailable: {e}");
                (0, 0)
            }
        }
    } else {
        warn!(backend = state.graph.backend(), "Graph store unreachable");
        (0, 0)
    };

    let status = if graph_connected { "ok" } else { "degraded" };

    let response = HealthResponse {
        status: status.to_string(),
        version: VERSION.to_string(),
        graph_backend: state.graph.backend().to_string(),
        graph_connected,
        generator: state.generator_name.clone(),
        retrieval_strategy: format!("{:?}", state.orchestrator.retriever().strategy()),
        entity_count,
        relation_count,
    };

    (StatusCode::OK, Json(response))
}
