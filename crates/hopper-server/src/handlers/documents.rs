use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, info};
use uuid::Uuid;

use hopper_core::api_types::{IngestRequest, IngestResponse, MetadataPatchRequest, SearchRequest, SearchResponse};
use hopper_core::{HopperError, RetrievalQuery};

use crate::handlers::error_response;
use crate::state::AppState;

pub async fn ingest_document(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> axum::response::Response {
    info!(owner = %req.owner, chars = req.text.len(), "Ingesting document");

    match state
        .orchestrator
        .retriever()
        .ingest(&req.text, &req.owner, req.metadata)
        .await
    {
        Ok(ingestion) => (
            StatusCode::CREATED,
            Json(IngestResponse {
                document_id: ingestion.document_id,
                entities: ingestion.entities,
                relations_added: ingestion.relations_added,
            }),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Ingestion failed");
            error_response("Ingestion failed", &e)
        }
    }
}

pub async fn search_documents(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> axum::response::Response {
    if req.query.trim().is_empty() {
        return error_response("Search failed", &HopperError::Validation("query must not be empty".into()));
    }

    let embedding = match state.orchestrator.embedder().embed(&req.query).await {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "Query embedding failed");
            return error_response("Search failed", &e);
        }
    };

    let settings = state.orchestrator.settings();
    let query = RetrievalQuery {
        owner: req.owner,
        embedding,
        text: Some(req.query),
        top_k: req.top_k.unwrap_or(settings.top_k),
        hop_depth: req.hop_depth.unwrap_or(settings.hop_depth),
    };
    let retrieval = state.orchestrator.retriever().retrieve(&query).await;
    info!(results = retrieval.items.len(), "Search complete");

    Json(SearchResponse {
        items: retrieval.items,
        entities: retrieval.entities,
        warning: retrieval.warning,
    })
    .into_response()
}

pub async fn patch_metadata(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<MetadataPatchRequest>,
) -> impl IntoResponse {
    if !req.patch.is_object() {
        return error_response(
            "Metadata patch failed",
            &HopperError::Validation("patch must be a JSON object".into()),
        );
    }

    match state.graph.patch_document_metadata(&req.owner, id, &req.patch).await {
        Ok(document) => {
            info!(document_id = %id, "Metadata patched");
            Json(document).into_response()
        }
        Err(e) => {
            error!(document_id = %id, error = %e, "Metadata patch failed");
            error_response("Metadata patch failed", &e)
        }
    }
}
