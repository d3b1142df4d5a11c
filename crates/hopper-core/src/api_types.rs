use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::ConversationTurn;
use crate::entity::Entity;
use crate::graph::GraphPath;
use crate::retrieval::RetrievedItem;

// --- Health ---

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub graph_backend: String,
    pub graph_connected: bool,
    pub generator: String,
    pub retrieval_strategy: String,
    pub entity_count: u64,
    pub relation_count: u64,
}

// --- Query ---

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryRequest {
    pub user_id: String,
    pub text: String,
    /// Explicit context. When absent, recent turns from the history store are used.
    #[serde(default)]
    pub context: Option<Vec<ConversationTurn>>,
}

// --- Documents ---

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestRequest {
    pub owner: String,
    pub text: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub document_id: Uuid,
    pub entities: Vec<Entity>,
    pub relations_added: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchRequest {
    pub owner: String,
    pub query: String,
    pub top_k: Option<usize>,
    pub hop_depth: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub items: Vec<RetrievedItem>,
    pub entities: Vec<Entity>,
    pub warning: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MetadataPatchRequest {
    pub owner: String,
    pub patch: serde_json::Value,
}

// --- Graph ---

#[derive(Debug, Deserialize)]
pub struct PathParams {
    pub owner: String,
    pub from: String,
    pub to: String,
    pub max_hops: Option<u32>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PathResponse {
    pub paths: Vec<GraphPath>,
}

// --- Conversations ---

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub user_id: String,
    pub turns: Vec<ConversationTurn>,
}

#[derive(Debug, Deserialize)]
pub struct ConversationParams {
    pub limit: Option<usize>,
}
