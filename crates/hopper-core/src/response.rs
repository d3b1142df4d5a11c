use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentRun;
use crate::decision::Decision;
use crate::retrieval::SupportKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Vague,
    Conceptual,
    Exploratory,
    Specific,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Vague => "vague",
            QueryType::Conceptual => "conceptual",
            QueryType::Exploratory => "exploratory",
            QueryType::Specific => "specific",
        }
    }
}

/// Hypothetical answers and reformulations produced for an ambiguous query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expansion {
    pub original: String,
    pub query_type: QueryType,
    pub hypotheses: Vec<String>,
    pub candidate_queries: Vec<String>,
    /// True when the generator was unavailable and templates were used.
    pub used_fallback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub document_id: Uuid,
    pub excerpt: String,
    pub relevance: f32,
    pub kind: SupportKind,
    pub hops: u32,
}

/// What the orchestrator hands back for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub request_id: Uuid,
    pub text: String,
    pub decision: Decision,
    pub sources: Vec<SourceRef>,
    pub agent_run: Option<AgentRun>,
    pub expansion: Option<Expansion>,
    /// Degradations hit along the way, e.g. an unreachable graph store.
    pub warnings: Vec<String>,
}
