use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{Document, Entity};
use crate::error::Result;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    Similarity,
    GraphAugmented,
}

impl std::str::FromStr for RetrievalStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "similarity" | "plain" | "vector" => Ok(RetrievalStrategy::Similarity),
            "graph" | "graph_augmented" | "graphrag" => Ok(RetrievalStrategy::GraphAugmented),
            other => Err(format!("unknown retrieval strategy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalQuery {
    pub owner: String,
    pub embedding: Vec<f32>,
    /// Raw query text, used for term-overlap relevance when present.
    pub text: Option<String>,
    pub top_k: usize,
    pub hop_depth: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SupportKind {
    /// Found directly by similarity search.
    Match,
    /// Reached by walking the graph from a match.
    GraphSupport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedItem {
    pub document: Document,
    pub similarity: f32,
    pub relevance: f32,
    pub kind: SupportKind,
    pub hops: u32,
}

/// Outcome of one retrieval. Never an error: an unavailable store yields
/// empty `items` and a `warning`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Retrieval {
    pub strategy: RetrievalStrategy,
    pub items: Vec<RetrievedItem>,
    pub entities: Vec<Entity>,
    pub warning: Option<String>,
}

impl Retrieval {
    pub fn empty(strategy: RetrievalStrategy) -> Self {
        Self {
            strategy,
            items: Vec::new(),
            entities: Vec::new(),
            warning: None,
        }
    }

    pub fn degraded(strategy: RetrievalStrategy, warning: impl Into<String>) -> Self {
        Self {
            warning: Some(warning.into()),
            ..Self::empty(strategy)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Keeps items whose relevance reaches `threshold`.
    pub fn filter_relevant(mut self, threshold: f32) -> Self {
        self.items.retain(|item| item.relevance >= threshold);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ingestion {
    pub document_id: Uuid,
    pub entities: Vec<Entity>,
    pub relations_added: usize,
}

/// Retrieval strategy interface; variants are selected by configuration.
#[async_trait]
pub trait Retriever: Send + Sync {
    fn strategy(&self) -> RetrievalStrategy;

    async fn ingest(
        &self,
        text: &str,
        owner: &str,
        metadata: serde_json::Value,
    ) -> Result<Ingestion>;

    async fn retrieve(&self, query: &RetrievalQuery) -> Retrieval;
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 1)
        .map(|w| w.to_lowercase())
        .collect()
}

/// Share of the query's distinct terms that also appear in `text`, in [0, 1].
pub fn term_overlap(query: &str, text: &str) -> f32 {
    let query_terms = terms(query);
    if query_terms.is_empty() {
        return 0.0;
    }
    let text_terms = terms(text);
    let shared = query_terms.intersection(&text_terms).count();
    shared as f32 / query_terms.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_overlap_is_normalized() {
        assert_eq!(term_overlap("python asyncio tutorial", "python asyncio tutorial"), 1.0);
        let partial = term_overlap("python asyncio tutorial", "Asyncio lets Python run coroutines");
        assert!((partial - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(term_overlap("", "anything"), 0.0);
    }

    #[test]
    fn strategy_parses_aliases() {
        assert_eq!("graph".parse::<RetrievalStrategy>(), Ok(RetrievalStrategy::GraphAugmented));
        assert_eq!("similarity".parse::<RetrievalStrategy>(), Ok(RetrievalStrategy::Similarity));
        assert!("other".parse::<RetrievalStrategy>().is_err());
    }
}
