use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entity::{EntityType, RelationType};
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub entity_type: EntityType,
    pub surface: String,
    pub confidence: f64,
    /// Byte offset of the first occurrence, when the extractor knows it.
    pub start: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRelation {
    pub source: String,
    pub target: String,
    pub relation_type: RelationType,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Extraction {
    pub entities: Vec<ExtractedEntity>,
    pub relations: Vec<ExtractedRelation>,
}

/// Named-entity extraction collaborator.
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    fn name(&self) -> &str;
    async fn extract(&self, text: &str) -> Result<Extraction>;
}
