use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{Document, Entity, Relation, RelationType};
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReachedDocument {
    pub document: Document,
    pub hops: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReachedEntity {
    pub entity: Entity,
    pub hops: u32,
}

/// Everything reachable from one start node within a bounded number of hops.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Neighborhood {
    pub documents: Vec<ReachedDocument>,
    pub entities: Vec<ReachedEntity>,
    pub relations: Vec<Relation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PathNode {
    Entity(Entity),
    Document(Document),
}

impl PathNode {
    pub fn id(&self) -> Uuid {
        match self {
            PathNode::Entity(e) => e.id,
            PathNode::Document(d) => d.id,
        }
    }

    /// Entity name, or the first words of a document.
    pub fn label(&self) -> String {
        match self {
            PathNode::Entity(e) => e.name.clone(),
            PathNode::Document(d) => {
                let words: Vec<&str> = d.text.split_whitespace().take(8).collect();
                format!("note \"{}\"", words.join(" "))
            }
        }
    }
}

/// A chain of nodes linked by relations: `relations[i]` joins `nodes[i]`
/// and `nodes[i + 1]`, in either direction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphPath {
    pub nodes: Vec<PathNode>,
    pub relations: Vec<Relation>,
}

impl GraphPath {
    pub fn hops(&self) -> usize {
        self.relations.len()
    }

    /// One line, e.g. `Bug 42 <-[FIXED_BY]- Port change -[DISCUSSED_IN]-> Standup`.
    pub fn describe(&self) -> String {
        let mut out = self.nodes.first().map(PathNode::label).unwrap_or_default();
        for (relation, pair) in self.relations.iter().zip(self.nodes.windows(2)) {
            let label = relation.relation_type.as_label();
            if relation.source_id == pair[0].id() {
                out.push_str(&format!(" -[{label}]-> "));
            } else {
                out.push_str(&format!(" <-[{label}]- "));
            }
            out.push_str(&pair[1].label());
        }
        out
    }
}

/// Graph storage collaborator. Every operation is scoped by owner id; an
/// implementation must never return another owner's nodes.
#[async_trait]
pub trait GraphStore: Send + Sync {
    fn backend(&self) -> &str;

    async fn is_available(&self) -> bool;

    /// Inserts the entity, or folds it into the existing node with the same
    /// (type, normalized name) key. Returns the stored node.
    async fn merge_entity(&self, entity: &Entity) -> Result<Entity>;

    /// Adds an edge. An identical (source, type, target) edge is not duplicated.
    async fn add_relation(&self, relation: &Relation) -> Result<()>;

    async fn store_document(&self, document: &Document) -> Result<()>;

    async fn get_document(&self, owner: &str, id: Uuid) -> Result<Option<Document>>;

    async fn patch_document_metadata(
        &self,
        owner: &str,
        id: Uuid,
        patch: &serde_json::Value,
    ) -> Result<Document>;

    /// Best `top_k` documents by cosine similarity, ties broken by recency.
    async fn similarity_search(
        &self,
        owner: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>>;

    /// Breadth-first walk from `start` over edges in either direction.
    /// An empty `edge_types` slice means every edge type.
    async fn traverse(
        &self,
        owner: &str,
        start: Uuid,
        depth: u32,
        edge_types: &[RelationType],
    ) -> Result<Neighborhood>;

    /// Simple paths of at most `max_hops` relations between the entities
    /// named `from` and `to` (matched by normalized name, any type),
    /// shortest first, at most `limit` of them.
    async fn find_paths(
        &self,
        owner: &str,
        from: &str,
        to: &str,
        max_hops: u32,
        limit: usize,
    ) -> Result<Vec<GraphPath>>;

    async fn entity_count(&self, owner: Option<&str>) -> Result<u64>;

    async fn relation_count(&self, owner: Option<&str>) -> Result<u64>;
}

/// Highest score first; equal scores prefer the more recently created document.
pub fn rank_scored(results: &mut [ScoredDocument]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.document.created_at.cmp(&a.document.created_at))
    });
}
