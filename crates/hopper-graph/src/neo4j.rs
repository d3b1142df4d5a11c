use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neo4rs::{query, Graph, Node};
use uuid::Uuid;

use hopper_core::config::AppConfig;
use hopper_core::entity::{normalize_name, Document, Entity, EntityType, Relation, RelationType};
use hopper_core::error::{HopperError, Result};
use hopper_core::graph::{
    rank_scored, GraphPath, GraphStore, Neighborhood, PathNode, ReachedDocument, ReachedEntity,
    ScoredDocument,
};

/// Timeout for all Neo4j operations (seconds).
const NEO4J_TIMEOUT_SECS: u64 = 5;

/// Candidates are restricted to the owner's documents before scoring, so
/// other owners can never crowd a user's own documents out of `top_k`.
const SIMILARITY_CYPHER: &str = "MATCH (node:Document {owner: $owner}) \
     WHERE node.embedding IS NOT NULL \
     WITH node, vector.similarity.cosine(node.embedding, $embedding) AS score \
     RETURN node, score \
     ORDER BY score DESC, node.created_at DESC \
     LIMIT $top_k";

/// Upper bound on the variable-length pattern in path queries.
const MAX_PATH_HOPS: u32 = 6;

fn path_cypher(max_hops: u32) -> String {
    let max_hops = max_hops.clamp(1, MAX_PATH_HOPS);
    format!(
        "MATCH (a {{owner: $owner, name_key: $from_key}}), (b {{owner: $owner, name_key: $to_key}}) \
         WHERE a <> b \
         MATCH p = (a)-[*1..{max_hops}]-(b) \
         WHERE all(n IN nodes(p) WHERE n.owner = $owner) \
           AND all(i IN range(0, size(nodes(p)) - 2) WHERE NOT nodes(p)[i] IN nodes(p)[i + 1..]) \
         RETURN nodes(p) AS nodes, \
                [r IN relationships(p) | r.id] AS rel_ids, \
                [r IN relationships(p) | startNode(r).id] AS sources, \
                [r IN relationships(p) | endNode(r).id] AS targets, \
                [r IN relationships(p) | type(r)] AS rel_types, \
                [r IN relationships(p) | coalesce(r.confidence, 1.0)] AS confidences \
         ORDER BY length(p) \
         LIMIT $limit"
    )
}

/// Relation columns of one path row, index-aligned.
#[derive(Default)]
struct PathRelations {
    ids: Vec<String>,
    sources: Vec<String>,
    targets: Vec<String>,
    types: Vec<String>,
    confidences: Vec<f64>,
}

/// Returns `None` when the columns disagree or carry unknown ids or types.
fn assemble_path(owner: &str, nodes: Vec<PathNode>, rels: PathRelations) -> Option<GraphPath> {
    let n = rels.ids.len();
    if nodes.len() != n + 1
        || [rels.sources.len(), rels.targets.len(), rels.types.len()]
            .iter()
            .any(|&len| len != n)
    {
        return None;
    }
    let mut relations = Vec::with_capacity(n);
    for i in 0..n {
        relations.push(Relation {
            id: Uuid::parse_str(&rels.ids[i]).ok()?,
            owner: owner.to_string(),
            source_id: Uuid::parse_str(&rels.sources[i]).ok()?,
            target_id: Uuid::parse_str(&rels.targets[i]).ok()?,
            relation_type: RelationType::from_label(&rels.types[i])?,
            confidence: rels.confidences.get(i).copied().unwrap_or(1.0),
            created_at: Utc::now(),
        });
    }
    Some(GraphPath { nodes, relations })
}

pub struct Neo4jGraphStore {
    graph: Option<Graph>,
    dimension: usize,
}

impl Neo4jGraphStore {
    pub async fn new(config: &AppConfig) -> Self {
        let dimension = config.embedding.dimension;
        let graph_config = &config.graph;
        match Graph::new(
            &graph_config.neo4j_uri,
            &graph_config.neo4j_user,
            &graph_config.neo4j_password,
        )
        .await
        {
            Ok(graph) => {
                tracing::info!(uri = %graph_config.neo4j_uri, "Connected to Neo4j");
                let store = Self {
                    graph: Some(graph),
                    dimension,
                };
                if let Err(e) = store.ensure_schema().await {
                    tracing::warn!(error = %e, "Failed to create Neo4j indexes");
                }
                store
            }
            Err(e) => {
                tracing::warn!(uri = %graph_config.neo4j_uri, error = %e, "Failed to connect to Neo4j, running in degraded mode");
                Self {
                    graph: None,
                    dimension,
                }
            }
        }
    }

    fn graph(&self) -> Result<&Graph> {
        self.graph
            .as_ref()
            .ok_or_else(|| HopperError::Graph("Neo4j not connected".into()))
    }

    async fn ensure_schema(&self) -> Result<()> {
        let graph = self.graph()?;
        let document_index = "CREATE INDEX document_owner IF NOT EXISTS FOR (d:Document) ON (d.owner, d.id)";
        timed(graph.run(query(document_index)))
            .await?
            .map_err(|e| HopperError::Graph(format!("Failed to create document index: {e}")))?;

        for entity_type in EntityType::ALL {
            let label = entity_type.as_label();
            let cypher = format!(
                "CREATE INDEX {}_key IF NOT EXISTS FOR (n:{label}) ON (n.owner, n.name_key)",
                label.to_lowercase()
            );
            timed(graph.run(query(&cypher)))
                .await?
                .map_err(|e| HopperError::Graph(format!("Failed to create index on {label}: {e}")))?;
        }
        Ok(())
    }

    async fn count(&self, cypher: &str, owner: Option<&str>) -> Result<u64> {
        let q = query(cypher).param("owner", owner.unwrap_or_default().to_string());
        let mut stream = timed(self.graph()?.execute(q))
            .await?
            .map_err(|e| HopperError::Graph(format!("Failed to count: {e}")))?;

        match stream.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get("cnt")
                    .map_err(|e| HopperError::Graph(format!("Failed to get count: {e}")))?;
                Ok(count as u64)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(HopperError::Graph(format!("Error counting: {e}"))),
        }
    }
}

/// Wrap any async operation with a timeout, converting timeout to HopperError::Graph.
async fn timed<T, F: Future<Output = T>>(op: F) -> std::result::Result<T, HopperError> {
    tokio::time::timeout(std::time::Duration::from_secs(NEO4J_TIMEOUT_SECS), op)
        .await
        .map_err(|_| {
            tracing::warn!("Neo4j operation timed out after {}s", NEO4J_TIMEOUT_SECS);
            HopperError::Graph(format!(
                "Neo4j operation timed out after {}s",
                NEO4J_TIMEOUT_SECS
            ))
        })
}

fn parse_time(raw: Option<String>) -> DateTime<Utc> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

fn node_id(node: &Node) -> Result<Uuid> {
    let id_str: String = node
        .get("id")
        .map_err(|e| HopperError::Graph(format!("Missing id on node: {e}")))?;
    Uuid::parse_str(&id_str).map_err(|e| HopperError::Graph(format!("Invalid UUID: {e}")))
}

fn node_to_entity(node: &Node) -> Result<Entity> {
    let id = node_id(node)?;
    let entity_type = node
        .labels()
        .iter()
        .find_map(|l| EntityType::from_label(l))
        .ok_or_else(|| HopperError::Graph(format!("Node {id} has no entity label")))?;

    let name: String = node
        .get("name")
        .map_err(|e| HopperError::Graph(format!("Missing name on node: {e}")))?;
    let owner: String = node.get("owner").unwrap_or_default();

    let properties_json: String = node.get("properties").unwrap_or_else(|_| "{}".to_string());
    let properties: serde_json::Value = serde_json::from_str(&properties_json)
        .unwrap_or(serde_json::Value::Object(Default::default()));

    Ok(Entity {
        id,
        owner,
        entity_type,
        name,
        properties,
        confidence: node.get("confidence").unwrap_or(1.0),
        first_seen: parse_time(node.get("first_seen").ok()),
        last_seen: parse_time(node.get("last_seen").ok()),
    })
}

fn node_to_document(node: &Node) -> Result<Document> {
    let id = node_id(node)?;
    let embedding: Vec<f64> = node.get("embedding").unwrap_or_default();
    let metadata_json: String = node.get("metadata").unwrap_or_else(|_| "{}".to_string());

    Ok(Document {
        id,
        owner: node.get("owner").unwrap_or_default(),
        text: node
            .get("text")
            .map_err(|e| HopperError::Graph(format!("Missing text on document: {e}")))?,
        embedding: embedding.into_iter().map(|x| x as f32).collect(),
        metadata: serde_json::from_str(&metadata_json)
            .unwrap_or(serde_json::Value::Object(Default::default())),
        created_at: parse_time(node.get("created_at").ok()),
    })
}

fn is_document(node: &Node) -> bool {
    node.labels().iter().any(|l| *l == "Document")
}

fn to_f64(embedding: &[f32]) -> Vec<f64> {
    embedding.iter().map(|x| *x as f64).collect()
}

fn edge_filter_clause(edge_types: &[RelationType]) -> &'static str {
    if edge_types.is_empty() {
        ""
    } else {
        "AND all(rel IN rels WHERE type(rel) IN $edge_types)"
    }
}

fn edge_labels(edge_types: &[RelationType]) -> Vec<String> {
    edge_types.iter().map(|t| t.as_label().to_string()).collect()
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    fn backend(&self) -> &str {
        "neo4j"
    }

    async fn is_available(&self) -> bool {
        let Ok(graph) = self.graph() else {
            return false;
        };
        matches!(timed(graph.run(query("RETURN 1"))).await, Ok(Ok(())))
    }

    async fn merge_entity(&self, entity: &Entity) -> Result<Entity> {
        let label = entity.entity_type.as_label();
        let name_key = normalize_name(&entity.name);

        // Read the existing node first so properties can be unioned in Rust.
        let find = format!(
            "MATCH (n:{label} {{owner: $owner, name_key: $name_key}}) RETURN n LIMIT 1"
        );
        let mut stream = timed(
            self.graph()?.execute(
                query(&find)
                    .param("owner", entity.owner.clone())
                    .param("name_key", name_key.clone()),
            ),
        )
        .await?
        .map_err(|e| HopperError::Graph(format!("Failed to look up entity: {e}")))?;

        let mut merged = match stream.next().await {
            Ok(Some(row)) => {
                let node: Node = row
                    .get("n")
                    .map_err(|e| HopperError::Graph(format!("Failed to deserialize node: {e}")))?;
                let mut existing = node_to_entity(&node)?;
                existing.absorb(entity);
                existing
            }
            Ok(None) => entity.clone(),
            Err(e) => return Err(HopperError::Graph(format!("Error fetching entity: {e}"))),
        };
        merged.owner = entity.owner.clone();

        let properties_json = serde_json::to_string(&merged.properties)?;
        let cypher = format!(
            "MERGE (n:{label} {{owner: $owner, name_key: $name_key}}) \
             ON CREATE SET n.id = $id, n.name = $name, n.first_seen = $first_seen \
             SET n.properties = $properties, n.confidence = $confidence, \
                 n.first_seen = $first_seen, n.last_seen = $last_seen"
        );
        let q = query(&cypher)
            .param("owner", merged.owner.clone())
            .param("name_key", name_key)
            .param("id", merged.id.to_string())
            .param("name", merged.name.clone())
            .param("properties", properties_json)
            .param("confidence", merged.confidence)
            .param("first_seen", merged.first_seen.to_rfc3339())
            .param("last_seen", merged.last_seen.to_rfc3339());

        timed(self.graph()?.run(q))
            .await?
            .map_err(|e| HopperError::Graph(format!("Failed to store entity {}: {e}", merged.id)))?;

        tracing::debug!(
            entity_id = %merged.id,
            entity_name = %merged.name,
            entity_type = label,
            "Merged entity"
        );
        Ok(merged)
    }

    async fn add_relation(&self, relation: &Relation) -> Result<()> {
        let rel_label = relation.relation_type.as_label();
        let cypher = format!(
            "MATCH (a {{id: $source_id, owner: $owner}}) \
             MATCH (b {{id: $target_id, owner: $owner}}) \
             MERGE (a)-[r:{rel_label}]->(b) \
             ON CREATE SET r.id = $rel_id, r.owner = $owner, \
               r.confidence = $confidence, r.created_at = $created_at \
             RETURN count(r) AS cnt"
        );
        let q = query(&cypher)
            .param("source_id", relation.source_id.to_string())
            .param("target_id", relation.target_id.to_string())
            .param("owner", relation.owner.clone())
            .param("rel_id", relation.id.to_string())
            .param("confidence", relation.confidence)
            .param("created_at", relation.created_at.to_rfc3339());

        let mut stream = timed(self.graph()?.execute(q))
            .await?
            .map_err(|e| HopperError::Graph(format!("Failed to store relation {}: {e}", relation.id)))?;

        let matched: i64 = match stream.next().await {
            Ok(Some(row)) => row.get("cnt").unwrap_or(0),
            Ok(None) => 0,
            Err(e) => return Err(HopperError::Graph(format!("Error storing relation: {e}"))),
        };
        if matched == 0 {
            return Err(HopperError::NotFound(format!(
                "relation endpoints {} -> {} not found",
                relation.source_id, relation.target_id
            )));
        }

        tracing::debug!(
            rel_id = %relation.id,
            source = %relation.source_id,
            target = %relation.target_id,
            rel_type = rel_label,
            "Stored relation"
        );
        Ok(())
    }

    async fn store_document(&self, document: &Document) -> Result<()> {
        if document.embedding.len() != self.dimension {
            return Err(HopperError::Validation(format!(
                "embedding has {} dimensions, store expects {}",
                document.embedding.len(),
                self.dimension
            )));
        }
        let q = query(
            "MERGE (d:Document {id: $id}) \
             SET d.owner = $owner, d.text = $text, d.embedding = $embedding, \
                 d.metadata = $metadata, d.created_at = $created_at",
        )
        .param("id", document.id.to_string())
        .param("owner", document.owner.clone())
        .param("text", document.text.clone())
        .param("embedding", to_f64(&document.embedding))
        .param("metadata", serde_json::to_string(&document.metadata)?)
        .param("created_at", document.created_at.to_rfc3339());

        timed(self.graph()?.run(q))
            .await?
            .map_err(|e| HopperError::Graph(format!("Failed to store document {}: {e}", document.id)))?;

        tracing::debug!(document_id = %document.id, owner = %document.owner, "Stored document");
        Ok(())
    }

    async fn get_document(&self, owner: &str, id: Uuid) -> Result<Option<Document>> {
        let q = query("MATCH (d:Document {id: $id, owner: $owner}) RETURN d")
            .param("id", id.to_string())
            .param("owner", owner.to_string());
        let mut stream = timed(self.graph()?.execute(q))
            .await?
            .map_err(|e| HopperError::Graph(format!("Failed to query document: {e}")))?;

        match stream.next().await {
            Ok(Some(row)) => {
                let node: Node = row
                    .get("d")
                    .map_err(|e| HopperError::Graph(format!("Failed to deserialize node: {e}")))?;
                Ok(Some(node_to_document(&node)?))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(HopperError::Graph(format!("Error fetching document: {e}"))),
        }
    }

    async fn patch_document_metadata(
        &self,
        owner: &str,
        id: Uuid,
        patch: &serde_json::Value,
    ) -> Result<Document> {
        let mut document = self
            .get_document(owner, id)
            .await?
            .ok_or_else(|| HopperError::NotFound(format!("document {id} not found")))?;
        document.patch_metadata(patch);

        let q = query("MATCH (d:Document {id: $id, owner: $owner}) SET d.metadata = $metadata")
            .param("id", id.to_string())
            .param("owner", owner.to_string())
            .param("metadata", serde_json::to_string(&document.metadata)?);
        timed(self.graph()?.run(q))
            .await?
            .map_err(|e| HopperError::Graph(format!("Failed to patch document {id}: {e}")))?;
        Ok(document)
    }

    async fn similarity_search(
        &self,
        owner: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>> {
        let q = query(SIMILARITY_CYPHER)
            .param("embedding", to_f64(embedding))
            .param("owner", owner.to_string())
            .param("top_k", top_k as i64);

        let mut stream = timed(self.graph()?.execute(q))
            .await?
            .map_err(|e| HopperError::Graph(format!("Vector search failed: {e}")))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = stream.next().await {
            let node: Node = match row.get("node") {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse document node");
                    continue;
                }
            };
            let score: f64 = row.get("score").unwrap_or(0.0);
            match node_to_document(&node) {
                Ok(document) => results.push(ScoredDocument {
                    document,
                    score: score as f32,
                }),
                Err(e) => tracing::warn!(error = %e, "Skipping malformed document node"),
            }
        }
        rank_scored(&mut results);

        tracing::debug!(owner = %owner, results = results.len(), "Vector search completed");
        Ok(results)
    }

    async fn traverse(
        &self,
        owner: &str,
        start: Uuid,
        depth: u32,
        edge_types: &[RelationType],
    ) -> Result<Neighborhood> {
        if depth == 0 {
            return Ok(Neighborhood::default());
        }
        let filter = edge_filter_clause(edge_types);

        let nodes_cypher = format!(
            "MATCH p = (s {{id: $id, owner: $owner}})-[rels*1..{depth}]-(m) \
             WHERE m.owner = $owner AND m.id <> $id {filter} \
             RETURN m, min(length(p)) AS hops"
        );
        let q = query(&nodes_cypher)
            .param("id", start.to_string())
            .param("owner", owner.to_string())
            .param("edge_types", edge_labels(edge_types));

        let mut stream = timed(self.graph()?.execute(q))
            .await?
            .map_err(|e| HopperError::Graph(format!("Failed to traverse: {e}")))?;

        let mut neighborhood = Neighborhood::default();
        while let Ok(Some(row)) = stream.next().await {
            let node: Node = match row.get("m") {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse neighbor node");
                    continue;
                }
            };
            let hops: i64 = row.get("hops").unwrap_or(depth as i64);
            let hops = hops as u32;

            if is_document(&node) {
                match node_to_document(&node) {
                    Ok(document) => neighborhood.documents.push(ReachedDocument { document, hops }),
                    Err(e) => tracing::warn!(error = %e, "Skipping malformed document node"),
                }
            } else {
                match node_to_entity(&node) {
                    Ok(entity) => neighborhood.entities.push(ReachedEntity { entity, hops }),
                    Err(e) => tracing::warn!(error = %e, "Skipping malformed neighbor node"),
                }
            }
        }

        let rels_cypher = format!(
            "MATCH (s {{id: $id, owner: $owner}})-[rels*1..{depth}]-(m) \
             WHERE m.owner = $owner {filter} \
             UNWIND rels AS rel \
             WITH DISTINCT rel \
             RETURN rel.id AS id, startNode(rel).id AS source, endNode(rel).id AS target, \
                    type(rel) AS rel_type, rel.confidence AS confidence, rel.created_at AS created_at"
        );
        let q = query(&rels_cypher)
            .param("id", start.to_string())
            .param("owner", owner.to_string())
            .param("edge_types", edge_labels(edge_types));

        let mut stream = timed(self.graph()?.execute(q))
            .await?
            .map_err(|e| HopperError::Graph(format!("Failed to fetch traversal edges: {e}")))?;

        while let Ok(Some(row)) = stream.next().await {
            let parse = |key: &str| -> Option<Uuid> {
                row.get::<String>(key).ok().and_then(|s| Uuid::parse_str(&s).ok())
            };
            let (Some(id), Some(source_id), Some(target_id)) =
                (parse("id"), parse("source"), parse("target"))
            else {
                tracing::warn!("Skipping relation with missing ids");
                continue;
            };
            let rel_type: String = row.get("rel_type").unwrap_or_default();
            let Some(relation_type) = RelationType::from_label(&rel_type) else {
                continue;
            };
            neighborhood.relations.push(Relation {
                id,
                owner: owner.to_string(),
                source_id,
                target_id,
                relation_type,
                confidence: row.get("confidence").unwrap_or(1.0),
                created_at: parse_time(row.get("created_at").ok()),
            });
        }

        neighborhood.documents.sort_by_key(|d| d.hops);
        neighborhood.entities.sort_by_key(|e| e.hops);

        tracing::debug!(
            start = %start,
            depth,
            documents = neighborhood.documents.len(),
            entities = neighborhood.entities.len(),
            relations = neighborhood.relations.len(),
            "Traversal complete"
        );
        Ok(neighborhood)
    }

    async fn find_paths(
        &self,
        owner: &str,
        from: &str,
        to: &str,
        max_hops: u32,
        limit: usize,
    ) -> Result<Vec<GraphPath>> {
        if max_hops == 0 || limit == 0 {
            return Ok(Vec::new());
        }
        let q = query(&path_cypher(max_hops))
            .param("owner", owner.to_string())
            .param("from_key", normalize_name(from))
            .param("to_key", normalize_name(to))
            .param("limit", limit as i64);

        let mut stream = timed(self.graph()?.execute(q))
            .await?
            .map_err(|e| HopperError::Graph(format!("Failed to find paths: {e}")))?;

        let mut paths = Vec::new();
        while let Ok(Some(row)) = stream.next().await {
            let raw_nodes: Vec<Node> = match row.get("nodes") {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse path nodes");
                    continue;
                }
            };
            let nodes: Result<Vec<PathNode>> = raw_nodes
                .iter()
                .map(|node| {
                    if is_document(node) {
                        node_to_document(node).map(PathNode::Document)
                    } else {
                        node_to_entity(node).map(PathNode::Entity)
                    }
                })
                .collect();
            let nodes = match nodes {
                Ok(nodes) => nodes,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping path with a malformed node");
                    continue;
                }
            };
            let rels = PathRelations {
                ids: row.get("rel_ids").unwrap_or_default(),
                sources: row.get("sources").unwrap_or_default(),
                targets: row.get("targets").unwrap_or_default(),
                types: row.get("rel_types").unwrap_or_default(),
                confidences: row.get("confidences").unwrap_or_default(),
            };
            match assemble_path(owner, nodes, rels) {
                Some(path) => paths.push(path),
                None => tracing::warn!("Skipping path with inconsistent relation columns"),
            }
        }
        Ok(paths)
    }

    async fn entity_count(&self, owner: Option<&str>) -> Result<u64> {
        let cypher = if owner.is_some() {
            "MATCH (n) WHERE n.owner = $owner AND n.name_key IS NOT NULL RETURN count(n) AS cnt"
        } else {
            "MATCH (n) WHERE n.name_key IS NOT NULL RETURN count(n) AS cnt"
        };
        self.count(cypher, owner).await
    }

    async fn relation_count(&self, owner: Option<&str>) -> Result<u64> {
        let cypher = if owner.is_some() {
            "MATCH ()-[r]->() WHERE r.owner = $owner RETURN count(r) AS cnt"
        } else {
            "MATCH ()-[r]->() RETURN count(r) AS cnt"
        };
        self.count(cypher, owner).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_filter_only_when_types_given() {
        assert_eq!(edge_filter_clause(&[]), "");
        assert!(edge_filter_clause(&[RelationType::Mentions]).contains("$edge_types"));
        assert_eq!(
            edge_labels(&[RelationType::Mentions, RelationType::WorksFor]),
            vec!["MENTIONS", "WORKS_FOR"]
        );
    }

    #[test]
    fn similarity_candidates_are_owner_scoped_before_ranking() {
        let scoped = SIMILARITY_CYPHER.find("{owner: $owner}").unwrap();
        let scored = SIMILARITY_CYPHER.find("vector.similarity.cosine").unwrap();
        let limited = SIMILARITY_CYPHER.find("LIMIT $top_k").unwrap();
        assert!(scoped < scored && scored < limited);
        assert!(!SIMILARITY_CYPHER.contains("queryNodes"));
    }

    #[test]
    fn path_query_is_owner_scoped_and_bounded() {
        let cypher = path_cypher(3);
        assert!(cypher.contains("[*1..3]"));
        assert!(cypher.contains("all(n IN nodes(p) WHERE n.owner = $owner)"));
        assert!(cypher.contains("ORDER BY length(p)"));
        assert!(path_cypher(50).contains(&format!("[*1..{MAX_PATH_HOPS}]")));
    }

    #[test]
    fn path_rows_with_mismatched_columns_are_rejected() {
        let a = Entity::new("alice", EntityType::Person, "Paul");
        let b = Entity::new("alice", EntityType::Organization, "Acme");
        let rels = PathRelations {
            ids: vec![Uuid::new_v4().to_string()],
            sources: vec![a.id.to_string()],
            targets: vec![b.id.to_string()],
            types: vec!["WORKS_FOR".into()],
            confidences: vec![0.8],
        };
        let nodes = vec![PathNode::Entity(a.clone()), PathNode::Entity(b.clone())];

        let path = assemble_path("alice", nodes.clone(), rels).unwrap();
        assert_eq!(path.hops(), 1);
        assert_eq!(path.relations[0].relation_type, RelationType::WorksFor);
        assert_eq!(path.relations[0].source_id, a.id);

        let unknown_type = PathRelations {
            ids: vec![Uuid::new_v4().to_string()],
            sources: vec![a.id.to_string()],
            targets: vec![b.id.to_string()],
            types: vec!["LIKES".into()],
            ..Default::default()
        };
        assert!(assemble_path("alice", nodes.clone(), unknown_type).is_none());
        assert!(assemble_path("alice", nodes, PathRelations::default()).is_none());
    }

    #[tokio::test]
    async fn unreachable_server_starts_degraded() {
        let mut config = AppConfig::default();
        config.graph.neo4j_uri = "127.0.0.1:1".into();
        let store = Neo4jGraphStore::new(&config).await;
        assert!(!store.is_available().await);
        assert!(store.entity_count(None).await.is_err());
    }
}
