use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use hopper_core::embedding::cosine_similarity;
use hopper_core::entity::{normalize_name, Document, Entity, EntityType, Relation, RelationType};
use hopper_core::error::{HopperError, Result};
use hopper_core::graph::{
    rank_scored, GraphPath, GraphStore, Neighborhood, PathNode, ReachedDocument, ReachedEntity,
    ScoredDocument,
};

/// Partial paths popped before a path search gives up.
const PATH_EXPANSION_LIMIT: usize = 10_000;

#[derive(Default)]
struct OwnerGraph {
    entities: HashMap<Uuid, Entity>,
    entity_keys: HashMap<(EntityType, String), Uuid>,
    documents: HashMap<Uuid, Document>,
    relations: Vec<Relation>,
    relation_keys: HashSet<(Uuid, RelationType, Uuid)>,
}

impl OwnerGraph {
    fn contains(&self, id: &Uuid) -> bool {
        self.entities.contains_key(id) || self.documents.contains_key(id)
    }

    fn node(&self, id: &Uuid) -> Option<PathNode> {
        if let Some(entity) = self.entities.get(id) {
            return Some(PathNode::Entity(entity.clone()));
        }
        self.documents.get(id).cloned().map(PathNode::Document)
    }

    fn entities_named(&self, name: &str) -> HashSet<Uuid> {
        let key = normalize_name(name);
        self.entities
            .values()
            .filter(|e| normalize_name(&e.name) == key)
            .map(|e| e.id)
            .collect()
    }
}

/// Graph store kept in process memory, partitioned by owner. Used for
/// tests and single-user deployments without Neo4j.
pub struct InMemoryGraphStore {
    dimension: Option<usize>,
    owners: RwLock<HashMap<String, OwnerGraph>>,
    available: AtomicBool,
}

impl Default for InMemoryGraphStore {
    fn default() -> Self {
        Self::new(None)
    }
}

impl InMemoryGraphStore {
    /// `dimension`, when set, is enforced on every stored document.
    pub fn new(dimension: Option<usize>) -> Self {
        Self {
            dimension,
            owners: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulates the backend going away or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(HopperError::Graph("in-memory graph store is offline".into()))
        }
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn merge_entity(&self, entity: &Entity) -> Result<Entity> {
        self.ensure_available()?;
        let mut owners = self.owners.write().await;
        let graph = owners.entry(entity.owner.clone()).or_default();

        let key = entity.key();
        if let Some(existing_id) = graph.entity_keys.get(&key) {
            if let Some(existing) = graph.entities.get_mut(existing_id) {
                existing.absorb(entity);
                return Ok(existing.clone());
            }
        }

        graph.entity_keys.insert(key, entity.id);
        graph.entities.insert(entity.id, entity.clone());
        Ok(entity.clone())
    }

    async fn add_relation(&self, relation: &Relation) -> Result<()> {
        self.ensure_available()?;
        let mut owners = self.owners.write().await;
        let graph = owners
            .get_mut(&relation.owner)
            .ok_or_else(|| HopperError::NotFound(format!("no graph for owner {}", relation.owner)))?;

        for endpoint in [relation.source_id, relation.target_id] {
            if !graph.contains(&endpoint) {
                return Err(HopperError::NotFound(format!("node {endpoint} not found")));
            }
        }

        let key = (relation.source_id, relation.relation_type, relation.target_id);
        if graph.relation_keys.insert(key) {
            graph.relations.push(relation.clone());
        }
        Ok(())
    }

    async fn store_document(&self, document: &Document) -> Result<()> {
        self.ensure_available()?;
        if let Some(expected) = self.dimension {
            if document.embedding.len() != expected {
                return Err(HopperError::Validation(format!(
                    "embedding has {} dimensions, store expects {expected}",
                    document.embedding.len()
                )));
            }
        }
        let mut owners = self.owners.write().await;
        owners
            .entry(document.owner.clone())
            .or_default()
            .documents
            .insert(document.id, document.clone());
        Ok(())
    }

    async fn get_document(&self, owner: &str, id: Uuid) -> Result<Option<Document>> {
        self.ensure_available()?;
        let owners = self.owners.read().await;
        Ok(owners.get(owner).and_then(|g| g.documents.get(&id)).cloned())
    }

    async fn patch_document_metadata(
        &self,
        owner: &str,
        id: Uuid,
        patch: &serde_json::Value,
    ) -> Result<Document> {
        self.ensure_available()?;
        let mut owners = self.owners.write().await;
        let document = owners
            .get_mut(owner)
            .and_then(|g| g.documents.get_mut(&id))
            .ok_or_else(|| HopperError::NotFound(format!("document {id} not found")))?;
        document.patch_metadata(patch);
        Ok(document.clone())
    }

    async fn similarity_search(
        &self,
        owner: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>> {
        self.ensure_available()?;
        let owners = self.owners.read().await;
        let Some(graph) = owners.get(owner) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<ScoredDocument> = graph
            .documents
            .values()
            .map(|d| ScoredDocument {
                score: cosine_similarity(embedding, &d.embedding),
                document: d.clone(),
            })
            .collect();
        rank_scored(&mut scored);
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn traverse(
        &self,
        owner: &str,
        start: Uuid,
        depth: u32,
        edge_types: &[RelationType],
    ) -> Result<Neighborhood> {
        self.ensure_available()?;
        let owners = self.owners.read().await;
        let graph = owners
            .get(owner)
            .filter(|g| g.contains(&start))
            .ok_or_else(|| HopperError::NotFound(format!("node {start} not found")))?;

        let allowed = |r: &Relation| edge_types.is_empty() || edge_types.contains(&r.relation_type);

        let mut hops: HashMap<Uuid, u32> = HashMap::from([(start, 0)]);
        let mut used_relations: Vec<Relation> = Vec::new();
        let mut seen_relations: HashSet<Uuid> = HashSet::new();
        let mut queue = VecDeque::from([start]);

        while let Some(current) = queue.pop_front() {
            let level = hops[&current];
            if level >= depth {
                continue;
            }
            for relation in graph.relations.iter().filter(|r| allowed(r)) {
                let next = if relation.source_id == current {
                    relation.target_id
                } else if relation.target_id == current {
                    relation.source_id
                } else {
                    continue;
                };
                if seen_relations.insert(relation.id) {
                    used_relations.push(relation.clone());
                }
                if !hops.contains_key(&next) {
                    hops.insert(next, level + 1);
                    queue.push_back(next);
                }
            }
        }

        let mut neighborhood = Neighborhood {
            relations: used_relations,
            ..Default::default()
        };
        for (id, h) in hops {
            if id == start {
                continue;
            }
            if let Some(document) = graph.documents.get(&id) {
                neighborhood.documents.push(ReachedDocument {
                    document: document.clone(),
                    hops: h,
                });
            } else if let Some(entity) = graph.entities.get(&id) {
                neighborhood.entities.push(ReachedEntity {
                    entity: entity.clone(),
                    hops: h,
                });
            }
        }
        neighborhood.documents.sort_by_key(|d| d.hops);
        neighborhood.entities.sort_by_key(|e| e.hops);
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
        self.ensure_available()?;
        let owners = self.owners.read().await;
        let Some(graph) = owners.get(owner) else {
            return Ok(Vec::new());
        };
        let starts = graph.entities_named(from);
        let goals = graph.entities_named(to);
        if starts.is_empty() || goals.is_empty() || max_hops == 0 || limit == 0 {
            return Ok(Vec::new());
        }

        let mut adjacency: HashMap<Uuid, Vec<usize>> = HashMap::new();
        for (index, relation) in graph.relations.iter().enumerate() {
            adjacency.entry(relation.source_id).or_default().push(index);
            adjacency.entry(relation.target_id).or_default().push(index);
        }

        // Breadth-first over simple paths, so results come out shortest first.
        let mut queue: VecDeque<(Vec<Uuid>, Vec<usize>)> =
            starts.iter().map(|id| (vec![*id], Vec::new())).collect();
        let mut found = Vec::new();
        let mut expanded = 0;

        while let Some((nodes, relations)) = queue.pop_front() {
            expanded += 1;
            if expanded > PATH_EXPANSION_LIMIT {
                tracing::debug!(owner, from, to, "Path search hit its expansion limit");
                break;
            }
            let Some(&current) = nodes.last() else {
                continue;
            };
            if relations.len() as u32 >= max_hops {
                continue;
            }
            for &index in adjacency.get(&current).map(Vec::as_slice).unwrap_or_default() {
                let relation = &graph.relations[index];
                let next = if relation.source_id == current {
                    relation.target_id
                } else {
                    relation.source_id
                };
                if nodes.contains(&next) {
                    continue;
                }
                let mut nodes = nodes.clone();
                let mut relations = relations.clone();
                nodes.push(next);
                relations.push(index);

                if goals.contains(&next) {
                    let path = GraphPath {
                        nodes: nodes.iter().filter_map(|id| graph.node(id)).collect(),
                        relations: relations.iter().map(|&i| graph.relations[i].clone()).collect(),
                    };
                    found.push(path);
                    if found.len() >= limit {
                        return Ok(found);
                    }
                } else {
                    queue.push_back((nodes, relations));
                }
            }
        }
        Ok(found)
    }

    async fn entity_count(&self, owner: Option<&str>) -> Result<u64> {
        self.ensure_available()?;
        let owners = self.owners.read().await;
        Ok(match owner {
            Some(owner) => owners.get(owner).map_or(0, |g| g.entities.len() as u64),
            None => owners.values().map(|g| g.entities.len() as u64).sum(),
        })
    }

    async fn relation_count(&self, owner: Option<&str>) -> Result<u64> {
        self.ensure_available()?;
        let owners = self.owners.read().await;
        Ok(match owner {
            Some(owner) => owners.get(owner).map_or(0, |g| g.relations.len() as u64),
            None => owners.values().map(|g| g.relations.len() as u64).sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn merge_is_idempotent_and_widens() {
        let store = InMemoryGraphStore::default();
        let mut first = Entity::new("alice", EntityType::Person, "Paul Martin").with_confidence(0.6);
        first.properties = serde_json::json!({"email": "paul@example.com"});
        let stored = store.merge_entity(&first).await.unwrap();

        let mut second = Entity::new("alice", EntityType::Person, "paul  martin").with_confidence(0.9);
        second.properties = serde_json::json!({"phone": "0600000000"});
        let merged = store.merge_entity(&second).await.unwrap();

        assert_eq!(merged.id, stored.id);
        assert_eq!(merged.confidence, 0.9);
        assert_eq!(merged.properties["email"], "paul@example.com");
        assert_eq!(merged.properties["phone"], "0600000000");
        assert_eq!(store.entity_count(Some("alice")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn owners_are_isolated() {
        let store = InMemoryGraphStore::default();
        store
            .store_document(&Document::new("alice", "secret plans", vec![1.0, 0.0]))
            .await
            .unwrap();

        let found = store.similarity_search("bob", &[1.0, 0.0], 5).await.unwrap();
        assert!(found.is_empty());
        let found = store.similarity_search("alice", &[1.0, 0.0], 5).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_relations_are_not_added() {
        let store = InMemoryGraphStore::default();
        let doc = Document::new("alice", "text", vec![1.0]);
        store.store_document(&doc).await.unwrap();
        let paul = store
            .merge_entity(&Entity::new("alice", EntityType::Person, "Paul"))
            .await
            .unwrap();

        for _ in 0..2 {
            store
                .add_relation(&Relation::new("alice", doc.id, paul.id, RelationType::Mentions))
                .await
                .unwrap();
        }
        assert_eq!(store.relation_count(Some("alice")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn traverse_respects_depth_and_edge_filter() {
        let store = InMemoryGraphStore::default();
        let a = Document::new("alice", "a", vec![1.0]);
        let b = Document::new("alice", "b", vec![1.0]);
        store.store_document(&a).await.unwrap();
        store.store_document(&b).await.unwrap();
        let rust = store
            .merge_entity(&Entity::new("alice", EntityType::Product, "Rust"))
            .await
            .unwrap();
        let mozilla = store
            .merge_entity(&Entity::new("alice", EntityType::Organization, "Mozilla"))
            .await
            .unwrap();
        store
            .add_relation(&Relation::new("alice", a.id, rust.id, RelationType::Mentions))
            .await
            .unwrap();
        store
            .add_relation(&Relation::new("alice", b.id, rust.id, RelationType::Mentions))
            .await
            .unwrap();
        store
            .add_relation(&Relation::new("alice", rust.id, mozilla.id, RelationType::DevelopedBy))
            .await
            .unwrap();

        let one_hop = store.traverse("alice", a.id, 1, &[]).await.unwrap();
        assert!(one_hop.documents.is_empty());
        assert_eq!(one_hop.entities.len(), 1);

        let two_hops = store.traverse("alice", a.id, 2, &[]).await.unwrap();
        assert_eq!(two_hops.documents.len(), 1);
        assert_eq!(two_hops.documents[0].document.id, b.id);
        assert_eq!(two_hops.documents[0].hops, 2);
        assert_eq!(two_hops.entities.len(), 2);

        let mentions_only = store
            .traverse("alice", a.id, 2, &[RelationType::Mentions])
            .await
            .unwrap();
        assert_eq!(mentions_only.entities.len(), 1);
    }

    #[tokio::test]
    async fn closer_documents_of_other_owners_do_not_crowd_out_mine() {
        let store = InMemoryGraphStore::default();
        for i in 0..20 {
            store
                .store_document(&Document::new("bob", format!("bob {i}"), vec![1.0, 0.0]))
                .await
                .unwrap();
        }
        store
            .store_document(&Document::new("alice", "mine", vec![0.2, 1.0]))
            .await
            .unwrap();

        let found = store.similarity_search("alice", &[1.0, 0.0], 3).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].document.text, "mine");
    }

    #[tokio::test]
    async fn paths_between_named_entities_are_shortest_first() {
        let store = InMemoryGraphStore::default();
        let bug = store
            .merge_entity(&Entity::new("alice", EntityType::Event, "Bug 42"))
            .await
            .unwrap();
        let fix = store
            .merge_entity(&Entity::new("alice", EntityType::Event, "Port change"))
            .await
            .unwrap();
        let standup = store
            .merge_entity(&Entity::new("alice", EntityType::Event, "Standup"))
            .await
            .unwrap();
        let note = Document::new("alice", "standup notes", vec![1.0]);
        store.store_document(&note).await.unwrap();

        // bug -> fix -> standup, and bug <- note -> standup
        for relation in [
            Relation::new("alice", bug.id, fix.id, RelationType::FixedBy),
            Relation::new("alice", fix.id, standup.id, RelationType::Discussed),
            Relation::new("alice", note.id, bug.id, RelationType::Mentions),
            Relation::new("alice", note.id, standup.id, RelationType::Mentions),
        ] {
            store.add_relation(&relation).await.unwrap();
        }

        let paths = store.find_paths("alice", "bug 42", "STANDUP", 3, 10).await.unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|p| p.hops() == 2));
        assert!(paths.iter().all(|p| p.nodes.len() == 3));
        assert_eq!(paths[0].nodes[0].id(), bug.id);
        assert_eq!(paths[0].nodes[2].id(), standup.id);

        assert!(store.find_paths("alice", "Bug 42", "Standup", 1, 10).await.unwrap().is_empty());
        assert_eq!(store.find_paths("alice", "Bug 42", "Standup", 3, 1).await.unwrap().len(), 1);
        assert!(store.find_paths("bob", "Bug 42", "Standup", 3, 10).await.unwrap().is_empty());
        assert!(store.find_paths("alice", "Bug 42", "Nobody", 3, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn offline_store_errors_and_reports_unavailable() {
        let store = InMemoryGraphStore::default();
        store.set_available(false);
        assert!(!store.is_available().await);
        assert!(store.similarity_search("alice", &[1.0], 3).await.is_err());
    }

    #[tokio::test]
    async fn rejects_wrong_dimension() {
        let store = InMemoryGraphStore::new(Some(3));
        let result = store.store_document(&Document::new("alice", "x", vec![1.0])).await;
        assert!(matches!(result, Err(HopperError::Validation(_))));
    }
}
