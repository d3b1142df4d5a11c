use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use hopper_core::config::AppConfig;
use hopper_core::embedding::{cosine_similarity, Embedder};
use hopper_core::entity::{normalize_name, Document, Entity, Relation, RelationType};
use hopper_core::error::{HopperError, Result};
use hopper_core::extraction::EntityExtractor;
use hopper_core::graph::GraphStore;
use hopper_core::retrieval::{
    term_overlap, Ingestion, Retrieval, RetrievalQuery, RetrievalStrategy, RetrievedItem,
    Retriever, SupportKind,
};

/// Scoring knobs shared by both strategies.
#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub hop_decay: f32,
    pub timeout: Duration,
    pub edge_types: Vec<RelationType>,
}

impl RetrievalSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            hop_decay: config.retrieval.hop_decay,
            timeout: Duration::from_millis(config.retrieval.timeout_ms),
            edge_types: config.retrieval.traversal_edges.clone(),
        }
    }
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            hop_decay: 0.8,
            timeout: Duration::from_secs(5),
            edge_types: Vec::new(),
        }
    }
}

fn validate_ingest(text: &str, owner: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(HopperError::Validation("document text is empty".into()));
    }
    if owner.trim().is_empty() {
        return Err(HopperError::Validation("owner id is empty".into()));
    }
    Ok(())
}

async fn store_new_document(
    store: &dyn GraphStore,
    embedder: &dyn Embedder,
    text: &str,
    owner: &str,
    metadata: serde_json::Value,
) -> Result<Document> {
    validate_ingest(text, owner)?;
    let embedding = embedder.embed(text).await?;
    let mut document = Document::new(owner, text, embedding);
    document.patch_metadata(&metadata);
    store.store_document(&document).await?;
    Ok(document)
}

fn direct_item(query: &RetrievalQuery, document: Document, score: f32) -> RetrievedItem {
    let overlap = query
        .text
        .as_deref()
        .map(|t| term_overlap(t, &document.text))
        .unwrap_or(0.0);
    RetrievedItem {
        relevance: score.max(overlap),
        similarity: score,
        kind: SupportKind::Match,
        hops: 0,
        document,
    }
}

/// Highest relevance first, then the more recent document.
fn sort_items(items: &mut [RetrievedItem]) {
    items.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.document.created_at.cmp(&a.document.created_at))
    });
}

/// Runs `op` under the retrieval deadline. Errors and timeouts become an
/// empty, warned result.
async fn bounded<F>(strategy: RetrievalStrategy, timeout: Duration, op: F) -> Retrieval
where
    F: std::future::Future<Output = Result<Retrieval>>,
{
    match tokio::time::timeout(timeout, op).await {
        Ok(Ok(retrieval)) => retrieval,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Retrieval failed, continuing without context");
            Retrieval::degraded(strategy, format!("retrieval unavailable: {e}"))
        }
        Err(_) => {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Retrieval timed out");
            Retrieval::degraded(
                strategy,
                format!("retrieval timed out after {}ms", timeout.as_millis()),
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Plain similarity
// ---------------------------------------------------------------------------

/// Vector search only. Ingestion stores the document without extraction.
pub struct SimilarityRetriever {
    store: Arc<dyn GraphStore>,
    embedder: Arc<dyn Embedder>,
    settings: RetrievalSettings,
}

impl SimilarityRetriever {
    pub fn new(
        store: Arc<dyn GraphStore>,
        embedder: Arc<dyn Embedder>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            store,
            embedder,
            settings,
        }
    }

    async fn search(&self, query: &RetrievalQuery) -> Result<Retrieval> {
        if !self.store.is_available().await {
            return Ok(Retrieval::degraded(
                self.strategy(),
                "graph store unavailable",
            ));
        }
        let matches = self
            .store
            .similarity_search(&query.owner, &query.embedding, query.top_k)
            .await?;
        let mut items: Vec<RetrievedItem> = matches
            .into_iter()
            .map(|m| direct_item(query, m.document, m.score))
            .collect();
        sort_items(&mut items);
        Ok(Retrieval {
            items,
            ..Retrieval::empty(self.strategy())
        })
    }
}

#[async_trait]
impl Retriever for SimilarityRetriever {
    fn strategy(&self) -> RetrievalStrategy {
        RetrievalStrategy::Similarity
    }

    async fn ingest(
        &self,
        text: &str,
        owner: &str,
        metadata: serde_json::Value,
    ) -> Result<Ingestion> {
        let document =
            store_new_document(self.store.as_ref(), self.embedder.as_ref(), text, owner, metadata)
                .await?;
        tracing::info!(document_id = %document.id, owner = %owner, "Ingested document");
        Ok(Ingestion {
            document_id: document.id,
            entities: Vec::new(),
            relations_added: 0,
        })
    }

    async fn retrieve(&self, query: &RetrievalQuery) -> Retrieval {
        bounded(self.strategy(), self.settings.timeout, self.search(query)).await
    }
}

// ---------------------------------------------------------------------------
// Graph-augmented
// ---------------------------------------------------------------------------

/// Vector search for seed documents, then a bounded walk through the
/// entity graph to pull in supporting documents.
pub struct GraphRetriever {
    store: Arc<dyn GraphStore>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn EntityExtractor>,
    settings: RetrievalSettings,
}

impl GraphRetriever {
    pub fn new(
        store: Arc<dyn GraphStore>,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn EntityExtractor>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            store,
            embedder,
            extractor,
            settings,
        }
    }

    async fn search(&self, query: &RetrievalQuery) -> Result<Retrieval> {
        if !self.store.is_available().await {
            return Ok(Retrieval::degraded(
                self.strategy(),
                "graph store unavailable",
            ));
        }

        let matches = self
            .store
            .similarity_search(&query.owner, &query.embedding, query.top_k)
            .await?;

        let mut items: HashMap<Uuid, RetrievedItem> = HashMap::new();
        let mut entities: HashMap<Uuid, Entity> = HashMap::new();
        let seeds: Vec<(Uuid, f32)> = matches.iter().map(|m| (m.document.id, m.score)).collect();

        for m in matches {
            items.insert(m.document.id, direct_item(query, m.document, m.score));
        }

        if query.hop_depth > 0 {
            for (seed_id, seed_score) in seeds {
                let neighborhood = match self
                    .store
                    .traverse(&query.owner, seed_id, query.hop_depth, &self.settings.edge_types)
                    .await
                {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::warn!(seed = %seed_id, error = %e, "Traversal failed for seed");
                        continue;
                    }
                };

                for reached in neighborhood.entities {
                    entities.entry(reached.entity.id).or_insert(reached.entity);
                }

                for reached in neighborhood.documents {
                    let similarity = cosine_similarity(&query.embedding, &reached.document.embedding);
                    let propagated = seed_score * self.settings.hop_decay.powi(reached.hops as i32);
                    let overlap = query
                        .text
                        .as_deref()
                        .map(|t| term_overlap(t, &reached.document.text))
                        .unwrap_or(0.0);
                    let relevance = similarity.max(propagated).max(overlap);

                    match items.get_mut(&reached.document.id) {
                        Some(existing) if existing.kind == SupportKind::Match => {}
                        Some(existing) => {
                            if relevance > existing.relevance {
                                existing.relevance = relevance;
                                existing.hops = reached.hops;
                            }
                        }
                        None => {
                            items.insert(
                                reached.document.id,
                                RetrievedItem {
                                    document: reached.document,
                                    similarity,
                                    relevance,
                                    kind: SupportKind::GraphSupport,
                                    hops: reached.hops,
                                },
                            );
                        }
                    }
                }
            }
        }

        let mut items: Vec<RetrievedItem> = items.into_values().collect();
        sort_items(&mut items);

        // Supporting documents never push the result past twice the match budget.
        let mut support_left = query.top_k;
        items.retain(|item| match item.kind {
            SupportKind::Match => true,
            SupportKind::GraphSupport if support_left > 0 => {
                support_left -= 1;
                true
            }
            SupportKind::GraphSupport => false,
        });

        let mut entities: Vec<Entity> = entities.into_values().collect();
        entities.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));

        tracing::debug!(
            owner = %query.owner,
            items = items.len(),
            entities = entities.len(),
            "Graph retrieval complete"
        );

        Ok(Retrieval {
            strategy: self.strategy(),
            items,
            entities,
            warning: None,
        })
    }
}

#[async_trait]
impl Retriever for GraphRetriever {
    fn strategy(&self) -> RetrievalStrategy {
        RetrievalStrategy::GraphAugmented
    }

    async fn ingest(
        &self,
        text: &str,
        owner: &str,
        metadata: serde_json::Value,
    ) -> Result<Ingestion> {
        let document =
            store_new_document(self.store.as_ref(), self.embedder.as_ref(), text, owner, metadata)
                .await?;

        let extraction = match self.extractor.extract(text).await {
            Ok(extraction) => extraction,
            Err(e) => {
                tracing::warn!(error = %e, "Entity extraction failed, storing document only");
                Default::default()
            }
        };

        let mut by_surface: HashMap<String, Uuid> = HashMap::new();
        let mut entities: Vec<Entity> = Vec::new();
        let mut relations_added = 0;

        for extracted in &extraction.entities {
            let candidate = Entity::new(owner, extracted.entity_type, extracted.surface.clone())
                .with_confidence(extracted.confidence);
            let stored = self.store.merge_entity(&candidate).await?;

            let mention = Relation::new(owner, document.id, stored.id, RelationType::Mentions);
            self.store.add_relation(&mention).await?;
            relations_added += 1;

            by_surface.insert(normalize_name(&extracted.surface), stored.id);
            if !entities.iter().any(|e| e.id == stored.id) {
                entities.push(stored);
            }
        }

        for extracted in &extraction.relations {
            let source = by_surface.get(&normalize_name(&extracted.source));
            let target = by_surface.get(&normalize_name(&extracted.target));
            let (Some(&source), Some(&target)) = (source, target) else {
                tracing::debug!(
                    source = %extracted.source,
                    target = %extracted.target,
                    "Skipping relation between unknown entities"
                );
                continue;
            };
            if source == target {
                continue;
            }
            let mut relation = Relation::new(owner, source, target, extracted.relation_type);
            relation.confidence = extracted.confidence;
            self.store.add_relation(&relation).await?;
            relations_added += 1;
        }

        tracing::info!(
            document_id = %document.id,
            owner = %owner,
            extractor = %self.extractor.name(),
            entities = entities.len(),
            relations = relations_added,
            "Ingested document"
        );

        Ok(Ingestion {
            document_id: document.id,
            entities,
            relations_added,
        })
    }

    async fn retrieve(&self, query: &RetrievalQuery) -> Retrieval {
        bounded(self.strategy(), self.settings.timeout, self.search(query)).await
    }
}

pub fn build_retriever(
    config: &AppConfig,
    store: Arc<dyn GraphStore>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn EntityExtractor>,
) -> Arc<dyn Retriever> {
    let settings = RetrievalSettings::from_config(config);
    match config.retrieval.strategy {
        RetrievalStrategy::Similarity => {
            Arc::new(SimilarityRetriever::new(store, embedder, settings))
        }
        RetrievalStrategy::GraphAugmented => {
            Arc::new(GraphRetriever::new(store, embedder, extractor, settings))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryGraphStore;
    use hopper_extraction::{HashingEmbedder, HeuristicEntityExtractor};

    struct Setup {
        store: Arc<InMemoryGraphStore>,
        embedder: Arc<HashingEmbedder>,
        retriever: GraphRetriever,
    }

    fn setup() -> Setup {
        let store = Arc::new(InMemoryGraphStore::new(Some(128)));
        let embedder = Arc::new(HashingEmbedder::new(128));
        let retriever = GraphRetriever::new(
            store.clone(),
            embedder.clone(),
            Arc::new(HeuristicEntityExtractor::default()),
            RetrievalSettings::default(),
        );
        Setup {
            store,
            embedder,
            retriever,
        }
    }

    async fn query(setup: &Setup, owner: &str, text: &str) -> RetrievalQuery {
        RetrievalQuery {
            owner: owner.into(),
            embedding: setup.embedder.embed(text).await.unwrap(),
            text: Some(text.into()),
            top_k: 3,
            hop_depth: 2,
        }
    }

    #[tokio::test]
    async fn ingest_links_document_to_entities() {
        let setup = setup();
        let ingestion = setup
            .retriever
            .ingest("Marie Curie travaillait à Paris.", "alice", serde_json::json!({"source": "notes"}))
            .await
            .unwrap();

        assert_eq!(ingestion.entities.len(), 2);
        // Two MENTIONS edges plus the inferred LOCATED_IN.
        assert_eq!(ingestion.relations_added, 3);

        let document = setup
            .store
            .get_document("alice", ingestion.document_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(document.metadata["source"], "notes");
    }

    #[tokio::test]
    async fn ingested_text_is_retrieved_above_threshold() {
        let setup = setup();
        let ingestion = setup
            .retriever
            .ingest("Python asyncio tutorial", "alice", serde_json::Value::Null)
            .await
            .unwrap();

        let q = query(&setup, "alice", "Python asyncio tutorial").await;
        let retrieval = setup.retriever.retrieve(&q).await;

        assert!(retrieval.warning.is_none());
        let top = &retrieval.items[0];
        assert_eq!(top.document.id, ingestion.document_id);
        assert!(top.relevance >= 0.5);
    }

    #[tokio::test]
    async fn graph_walk_surfaces_supporting_documents() {
        let setup = setup();
        setup
            .retriever
            .ingest("Réunion sur Kubernetes avec l'équipe infra", "alice", serde_json::Value::Null)
            .await
            .unwrap();
        let support = setup
            .retriever
            .ingest("Kubernetes cluster upgrade notes", "alice", serde_json::Value::Null)
            .await
            .unwrap();

        let q = RetrievalQuery {
            top_k: 1,
            ..query(&setup, "alice", "réunion équipe infra").await
        };
        let retrieval = setup.retriever.retrieve(&q).await;

        let supporting: Vec<&RetrievedItem> = retrieval
            .items
            .iter()
            .filter(|i| i.kind == SupportKind::GraphSupport)
            .collect();
        assert_eq!(supporting.len(), 1);
        assert_eq!(supporting[0].document.id, support.document_id);
        assert_eq!(supporting[0].hops, 2);
        assert!(retrieval.entities.iter().any(|e| e.name == "Kubernetes"));
    }

    #[tokio::test]
    async fn other_owners_documents_never_appear() {
        let setup = setup();
        setup
            .retriever
            .ingest("Python asyncio tutorial", "bob", serde_json::Value::Null)
            .await
            .unwrap();

        let q = query(&setup, "alice", "Python asyncio tutorial").await;
        assert!(setup.retriever.retrieve(&q).await.is_empty());
    }

    #[tokio::test]
    async fn offline_store_degrades_to_empty() {
        let setup = setup();
        setup.store.set_available(false);

        let q = query(&setup, "alice", "anything").await;
        let retrieval = setup.retriever.retrieve(&q).await;
        assert!(retrieval.is_empty());
        assert!(retrieval.warning.is_some());
    }

    #[tokio::test]
    async fn empty_text_is_rejected_on_ingest() {
        let setup = setup();
        let result = setup.retriever.ingest("   ", "alice", serde_json::Value::Null).await;
        assert!(matches!(result, Err(HopperError::Validation(_))));
    }
}
