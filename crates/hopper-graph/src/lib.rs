pub mod memory;
pub mod neo4j;
pub mod retriever;

use std::sync::Arc;

use hopper_core::config::{AppConfig, GraphBackend};
use hopper_core::GraphStore;

pub use memory::InMemoryGraphStore;
pub use neo4j::Neo4jGraphStore;
pub use retriever::{build_retriever, GraphRetriever, RetrievalSettings, SimilarityRetriever};

/// Connects the configured graph backend. A Neo4j store that cannot connect
/// still comes up, in degraded mode.
pub async fn build_graph_store(config: &AppConfig) -> Arc<dyn GraphStore> {
    match config.graph.backend {
        GraphBackend::Memory => {
            tracing::info!("Using in-memory graph store");
            Arc::new(InMemoryGraphStore::new(Some(config.embedding.dimension)))
        }
        GraphBackend::Neo4j => Arc::new(Neo4jGraphStore::new(config).await),
    }
}
