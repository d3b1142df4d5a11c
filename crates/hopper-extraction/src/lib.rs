pub mod embedding;
pub mod heuristic;
pub mod llm;

use std::sync::Arc;

use hopper_core::config::{AppConfig, EmbedderKind};
use hopper_core::{Embedder, EntityExtractor, TextGenerator};

pub use embedding::{HashingEmbedder, OllamaEmbedder};
pub use heuristic::HeuristicEntityExtractor;
pub use llm::LlmEntityExtractor;

/// Builds the configured embedder.
pub fn build_embedder(config: &AppConfig) -> Arc<dyn Embedder> {
    match config.embedding.kind {
        EmbedderKind::Hashing => Arc::new(HashingEmbedder::new(config.embedding.dimension)),
        EmbedderKind::Ollama => Arc::new(OllamaEmbedder::new(
            &config.embedding.ollama_url,
            &config.embedding.model,
            config.embedding.dimension,
        )),
    }
}

/// Uses the generator for extraction when one is given, with the regex
/// extractor as fallback; otherwise the regex extractor alone.
pub fn build_extractor(generator: Option<Arc<dyn TextGenerator>>) -> Arc<dyn EntityExtractor> {
    match generator {
        Some(generator) => Arc::new(LlmEntityExtractor::new(generator)),
        None => Arc::new(HeuristicEntityExtractor::default()),
    }
}
