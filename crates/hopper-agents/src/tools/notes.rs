use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use hopper_core::config::AppConfig;
use hopper_core::embedding::Embedder;
use hopper_core::error::{HopperError, Result};
use hopper_core::graph::GraphStore;
use hopper_core::retrieval::{RetrievalQuery, Retriever};
use hopper_core::tool::{
    string_arg, ArgType, Tool, ToolArguments, ToolContext, ToolParam, ToolSchema,
};

const EXCERPT_CHARS: usize = 160;
const MAX_NOTE_RESULTS: usize = 20;
const PATH_HOPS: u32 = 3;
const PATH_RESULTS: usize = 3;

/// The knowledge collaborators the note tools work through.
#[derive(Clone)]
pub struct Knowledge {
    pub retriever: Arc<dyn Retriever>,
    pub embedder: Arc<dyn Embedder>,
    pub graph: Arc<dyn GraphStore>,
}

fn excerpt(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EXCERPT_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
    format!("{cut}...")
}

pub struct CreateNoteTool {
    retriever: Arc<dyn Retriever>,
    schema: ToolSchema,
}

impl CreateNoteTool {
    pub const NAME: &'static str = "create_note";

    pub fn new(retriever: Arc<dyn Retriever>) -> Self {
        Self {
            retriever,
            schema: ToolSchema::new(
                Self::NAME,
                "Save a note to the user's knowledge base",
                vec![
                    ToolParam::required("text", ArgType::String, "note content"),
                    ToolParam::optional("title", ArgType::String, "short title"),
                ],
            ),
        }
    }
}

#[async_trait]
impl Tool for CreateNoteTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn invoke(&self, args: &ToolArguments, ctx: &ToolContext) -> Result<String> {
        let text = string_arg(Self::NAME, args, "text")?;
        if text.trim().is_empty() {
            return Err(HopperError::tool(Self::NAME, "note text is empty"));
        }
        let mut metadata = serde_json::json!({ "source": "agent" });
        if let Some(title) = args.get("title").and_then(|v| v.as_str()) {
            metadata["title"] = serde_json::Value::from(title);
        }

        let ingestion = self
            .retriever
            .ingest(text, &ctx.user_id, metadata)
            .await
            .map_err(|e| HopperError::tool(Self::NAME, e.to_string()))?;

        info!(
            document_id = %ingestion.document_id,
            owner = %ctx.user_id,
            entities = ingestion.entities.len(),
            "Note saved"
        );
        Ok(format!(
            "Saved note {} ({} entities linked)",
            ingestion.document_id,
            ingestion.entities.len()
        ))
    }
}

pub struct SearchNotesTool {
    retriever: Arc<dyn Retriever>,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
    hop_depth: u32,
    schema: ToolSchema,
}

impl SearchNotesTool {
    pub const NAME: &'static str = "search_notes";

    pub fn new(knowledge: &Knowledge, config: &AppConfig) -> Self {
        Self {
            retriever: knowledge.retriever.clone(),
            embedder: knowledge.embedder.clone(),
            top_k: config.retrieval.top_k,
            hop_depth: config.retrieval.hop_depth,
            schema: ToolSchema::new(
                Self::NAME,
                "Search the user's notes and documents",
                vec![
                    ToolParam::required("query", ArgType::String, "what to look for"),
                    ToolParam::optional("limit", ArgType::Integer, "maximum results"),
                ],
            ),
        }
    }
}

#[async_trait]
impl Tool for SearchNotesTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn invoke(&self, args: &ToolArguments, ctx: &ToolContext) -> Result<String> {
        let text = string_arg(Self::NAME, args, "query")?;
        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .map_or(self.top_k, |n| n as usize)
            .clamp(1, MAX_NOTE_RESULTS);

        let embedding = self
            .embedder
            .embed(text)
            .await
            .map_err(|e| HopperError::tool(Self::NAME, e.to_string()))?;
        let retrieval = self
            .retriever
            .retrieve(&RetrievalQuery {
                owner: ctx.user_id.clone(),
                embedding,
                text: Some(text.to_string()),
                top_k: limit,
                hop_depth: self.hop_depth,
            })
            .await;

        if retrieval.is_empty() {
            return match retrieval.warning {
                Some(warning) => Err(HopperError::tool(
                    Self::NAME,
                    format!("notes unavailable: {warning}"),
                )),
                None => Ok("No matching notes.".into()),
            };
        }
        let lines: Vec<String> = retrieval
            .items
            .iter()
            .take(limit)
            .enumerate()
            .map(|(i, item)| {
                format!(
                    "{}. [{:.2}] {}",
                    i + 1,
                    item.relevance,
                    excerpt(&item.document.text)
                )
            })
            .collect();
        Ok(lines.join("\n"))
    }
}

pub struct ConnectEntitiesTool {
    graph: Arc<dyn GraphStore>,
    schema: ToolSchema,
}

impl ConnectEntitiesTool {
    pub const NAME: &'static str = "connect_entities";

    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self {
            graph,
            schema: ToolSchema::new(
                Self::NAME,
                "Explain how two named people, projects or events are connected",
                vec![
                    ToolParam::required("from", ArgType::String, "first name"),
                    ToolParam::required("to", ArgType::String, "second name"),
                ],
            ),
        }
    }
}

#[async_trait]
impl Tool for ConnectEntitiesTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn invoke(&self, args: &ToolArguments, ctx: &ToolContext) -> Result<String> {
        let from = string_arg(Self::NAME, args, "from")?;
        let to = string_arg(Self::NAME, args, "to")?;

        let paths = self
            .graph
            .find_paths(&ctx.user_id, from, to, PATH_HOPS, PATH_RESULTS)
            .await
            .map_err(|e| HopperError::tool(Self::NAME, e.to_string()))?;

        if paths.is_empty() {
            return Ok(format!(
                "No connection found between '{from}' and '{to}' within {PATH_HOPS} hops."
            ));
        }
        Ok(paths
            .iter()
            .map(|p| p.describe())
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopper_core::entity::{Entity, EntityType, Relation, RelationType};
    use hopper_extraction::HashingEmbedder;
    use hopper_graph::{InMemoryGraphStore, RetrievalSettings, SimilarityRetriever};
    use serde_json::json;

    fn knowledge() -> (Knowledge, Arc<InMemoryGraphStore>) {
        let store = Arc::new(InMemoryGraphStore::default());
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(64));
        let retriever = Arc::new(SimilarityRetriever::new(
            store.clone(),
            embedder.clone(),
            RetrievalSettings::default(),
        ));
        let knowledge = Knowledge {
            retriever,
            embedder,
            graph: store.clone(),
        };
        (knowledge, store)
    }

    fn args(value: serde_json::Value) -> ToolArguments {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn notes_are_saved_and_found_per_user() {
        let (knowledge, store) = knowledge();
        let create = CreateNoteTool::new(knowledge.retriever.clone());
        let search = SearchNotesTool::new(&knowledge, &AppConfig::default());
        let alice = ToolContext::for_user("alice");

        let out = create
            .invoke(
                &args(json!({"text": "Budget review moved to Thursday", "title": "budget"})),
                &alice,
            )
            .await
            .unwrap();
        assert!(out.starts_with("Saved note"));
        assert_eq!(store.similarity_search("alice", &[0.0; 64], 5).await.unwrap().len(), 1);

        let found = search
            .invoke(&args(json!({"query": "budget review"})), &alice)
            .await
            .unwrap();
        assert!(found.starts_with("1. "));
        assert!(found.contains("Budget review moved to Thursday"));

        let theirs = search
            .invoke(&args(json!({"query": "budget review"})), &ToolContext::for_user("bob"))
            .await
            .unwrap();
        assert_eq!(theirs, "No matching notes.");
    }

    #[tokio::test]
    async fn empty_note_is_a_tool_error() {
        let (knowledge, _) = knowledge();
        let create = CreateNoteTool::new(knowledge.retriever);
        let err = create
            .invoke(&args(json!({"text": "   "})), &ToolContext::for_user("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, HopperError::Tool { .. }));
    }

    #[tokio::test]
    async fn offline_store_makes_search_fail() {
        let (knowledge, store) = knowledge();
        store.set_available(false);
        let search = SearchNotesTool::new(&knowledge, &AppConfig::default());
        let err = search
            .invoke(&args(json!({"query": "anything"})), &ToolContext::for_user("alice"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unavailable"));
    }

    #[tokio::test]
    async fn connections_are_described_for_the_caller_only() {
        let (knowledge, store) = knowledge();
        let paul = store
            .merge_entity(&Entity::new("alice", EntityType::Person, "Paul Martin"))
            .await
            .unwrap();
        let acme = store
            .merge_entity(&Entity::new("alice", EntityType::Organization, "Acme"))
            .await
            .unwrap();
        store
            .add_relation(&Relation::new("alice", paul.id, acme.id, RelationType::WorksFor))
            .await
            .unwrap();

        let tool = ConnectEntitiesTool::new(knowledge.graph.clone());
        let request = args(json!({"from": "paul martin", "to": "ACME"}));

        let out = tool.invoke(&request, &ToolContext::for_user("alice")).await.unwrap();
        assert_eq!(out, "Paul Martin -[WORKS_FOR]-> Acme");

        let out = tool.invoke(&request, &ToolContext::for_user("bob")).await.unwrap();
        assert!(out.starts_with("No connection found"));
    }

    #[test]
    fn long_text_is_cut_to_an_excerpt() {
        let text = "word ".repeat(100);
        let cut = excerpt(&text);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), EXCERPT_CHARS + 3);
    }
}
