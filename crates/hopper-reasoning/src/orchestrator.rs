use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use hopper_core::agent::{ActionAgent, AgentOutcome, AgentRun};
use hopper_core::config::AppConfig;
use hopper_core::conversation::{render_turns, truncate_to_budget, ConversationTurn, HistoryStore, Request};
use hopper_core::decision::DecisionTag;
use hopper_core::embedding::Embedder;
use hopper_core::error::{HopperError, Result};
use hopper_core::events::{EventBus, PipelineStage, ProgressEvent};
use hopper_core::generation::{GenerationRequest, TextGenerator};
use hopper_core::response::{Expansion, Response, SourceRef};
use hopper_core::retrieval::{Retrieval, RetrievalQuery, Retriever};

use crate::expander::QueryExpander;
use crate::router::DecisionRouter;

const EXCERPT_CHARS: usize = 240;

const ASSISTANT_SYSTEM: &str = "You are Hopper, a personal assistant. Answer in the user's \
language, briefly and concretely. When notes are provided, rely on them and say so when they \
do not contain the answer.";

const GENERATION_FALLBACK: &str = "I could not produce an answer right now. Please try again.";

/// Tunables the orchestrator reads from configuration once.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub top_k: usize,
    pub hop_depth: u32,
    pub relevance_threshold: f32,
    pub char_budget: usize,
    pub prompt_turns: usize,
    pub generation_timeout: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            hop_depth: config.retrieval.hop_depth,
            relevance_threshold: config.retrieval.relevance_threshold,
            char_budget: config.conversation.char_budget,
            prompt_turns: config.router.classifier_turns,
            generation_timeout: Duration::from_secs(config.llm.timeout_secs),
        }
    }
}

/// Collaborators the orchestrator is assembled from.
pub struct Collaborators {
    pub generator: Arc<dyn TextGenerator>,
    pub embedder: Arc<dyn Embedder>,
    pub retriever: Arc<dyn Retriever>,
    pub agent: Arc<dyn ActionAgent>,
    pub history: Arc<dyn HistoryStore>,
    pub events: Arc<EventBus>,
}

/// Single entry point for a request: route, run one branch, generate, and
/// record the exchange.
pub struct Orchestrator {
    router: DecisionRouter,
    expander: QueryExpander,
    generator: Arc<dyn TextGenerator>,
    embedder: Arc<dyn Embedder>,
    retriever: Arc<dyn Retriever>,
    agent: Arc<dyn ActionAgent>,
    history: Arc<dyn HistoryStore>,
    events: Arc<EventBus>,
    settings: OrchestratorSettings,
}

/// What a branch hands back before the exchange is recorded.
struct BranchResult {
    text: String,
    sources: Vec<SourceRef>,
    agent_run: Option<AgentRun>,
    expansion: Option<Expansion>,
}

impl Orchestrator {
    pub fn new(config: &AppConfig, parts: Collaborators) -> Self {
        let settings = OrchestratorSettings::from_config(config);
        let router = DecisionRouter::new(Some(parts.generator.clone()), config);
        let expander = QueryExpander::new(
            Some(parts.generator.clone()),
            parts.embedder.clone(),
            settings.generation_timeout,
        );
        Self {
            router,
            expander,
            generator: parts.generator,
            embedder: parts.embedder,
            retriever: parts.retriever,
            agent: parts.agent,
            history: parts.history,
            events: parts.events,
            settings,
        }
    }

    pub fn router(&self) -> &DecisionRouter {
        &self.router
    }

    pub fn retriever(&self) -> &Arc<dyn Retriever> {
        &self.retriever
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Handles one request end to end. Collaborator failures degrade into
    /// `warnings`; only an unusable request is an error.
    #[instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn handle(&self, request: &mut Request) -> Result<Response> {
        if request.user_id.trim().is_empty() {
            return Err(HopperError::Validation("user_id must not be empty".into()));
        }

        let request_id = Uuid::new_v4();
        let mut warnings = Vec::new();
        self.emit(request_id, &request.user_id, PipelineStage::Received, json!({ "text": request.text }));

        let decision = self.router.decide(&request.text, &request.context).await;
        self.emit(
            request_id,
            &request.user_id,
            PipelineStage::Decided,
            json!({ "decision": decision.tag, "reason": decision.reason }),
        );

        let branch = match decision.tag {
            DecisionTag::Direct => self.direct(request_id, request, &mut warnings).await,
            DecisionTag::Knowledge => self.knowledge(request_id, request, &mut warnings).await,
            DecisionTag::Action => self.action(request_id, request).await,
            DecisionTag::Fuzzy => self.fuzzy(request_id, request, &mut warnings).await,
        };

        self.record_exchange(request, &branch.text, &mut warnings).await;

        let stage = match &branch.agent_run {
            Some(run) if matches!(run.outcome, AgentOutcome::Failed { .. }) => PipelineStage::Failed,
            _ => PipelineStage::Completed,
        };
        self.emit(
            request_id,
            &request.user_id,
            stage,
            json!({ "sources": branch.sources.len(), "warnings": warnings.len() }),
        );

        info!(
            decision = %decision.tag,
            sources = branch.sources.len(),
            warnings = warnings.len(),
            "Request handled"
        );

        Ok(Response {
            request_id,
            text: branch.text,
            decision,
            sources: branch.sources,
            agent_run: branch.agent_run,
            expansion: branch.expansion,
            warnings,
        })
    }

    // ------------------------------------------------------------------
    // Branches
    // ------------------------------------------------------------------

    async fn direct(&self, request_id: Uuid, request: &Request, warnings: &mut Vec<String>) -> BranchResult {
        let text = self.generate(request_id, request, &[], warnings).await;
        BranchResult {
            text,
            sources: Vec::new(),
            agent_run: None,
            expansion: None,
        }
    }

    async fn knowledge(&self, request_id: Uuid, request: &Request, warnings: &mut Vec<String>) -> BranchResult {
        let embedding = match self.embedder.embed(&request.text).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, "Query embedding failed, answering without context");
                warnings.push(format!("query embedding failed: {e}"));
                None
            }
        };

        let sources = match embedding {
            Some(embedding) => self.retrieve(request_id, request, embedding, warnings).await,
            None => Vec::new(),
        };

        let text = self.generate(request_id, request, &sources, warnings).await;
        BranchResult {
            text,
            sources,
            agent_run: None,
            expansion: None,
        }
    }

    async fn action(&self, request_id: Uuid, request: &Request) -> BranchResult {
        let run = self.agent.run(&request.user_id, &request.text, &request.context).await;

        for step in &run.steps {
            self.emit(
                request_id,
                &request.user_id,
                PipelineStage::AgentStep,
                json!({
                    "index": step.index,
                    "tool": step.action.as_ref().map(|a| a.tool.clone()),
                    "finished": step.finish.is_some(),
                }),
            );
        }

        let text = match &run.outcome {
            AgentOutcome::Done { answer } => answer.clone(),
            AgentOutcome::Failed { reason } => {
                format!("I could not complete the action: {reason}")
            }
        };
        BranchResult {
            text,
            sources: Vec::new(),
            agent_run: Some(run),
            expansion: None,
        }
    }

    async fn fuzzy(&self, request_id: Uuid, request: &Request, warnings: &mut Vec<String>) -> BranchResult {
        self.emit(request_id, &request.user_id, PipelineStage::Expanding, json!({}));
        let expansion = self.expander.expand(&request.text).await;
        self.emit(
            request_id,
            &request.user_id,
            PipelineStage::Expanded,
            json!({
                "query_type": expansion.query_type,
                "candidates": expansion.candidate_queries,
                "used_fallback": expansion.used_fallback,
            }),
        );

        let sources = match self.expander.embed_expansion(&expansion).await {
            Ok(embedding) => self.retrieve(request_id, request, embedding, warnings).await,
            Err(e) => {
                warn!(error = %e, "Expansion embedding failed, answering without context");
                warnings.push(format!("expansion embedding failed: {e}"));
                Vec::new()
            }
        };

        let text = self.generate(request_id, request, &sources, warnings).await;
        BranchResult {
            text,
            sources,
            agent_run: None,
            expansion: Some(expansion),
        }
    }

    // ------------------------------------------------------------------
    // Shared stages
    // ------------------------------------------------------------------

    async fn retrieve(
        &self,
        request_id: Uuid,
        request: &Request,
        embedding: Vec<f32>,
        warnings: &mut Vec<String>,
    ) -> Vec<SourceRef> {
        self.emit(request_id, &request.user_id, PipelineStage::Retrieving, json!({}));

        let query = RetrievalQuery {
            owner: request.user_id.clone(),
            embedding,
            text: Some(request.text.clone()),
            top_k: self.settings.top_k,
            hop_depth: self.settings.hop_depth,
        };
        let retrieval: Retrieval = self.retriever.retrieve(&query).await;
        if let Some(warning) = &retrieval.warning {
            warnings.push(warning.clone());
        }
        let found = retrieval.items.len();
        let relevant = retrieval.filter_relevant(self.settings.relevance_threshold);

        self.emit(
            request_id,
            &request.user_id,
            PipelineStage::Retrieved,
            json!({ "found": found, "relevant": relevant.items.len() }),
        );
        debug!(found, relevant = relevant.items.len(), "Retrieval filtered");

        relevant
            .items
            .into_iter()
            .map(|item| SourceRef {
                document_id: item.document.id,
                excerpt: excerpt(&item.document.text),
                relevance: item.relevance,
                kind: item.kind,
                hops: item.hops,
            })
            .collect()
    }

    async fn generate(
        &self,
        request_id: Uuid,
        request: &Request,
        sources: &[SourceRef],
        warnings: &mut Vec<String>,
    ) -> String {
        self.emit(
            request_id,
            &request.user_id,
            PipelineStage::Generating,
            json!({ "sources": sources.len() }),
        );

        let prompt = build_prompt(
            &request.text,
            &render_turns(&request.context, self.settings.prompt_turns),
            sources,
        );
        let generation = GenerationRequest::new(prompt).system(ASSISTANT_SYSTEM);

        match tokio::time::timeout(self.settings.generation_timeout, self.generator.generate(&generation)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(Ok(_)) => {
                warn!("Generator returned an empty answer");
                warnings.push("generator returned an empty answer".into());
                GENERATION_FALLBACK.into()
            }
            Ok(Err(e)) => {
                warn!(error = %e, generator = self.generator.name(), "Generation failed");
                warnings.push(format!("generation failed: {e}"));
                GENERATION_FALLBACK.into()
            }
            Err(_) => {
                warn!(generator = self.generator.name(), "Generation timed out");
                warnings.push("generation timed out".into());
                GENERATION_FALLBACK.into()
            }
        }
    }

    /// Appends the exchange to the request context (trimmed to the character
    /// budget) and to the history store.
    async fn record_exchange(&self, request: &mut Request, answer: &str, warnings: &mut Vec<String>) {
        let turns = [ConversationTurn::user(&request.text), ConversationTurn::assistant(answer)];
        request.context.extend(turns.iter().cloned());
        let dropped = truncate_to_budget(&mut request.context, self.settings.char_budget);
        if dropped > 0 {
            debug!(dropped, "Trimmed conversation context");
        }

        for turn in turns {
            if let Err(e) = self.history.append_turn(&request.user_id, turn).await {
                warn!(error = %e, "Failed to append conversation turn");
                warnings.push(format!("history not saved: {e}"));
                break;
            }
        }
    }

    fn emit(&self, request_id: Uuid, user_id: &str, stage: PipelineStage, detail: serde_json::Value) {
        self.events
            .publish(ProgressEvent::new(request_id, user_id, stage, detail));
    }
}

fn excerpt(text: &str) -> String {
    let mut out: String = text.chars().take(EXCERPT_CHARS).collect();
    if text.chars().count() > EXCERPT_CHARS {
        out.push('…');
    }
    out
}

fn build_prompt(query: &str, history: &str, sources: &[SourceRef]) -> String {
    let mut prompt = String::new();
    if !sources.is_empty() {
        prompt.push_str("Notes that may help:\n");
        for (i, source) in sources.iter().enumerate() {
            prompt.push_str(&format!("[{}] {}\n", i + 1, source.excerpt));
        }
        prompt.push('\n');
    }
    if !history.is_empty() {
        prompt.push_str("Conversation so far:\n");
        prompt.push_str(history);
        prompt.push_str("\n\n");
    }
    prompt.push_str("user: ");
    prompt.push_str(query);
    prompt.push_str("\nassistant:");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopper_core::retrieval::SupportKind;

    #[test]
    fn prompt_numbers_sources_and_includes_history() {
        let sources = vec![SourceRef {
            document_id: Uuid::new_v4(),
            excerpt: "Le serveur tourne sur le port 8080".into(),
            relevance: 0.9,
            kind: SupportKind::Match,
            hops: 0,
        }];
        let prompt = build_prompt("quel port ?", "user: bonjour", &sources);
        assert!(prompt.starts_with("Notes that may help:\n[1] Le serveur"));
        assert!(prompt.contains("Conversation so far:\nuser: bonjour"));
        assert!(prompt.ends_with("user: quel port ?\nassistant:"));
    }

    #[test]
    fn prompt_without_context_is_just_the_exchange() {
        assert_eq!(build_prompt("salut", "", &[]), "user: salut\nassistant:");
    }

    #[test]
    fn excerpt_is_char_safe() {
        let long = "é".repeat(EXCERPT_CHARS + 10);
        let cut = excerpt(&long);
        assert_eq!(cut.chars().count(), EXCERPT_CHARS + 1);
        assert!(cut.ends_with('…'));
        assert_eq!(excerpt("court"), "court");
    }
}
