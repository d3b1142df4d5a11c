//! Shared fixtures for the cross-crate scenario tests: a scripted text
//! generator and a fully wired in-memory orchestrator.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use hopper_agents::{Contact, ContactBook, Knowledge, Outbox, Toolbox};
use hopper_core::{
    AppConfig, EventBus, GenerationRequest, ProgressEvent, Result, Retriever, TextGenerator,
};
use hopper_extraction::{HashingEmbedder, HeuristicEntityExtractor};
use hopper_graph::{GraphRetriever, InMemoryGraphStore, RetrievalSettings};
use hopper_reasoning::{Collaborators, InMemoryHistoryStore, Orchestrator};

pub const DIMENSION: usize = 128;

type Reply = Box<dyn Fn(&GenerationRequest) -> Result<String> + Send + Sync>;

/// Text generator driven by a closure, recording every request it sees.
pub struct ScriptedGenerator {
    reply: Reply,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(reply: impl Fn(&GenerationRequest) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            reply: Box::new(reply),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Same text for every request.
    pub fn always(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_| Ok(text.clone()))
    }

    /// Classifier prompts get `label`, agent prompts consume `agent_replies`
    /// in order (repeating the last), everything else gets `answer`.
    pub fn scripted(label: &str, agent_replies: &[&str], answer: &str) -> Self {
        let label = label.to_string();
        let answer = answer.to_string();
        let queue: Mutex<VecDeque<String>> =
            Mutex::new(agent_replies.iter().map(|r| r.to_string()).collect());
        Self::new(move |req| {
            if is_classifier(req) {
                return Ok(label.clone());
            }
            if is_agent(req) {
                let mut queue = queue.lock().unwrap();
                let next = if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() };
                return Ok(next.unwrap_or_else(|| "FINISH: nothing left to do".into()));
            }
            Ok(answer.clone())
        })
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&GenerationRequest) -> bool) -> usize {
        self.requests.lock().unwrap().iter().filter(|r| predicate(r)).count()
    }
}

pub fn is_classifier(req: &GenerationRequest) -> bool {
    req.prompt.ends_with("Label:")
}

pub fn is_agent(req: &GenerationRequest) -> bool {
    req.system.as_deref().is_some_and(|s| s.contains("Tools:"))
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        (self.reply)(request)
    }
}

pub fn test_config(sandbox: &TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.embedding.dimension = DIMENSION;
    config.agent.sandbox_dir = sandbox.path().to_path_buf();
    config.agent.step_timeout_secs = 5;
    config.llm.timeout_secs = 5;
    config
}

pub fn contacts() -> ContactBook {
    ContactBook::new(vec![
        Contact::new("Paul Martin", Some("paul.martin@example.com"), Some("+33 6 12 34 56 78")),
        Contact::new("Claire Dubois", Some("claire.dubois@example.com"), None),
    ])
}

/// An orchestrator over in-memory collaborators, with handles on each.
pub struct Harness {
    pub config: AppConfig,
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<InMemoryGraphStore>,
    pub retriever: Arc<dyn Retriever>,
    pub embedder: Arc<HashingEmbedder>,
    pub generator: Arc<ScriptedGenerator>,
    pub history: Arc<InMemoryHistoryStore>,
    pub events: Arc<EventBus>,
    pub outbox: Arc<Outbox>,
    _sandbox: TempDir,
}

impl Harness {
    pub async fn new(generator: ScriptedGenerator) -> Self {
        let sandbox = tempfile::tempdir().unwrap();
        let config = test_config(&sandbox);
        Self::with_config(generator, config, sandbox).await
    }

    pub async fn with_config(generator: ScriptedGenerator, config: AppConfig, sandbox: TempDir) -> Self {
        let generator = Arc::new(generator);
        let store = Arc::new(InMemoryGraphStore::new(Some(DIMENSION)));
        let embedder = Arc::new(HashingEmbedder::new(DIMENSION));
        let retriever: Arc<dyn Retriever> = Arc::new(GraphRetriever::new(
            store.clone(),
            embedder.clone(),
            Arc::new(HeuristicEntityExtractor::default()),
            RetrievalSettings::from_config(&config),
        ));
        let history = Arc::new(InMemoryHistoryStore::new(config.conversation.max_turns));
        let events = Arc::new(EventBus::new(config.server.event_queue));

        let knowledge = Knowledge {
            retriever: retriever.clone(),
            embedder: embedder.clone(),
            graph: store.clone(),
        };
        let toolbox = Toolbox::new(&config, contacts(), knowledge);
        toolbox.sandbox.ensure_root().await.unwrap();
        let agent = Arc::new(toolbox.agent(generator.clone(), &config));

        let orchestrator = Arc::new(Orchestrator::new(
            &config,
            Collaborators {
                generator: generator.clone(),
                embedder: embedder.clone(),
                retriever: retriever.clone(),
                agent,
                history: history.clone(),
                events: events.clone(),
            },
        ));

        Self {
            config,
            orchestrator,
            store,
            retriever,
            embedder,
            generator,
            history,
            events,
            outbox: toolbox.outbox,
            _sandbox: sandbox,
        }
    }

    pub fn knowledge(&self) -> Knowledge {
        Knowledge {
            retriever: self.retriever.clone(),
            embedder: self.embedder.clone(),
            graph: self.store.clone(),
        }
    }

    pub async fn ingest(&self, owner: &str, text: &str) -> uuid::Uuid {
        self.retriever
            .ingest(text, owner, serde_json::Value::Null)
            .await
            .unwrap()
            .document_id
    }
}

/// Everything currently buffered on a subscription.
pub fn drain(receiver: &mut tokio::sync::mpsc::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}
