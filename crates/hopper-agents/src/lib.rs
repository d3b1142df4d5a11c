use std::sync::Arc;
use std::time::Duration;

use hopper_core::config::AppConfig;
use hopper_core::error::Result;
use hopper_core::generation::TextGenerator;
use hopper_core::tool::Tool;

pub mod action;
mod agent;
pub mod tools;

pub use action::{parse_reply, validate, ActionError, ParsedReply, ProposedAction};
pub use agent::ToolAgent;
pub use tools::{
    ConnectEntitiesTool, Contact, ContactBook, CreateNoteTool, Knowledge, ListFilesTool,
    LookupContactTool, Outbox, OutgoingMessage, ReadFileTool, RunCommandTool, Sandbox,
    SearchNotesTool, SendMessageTool, WriteFileTool,
};

/// The built-in tools plus the handles callers need to inspect their effects.
pub struct Toolbox {
    pub tools: Vec<Arc<dyn Tool>>,
    pub outbox: Arc<Outbox>,
    pub sandbox: Arc<Sandbox>,
}

impl Toolbox {
    pub fn new(config: &AppConfig, contacts: ContactBook, knowledge: Knowledge) -> Self {
        let outbox = Arc::new(Outbox::new());
        let sandbox = Arc::new(Sandbox::new(config.agent.sandbox_dir.clone()));
        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(LookupContactTool::new(contacts)),
            Arc::new(SendMessageTool::new(outbox.clone())),
            Arc::new(ReadFileTool::new(sandbox.clone())),
            Arc::new(WriteFileTool::new(sandbox.clone())),
            Arc::new(ListFilesTool::new(sandbox.clone())),
            Arc::new(RunCommandTool::new(
                config.agent.allowed_commands.clone(),
                config.agent.sandbox_dir.clone(),
                Duration::from_secs(config.agent.command_timeout_secs),
            )),
            Arc::new(CreateNoteTool::new(knowledge.retriever.clone())),
            Arc::new(SearchNotesTool::new(&knowledge, config)),
            Arc::new(ConnectEntitiesTool::new(knowledge.graph.clone())),
        ];
        Self {
            tools,
            outbox,
            sandbox,
        }
    }

    /// Builds the toolbox from configuration: creates the sandbox folder and
    /// loads the contacts file when one is set.
    pub async fn from_config(config: &AppConfig, knowledge: Knowledge) -> Result<Self> {
        let contacts = match &config.agent.contacts_file {
            Some(path) => match ContactBook::load(path).await {
                Ok(book) => book,
                Err(e) => {
                    tracing::warn!(error = %e, "Contacts unavailable, continuing with an empty directory");
                    ContactBook::default()
                }
            },
            None => ContactBook::default(),
        };
        let toolbox = Self::new(config, contacts, knowledge);
        toolbox.sandbox.ensure_root().await?;
        tracing::info!(
            tools = toolbox.tools.len(),
            sandbox = %toolbox.sandbox.root().display(),
            "Toolbox ready"
        );
        Ok(toolbox)
    }

    pub fn agent(&self, generator: Arc<dyn TextGenerator>, config: &AppConfig) -> ToolAgent {
        ToolAgent::new(generator, self.tools.clone(), config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopper_core::agent::ActionAgent;
    use hopper_core::generation::GenerationRequest;

    struct Silent;

    #[async_trait::async_trait]
    impl TextGenerator for Silent {
        fn name(&self) -> &str {
            "silent"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
            Ok("FINISH: nothing to do".into())
        }
    }

    #[tokio::test]
    async fn toolbox_registers_every_builtin_tool() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.agent.sandbox_dir = dir.path().join("sandbox");

        let store = Arc::new(hopper_graph::InMemoryGraphStore::default());
        let embedder: Arc<dyn hopper_core::embedding::Embedder> =
            Arc::new(hopper_extraction::HashingEmbedder::new(32));
        let knowledge = Knowledge {
            retriever: Arc::new(hopper_graph::SimilarityRetriever::new(
                store.clone(),
                embedder.clone(),
                hopper_graph::RetrievalSettings::default(),
            )),
            embedder,
            graph: store,
        };

        let toolbox = Toolbox::from_config(&config, knowledge).await.unwrap();
        assert!(toolbox.sandbox.root().exists());

        let agent = toolbox.agent(Arc::new(Silent), &config);
        assert_eq!(
            agent.tool_names(),
            vec![
                "connect_entities",
                "create_note",
                "list_files",
                "lookup_contact",
                "read_file",
                "run_command",
                "search_notes",
                "send_message",
                "write_file"
            ]
        );
    }
}
