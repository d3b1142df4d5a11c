use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::entity::RelationType;
use crate::error::{HopperError, Result};
use crate::retrieval::RetrievalStrategy;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GraphBackend {
    Memory,
    Neo4j,
}

impl FromStr for GraphBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "in_memory" => Ok(GraphBackend::Memory),
            "neo4j" => Ok(GraphBackend::Neo4j),
            other => Err(format!("unknown graph backend '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Anthropic,
    LlamaCpp,
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(LlmProvider::Anthropic),
            "llamacpp" | "llama.cpp" | "llama" => Ok(LlmProvider::LlamaCpp),
            other => Err(format!("unknown llm provider '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderKind {
    Hashing,
    Ollama,
}

impl FromStr for EmbedderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hashing" | "hash" => Ok(EmbedderKind::Hashing),
            "ollama" => Ok(EmbedderKind::Ollama),
            other => Err(format!("unknown embedder '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    pub backend: GraphBackend,
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub url: String,
    pub model: String,
    pub anthropic_api_key: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub kind: EmbedderKind,
    pub ollama_url: String,
    pub model: String,
    pub dimension: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub strategy: RetrievalStrategy,
    pub top_k: usize,
    pub hop_depth: u32,
    pub relevance_threshold: f32,
    pub hop_decay: f32,
    pub timeout_ms: u64,
    /// Edge types followed during traversal. Empty means all.
    pub traversal_edges: Vec<RelationType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub classifier_timeout_ms: u64,
    pub classifier_turns: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub max_steps: usize,
    pub step_timeout_secs: u64,
    pub sandbox_dir: PathBuf,
    pub contacts_file: Option<PathBuf>,
    pub allowed_commands: Vec<String>,
    pub command_timeout_secs: u64,
}

pub const DEFAULT_ALLOWED_COMMANDS: &[&str] = &[
    "ls", "pwd", "echo", "cat", "grep", "find", "wc", "head", "tail", "date", "whoami",
    "hostname", "df", "du", "ps",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    pub char_budget: usize,
    pub max_turns: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub event_queue: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub graph: GraphConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub router: RouterConfig,
    pub agent: AgentConfig,
    pub conversation: ConversationConfig,
    pub server: ServerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            graph: GraphConfig {
                backend: GraphBackend::Memory,
                neo4j_uri: "bolt://localhost:7687".into(),
                neo4j_user: "neo4j".into(),
                neo4j_password: "hopper".into(),
            },
            llm: LlmConfig {
                provider: LlmProvider::LlamaCpp,
                url: "http://localhost:8080".into(),
                model: "claude-sonnet-4-20250514".into(),
                anthropic_api_key: String::new(),
                timeout_secs: 60,
            },
            embedding: EmbeddingConfig {
                kind: EmbedderKind::Hashing,
                ollama_url: "http://localhost:11434".into(),
                model: "nomic-embed-text".into(),
                dimension: 384,
            },
            retrieval: RetrievalConfig {
                strategy: RetrievalStrategy::GraphAugmented,
                top_k: 5,
                hop_depth: 2,
                relevance_threshold: 0.5,
                hop_decay: 0.8,
                timeout_ms: 5000,
                traversal_edges: Vec::new(),
            },
            router: RouterConfig {
                classifier_timeout_ms: 100,
                classifier_turns: 4,
            },
            agent: AgentConfig {
                max_steps: 5,
                step_timeout_secs: 30,
                sandbox_dir: std::env::temp_dir().join("hopper-sandbox"),
                contacts_file: None,
                allowed_commands: DEFAULT_ALLOWED_COMMANDS.iter().map(|c| c.to_string()).collect(),
                command_timeout_secs: 10,
            },
            conversation: ConversationConfig {
                char_budget: 4000,
                max_turns: 20,
            },
            server: ServerConfig {
                host: "0.0.0.0".into(),
                port: 8080,
                event_queue: 64,
            },
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let d = Self::default();

        let traversal_edges = env_list("HOPPER_TRAVERSAL_EDGES")
            .iter()
            .filter_map(|label| {
                let parsed = RelationType::from_label(label);
                if parsed.is_none() {
                    tracing::warn!(label = %label, "Ignoring unknown traversal edge type");
                }
                parsed
            })
            .collect();

        let allowed_commands = {
            let list = env_list("HOPPER_ALLOWED_COMMANDS");
            if list.is_empty() {
                d.agent.allowed_commands.clone()
            } else {
                list
            }
        };

        Self {
            graph: GraphConfig {
                backend: env_parse("HOPPER_GRAPH_BACKEND", d.graph.backend),
                neo4j_uri: env_or("NEO4J_URI", &d.graph.neo4j_uri),
                neo4j_user: env_or("NEO4J_USER", &d.graph.neo4j_user),
                neo4j_password: env_or("NEO4J_PASSWORD", &d.graph.neo4j_password),
            },
            llm: LlmConfig {
                provider: env_parse("HOPPER_LLM_PROVIDER", d.llm.provider),
                url: env_or("HOPPER_LLM_URL", &d.llm.url),
                model: env_or("HOPPER_LLM_MODEL", &d.llm.model),
                anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
                timeout_secs: env_parse("HOPPER_GENERATION_TIMEOUT_SECS", d.llm.timeout_secs),
            },
            embedding: EmbeddingConfig {
                kind: env_parse("HOPPER_EMBEDDER", d.embedding.kind),
                ollama_url: env_or("OLLAMA_URL", &d.embedding.ollama_url),
                model: env_or("HOPPER_EMBEDDING_MODEL", &d.embedding.model),
                dimension: env_parse("HOPPER_EMBEDDING_DIM", d.embedding.dimension),
            },
            retrieval: RetrievalConfig {
                strategy: env_parse("HOPPER_RETRIEVAL_STRATEGY", d.retrieval.strategy),
                top_k: env_parse("HOPPER_TOP_K", d.retrieval.top_k),
                hop_depth: env_parse("HOPPER_HOP_DEPTH", d.retrieval.hop_depth),
                relevance_threshold: env_parse(
                    "HOPPER_RELEVANCE_THRESHOLD",
                    d.retrieval.relevance_threshold,
                ),
                hop_decay: env_parse("HOPPER_HOP_DECAY", d.retrieval.hop_decay),
                timeout_ms: env_parse("HOPPER_RETRIEVAL_TIMEOUT_MS", d.retrieval.timeout_ms),
                traversal_edges,
            },
            router: RouterConfig {
                classifier_timeout_ms: env_parse(
                    "HOPPER_CLASSIFIER_TIMEOUT_MS",
                    d.router.classifier_timeout_ms,
                ),
                classifier_turns: env_parse("HOPPER_CLASSIFIER_TURNS", d.router.classifier_turns),
            },
            agent: AgentConfig {
                max_steps: env_parse("HOPPER_AGENT_MAX_STEPS", d.agent.max_steps),
                step_timeout_secs: env_parse(
                    "HOPPER_AGENT_STEP_TIMEOUT_SECS",
                    d.agent.step_timeout_secs,
                ),
                sandbox_dir: std::env::var("HOPPER_SANDBOX_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(d.agent.sandbox_dir),
                contacts_file: std::env::var("HOPPER_CONTACTS_FILE").ok().map(PathBuf::from),
                allowed_commands,
                command_timeout_secs: env_parse(
                    "HOPPER_COMMAND_TIMEOUT_SECS",
                    d.agent.command_timeout_secs,
                ),
            },
            conversation: ConversationConfig {
                char_budget: env_parse("HOPPER_HISTORY_CHAR_BUDGET", d.conversation.char_budget),
                max_turns: env_parse("HOPPER_HISTORY_MAX_TURNS", d.conversation.max_turns),
            },
            server: ServerConfig {
                host: env_or("SERVER_HOST", &d.server.host),
                port: env_parse("SERVER_PORT", d.server.port),
                event_queue: env_parse("HOPPER_EVENT_QUEUE", d.server.event_queue),
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        let check_url = |name: &str, value: &str| {
            url::Url::parse(value)
                .map(|_| ())
                .map_err(|e| HopperError::Config(format!("{name} '{value}' is not a valid URL: {e}")))
        };

        if self.graph.backend == GraphBackend::Neo4j {
            check_url("NEO4J_URI", &self.graph.neo4j_uri)?;
        }
        match self.llm.provider {
            LlmProvider::LlamaCpp => check_url("HOPPER_LLM_URL", &self.llm.url)?,
            LlmProvider::Anthropic if self.llm.anthropic_api_key.is_empty() => {
                return Err(HopperError::Config(
                    "ANTHROPIC_API_KEY is required for the anthropic provider".into(),
                ));
            }
            LlmProvider::Anthropic => {}
        }
        if self.embedding.kind == EmbedderKind::Ollama {
            check_url("OLLAMA_URL", &self.embedding.ollama_url)?;
        }
        if self.embedding.dimension == 0 {
            return Err(HopperError::Config("embedding dimension must be non-zero".into()));
        }
        if !(0.0..=1.0).contains(&self.retrieval.relevance_threshold) {
            return Err(HopperError::Config(format!(
                "relevance threshold {} is outside [0, 1]",
                self.retrieval.relevance_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.retrieval.hop_decay) {
            return Err(HopperError::Config(format!(
                "hop decay {} is outside [0, 1]",
                self.retrieval.hop_decay
            )));
        }
        if self.retrieval.top_k == 0 {
            return Err(HopperError::Config("top_k must be non-zero".into()));
        }
        if self.agent.max_steps == 0 {
            return Err(HopperError::Config("agent step ceiling must be non-zero".into()));
        }
        Ok(())
    }
}
