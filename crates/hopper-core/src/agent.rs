use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::ConversationTurn;
use crate::tool::ToolArguments;

/// Observable position of an action run. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Thinking,
    Acting,
    Observing,
    Done,
    Failed,
}

impl AgentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentState::Done | AgentState::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    pub arguments: ToolArguments,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub content: String,
    pub is_error: bool,
}

impl Observation {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { output: String },
    Error { message: String },
}

/// Record of one tool call as it actually happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub arguments: ToolArguments,
    pub outcome: ToolOutcome,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStep {
    pub index: usize,
    pub thought: String,
    pub action: Option<ToolCall>,
    pub invocation: Option<ToolInvocation>,
    pub observation: Option<Observation>,
    pub finish: Option<String>,
}

impl AgentStep {
    pub fn new(index: usize, thought: impl Into<String>) -> Self {
        Self {
            index,
            thought: thought.into(),
            action: None,
            invocation: None,
            observation: None,
            finish: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AgentOutcome {
    Done { answer: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRun {
    pub task: String,
    pub steps: Vec<AgentStep>,
    pub state: AgentState,
    pub outcome: AgentOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl AgentRun {
    pub fn answer(&self) -> Option<&str> {
        match &self.outcome {
            AgentOutcome::Done { answer } => Some(answer),
            AgentOutcome::Failed { .. } => None,
        }
    }

    pub fn invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.steps.iter().filter_map(|s| s.invocation.as_ref())
    }
}

/// Bounded think/act/observe agent. A run always terminates in `Done` or
/// `Failed`; it never returns an error to the caller.
#[async_trait]
pub trait ActionAgent: Send + Sync {
    fn tool_names(&self) -> Vec<String>;

    /// Runs `task` for `user_id`; tools see the user through their
    /// `ToolContext`.
    async fn run(&self, user_id: &str, task: &str, context: &[ConversationTurn]) -> AgentRun;
}
