use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::User,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// One inbound request. The caller owns it; the orchestrator borrows it
/// mutably for the duration of a single invocation and appends the new
/// exchange to `context`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub text: String,
    pub user_id: String,
    #[serde(default)]
    pub context: Vec<ConversationTurn>,
}

impl Request {
    pub fn new(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            user_id: user_id.into(),
            context: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: Vec<ConversationTurn>) -> Self {
        self.context = context;
        self
    }
}

/// Renders the last `limit` turns as `speaker: text` lines for prompts.
pub fn render_turns(turns: &[ConversationTurn], limit: usize) -> String {
    let start = turns.len().saturating_sub(limit);
    turns[start..]
        .iter()
        .map(|t| format!("{}: {}", t.speaker.as_str(), t.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Drops the oldest turns until the total text length fits `char_budget`.
/// The most recent turn is always kept.
pub fn truncate_to_budget(turns: &mut Vec<ConversationTurn>, char_budget: usize) -> usize {
    let mut total: usize = turns.iter().map(|t| t.text.chars().count()).sum();
    let mut dropped = 0;
    while total > char_budget && turns.len() > 1 {
        let oldest = turns.remove(0);
        total -= oldest.text.chars().count();
        dropped += 1;
    }
    dropped
}

/// Conversation-history collaborator, scoped by user id.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append_turn(&self, user_id: &str, turn: ConversationTurn) -> Result<()>;
    async fn recent_turns(&self, user_id: &str, limit: usize) -> Result<Vec<ConversationTurn>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_drops_oldest_first() {
        let mut turns = vec![
            ConversationTurn::user("aaaaaaaaaa"),
            ConversationTurn::assistant("bbbbbbbbbb"),
            ConversationTurn::user("cccccccccc"),
        ];
        let dropped = truncate_to_budget(&mut turns, 20);
        assert_eq!(dropped, 1);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].text, "bbbbbbbbbb");
    }

    #[test]
    fn truncation_keeps_last_turn_even_if_over_budget() {
        let mut turns = vec![ConversationTurn::user("x".repeat(50))];
        truncate_to_budget(&mut turns, 10);
        assert_eq!(turns.len(), 1);
    }

    #[test]
    fn render_turns_takes_most_recent() {
        let turns = vec![
            ConversationTurn::user("one"),
            ConversationTurn::assistant("two"),
            ConversationTurn::user("three"),
        ];
        assert_eq!(render_turns(&turns, 2), "assistant: two\nuser: three");
    }
}
