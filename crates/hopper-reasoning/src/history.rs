use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::RwLock;

use hopper_core::conversation::{ConversationTurn, HistoryStore};
use hopper_core::error::Result;

/// Per-user turn log kept in memory, oldest turns evicted past `max_turns`.
pub struct InMemoryHistoryStore {
    max_turns: usize,
    turns: RwLock<HashMap<String, VecDeque<ConversationTurn>>>,
}

impl InMemoryHistoryStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns: max_turns.max(1),
            turns: RwLock::new(HashMap::new()),
        }
    }

    pub async fn user_count(&self) -> usize {
        self.turns.read().await.len()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append_turn(&self, user_id: &str, turn: ConversationTurn) -> Result<()> {
        let mut turns = self.turns.write().await;
        let log = turns.entry(user_id.to_string()).or_default();
        log.push_back(turn);
        while log.len() > self.max_turns {
            log.pop_front();
        }
        Ok(())
    }

    async fn recent_turns(&self, user_id: &str, limit: usize) -> Result<Vec<ConversationTurn>> {
        let turns = self.turns.read().await;
        Ok(turns
            .get(user_id)
            .map(|log| {
                let skip = log.len().saturating_sub(limit);
                log.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keeps_only_the_newest_turns() {
        let store = InMemoryHistoryStore::new(3);
        for i in 0..5 {
            store
                .append_turn("alice", ConversationTurn::user(format!("turn {i}")))
                .await
                .unwrap();
        }
        let turns = store.recent_turns("alice", 10).await.unwrap();
        let texts: Vec<&str> = turns.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["turn 2", "turn 3", "turn 4"]);

        let last = store.recent_turns("alice", 1).await.unwrap();
        assert_eq!(last[0].text, "turn 4");
    }

    #[tokio::test]
    async fn users_are_isolated() {
        let store = InMemoryHistoryStore::new(10);
        store.append_turn("alice", ConversationTurn::user("salut")).await.unwrap();
        assert!(store.recent_turns("bob", 10).await.unwrap().is_empty());
        assert_eq!(store.user_count().await, 1);
    }
}
