use std::sync::Arc;
use std::time::Duration;

use bazaar_db::kv::{conversation_key, load_json, store_json, KeyValueStore, StoreError};

use crate::llm::ChatMessage;

pub const MAX_HISTORY_MESSAGES: usize = 20;
pub const HISTORY_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Short-term conversation memory, one capped log per user.
///
/// The TTL is refreshed on append only; reading does not keep a log alive.
#[derive(Clone)]
pub struct ConversationHistory {
    store: Arc<dyn KeyValueStore>,
    capacity: usize,
    ttl: Duration,
}

impl ConversationHistory {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store, capacity: MAX_HISTORY_MESSAGES, ttl: HISTORY_TTL }
    }

    pub async fn get(&self, user_id: &str) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(load_json(self.store.as_ref(), &conversation_key(user_id)).await?.unwrap_or_default())
    }

    pub async fn append(&self, user_id: &str, message: ChatMessage) -> Result<(), StoreError> {
        self.append_many(user_id, vec![message]).await
    }

    /// Appends in order, dropping the oldest entries beyond the cap.
    pub async fn append_many(
        &self,
        user_id: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<(), StoreError> {
        let mut log = self.get(user_id).await?;
        log.extend(messages);
        if log.len() > self.capacity {
            log.drain(..log.len() - self.capacity);
        }
        store_json(self.store.as_ref(), &conversation_key(user_id), &log, self.ttl).await
    }

    pub async fn clear(&self, user_id: &str) -> Result<(), StoreError> {
        self.store.delete(&conversation_key(user_id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bazaar_db::kv::InMemoryKeyValueStore;

    use super::{ConversationHistory, HISTORY_TTL, MAX_HISTORY_MESSAGES};
    use crate::llm::ChatMessage;

    fn history() -> ConversationHistory {
        ConversationHistory::new(Arc::new(InMemoryKeyValueStore::new()))
    }

    #[tokio::test]
    async fn keeps_only_the_most_recent_messages() {
        let history = history();
        for index in 0..25 {
            history.append("u1", ChatMessage::user(format!("message {index}"))).await.expect("append");
        }

        let log = history.get("u1").await.expect("get");
        assert_eq!(log.len(), MAX_HISTORY_MESSAGES);
        assert_eq!(log[0].content.as_deref(), Some("message 5"));
        assert_eq!(log[19].content.as_deref(), Some("message 24"));
    }

    #[tokio::test(start_paused = true)]
    async fn appending_refreshes_the_ttl_but_reading_does_not() {
        let history = history();
        history.append("u1", ChatMessage::user("hello")).await.expect("append");

        tokio::time::advance(HISTORY_TTL - Duration::from_secs(60)).await;
        history.append("u1", ChatMessage::assistant("hi")).await.expect("append");

        tokio::time::advance(HISTORY_TTL - Duration::from_secs(60)).await;
        assert_eq!(history.get("u1").await.expect("get").len(), 2);

        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(history.get("u1").await.expect("get").is_empty());
    }

    #[tokio::test]
    async fn logs_are_isolated_per_user_and_clearable() {
        let history = history();
        history.append("u1", ChatMessage::user("mine")).await.expect("append");
        history.append("u2", ChatMessage::user("theirs")).await.expect("append");

        history.clear("u1").await.expect("clear");
        assert!(history.get("u1").await.expect("get").is_empty());
        assert_eq!(history.get("u2").await.expect("get").len(), 1);
    }
}
