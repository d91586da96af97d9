//! Process-local conversation store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ConversationId, ConversationStore, Message};
use crate::error::Result;

/// Conversations held in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    conversations: RwLock<HashMap<ConversationId, Vec<Message>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn get(&self, id: &ConversationId) -> Result<Option<Vec<Message>>> {
        Ok(self.conversations.read().await.get(id).cloned())
    }

    async fn append(&self, id: &ConversationId, message: Message) -> Result<()> {
        self.append_many(id, vec![message]).await
    }

    async fn append_many(&self, id: &ConversationId, messages: Vec<Message>) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        conversations.entry(id.clone()).or_default().extend(messages);
        Ok(())
    }

    async fn delete(&self, id: &ConversationId) -> Result<()> {
        self.conversations.write().await.remove(id);
        Ok(())
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.conversations.read().await.len())
    }

    async fn replace(&self, id: &ConversationId, messages: Vec<Message>) -> Result<()> {
        self.conversations.write().await.insert(id.clone(), messages);
        Ok(())
    }
}
