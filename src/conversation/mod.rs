//! Conversation history and its durable stores.
//!
//! A conversation is an ordered list of [`Message`]s keyed by a
//! [`ConversationId`]. Stores serialise appends per id so a turn's
//! user/assistant pair is never interleaved with another turn's.

mod file;
mod memory;

pub use file::FileSystemStore;
pub use memory::InMemoryStore;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const CONVERSATION_ID_PREFIX: &str = "conv_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            meta: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// `conv_` followed by 32 lowercase hex characters (128 random bits).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConversationId(String);

impl ConversationId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        Self(format!("{CONVERSATION_ID_PREFIX}{hex}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ConversationId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let valid = s
            .strip_prefix(CONVERSATION_ID_PREFIX)
            .is_some_and(|hex| {
                hex.len() == 32 && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
            });
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::InvalidConversationId(s.to_string()))
        }
    }
}

impl TryFrom<String> for ConversationId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ConversationId> for String {
    fn from(id: ConversationId) -> Self {
        id.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable, append-only history keyed by conversation id.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get(&self, id: &ConversationId) -> Result<Option<Vec<Message>>>;

    /// Append one message, creating the conversation on first call.
    async fn append(&self, id: &ConversationId, message: Message) -> Result<()>;

    /// Append several messages as one ordered unit.
    async fn append_many(&self, id: &ConversationId, messages: Vec<Message>) -> Result<()> {
        for message in messages {
            self.append(id, message).await?;
        }
        Ok(())
    }

    async fn delete(&self, id: &ConversationId) -> Result<()>;

    /// Number of distinct conversations.
    async fn size(&self) -> Result<usize>;

    /// Replace a conversation's whole history (used by compaction).
    async fn replace(&self, id: &ConversationId, messages: Vec<Message>) -> Result<()> {
        self.delete(id).await?;
        self.append_many(id, messages).await
    }
}

/// Optional leading system messages, then user/assistant alternation starting with user.
pub fn is_alternating(messages: &[Message]) -> bool {
    let mut expected = Role::User;
    for message in messages.iter().skip_while(|m| m.role == Role::System) {
        if message.role != expected {
            return false;
        }
        expected = match expected {
            Role::User => Role::Assistant,
            _ => Role::User,
        };
    }
    true
}
