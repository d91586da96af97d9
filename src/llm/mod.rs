//! LLM transport.
//!
//! The executor talks to the model through [`LlmClient`]: one request per
//! turn, answered either with the whole reply or with a stream of content
//! pieces. [`OpenAiClient`] speaks the chat-completions wire format;
//! [`ScriptedClient`] replays canned replies.

mod http;
mod openai;
mod scripted;

pub use openai::OpenAiClient;
pub use scripted::ScriptedClient;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::conversation::Message;
use crate::error::Result;

/// Content pieces of a streamed reply, in order.
pub type ChunkStream = BoxStream<'static, Result<String>>;

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub stream: bool,
    /// Passed through untouched (e.g. `low`, `high`).
    pub reasoning: Option<String>,
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: false,
            reasoning: None,
            temperature: None,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send the request and return the full reply text.
    async fn complete(&self, request: &ChatRequest) -> Result<String>;

    /// Send the request and return the reply as it arrives.
    async fn stream(&self, request: &ChatRequest) -> Result<ChunkStream>;
}
