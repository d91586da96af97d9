//! Deterministic in-process client that replays canned replies.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};

use super::{ChatRequest, ChunkStream, LlmClient};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Failure(String),
}

/// Answers each request with the next queued reply, in order.
///
/// Streamed replies are cut into `chunk_size` characters (whole reply if
/// unset). Every request is recorded for later inspection.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<ChatRequest>>,
    chunk_size: Option<usize>,
    chunk_delay: Option<Duration>,
}

impl ScriptedClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Reply::Text(r.into())).collect()),
            ..Default::default()
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size.max(1));
        self
    }

    /// Sleep between streamed chunks.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies_guard().push_back(Reply::Text(reply.into()));
    }

    /// Queue a transport failure as the next reply.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.replies_guard().push_back(Reply::Failure(message.into()));
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies_guard().len()
    }

    fn replies_guard(&self) -> std::sync::MutexGuard<'_, VecDeque<Reply>> {
        self.replies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_reply(&self, request: &ChatRequest) -> Result<String> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        match self.replies_guard().pop_front() {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Failure(message)) => Err(Error::Transport(message)),
            None => Err(Error::Transport("no scripted reply left".to_string())),
        }
    }
}

fn split_chars(text: &str, chunk_size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_size)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        self.next_reply(request)
    }

    async fn stream(&self, request: &ChatRequest) -> Result<ChunkStream> {
        let reply = self.next_reply(request)?;
        let chunks = match self.chunk_size {
            Some(size) => split_chars(&reply, size),
            None => vec![reply],
        };

        let delay = self.chunk_delay;
        Ok(stream::iter(chunks)
            .then(move |chunk| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok::<_, Error>(chunk)
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;

    fn request() -> ChatRequest {
        ChatRequest::new("m", Vec::new())
    }

    #[tokio::test]
    async fn test_replies_in_order_and_records_requests() {
        let client = ScriptedClient::new(["one", "two"]);

        assert_eq!(client.complete(&request()).await.unwrap(), "one");
        assert_eq!(client.complete(&request()).await.unwrap(), "two");
        assert!(matches!(
            client.complete(&request()).await,
            Err(Error::Transport(_))
        ));
        assert_eq!(client.requests().len(), 3);
        assert_eq!(client.remaining(), 0);
    }

    #[tokio::test]
    async fn test_stream_chunks_on_char_boundaries() {
        let client = ScriptedClient::new(["héllo wörld"]).with_chunk_size(3);
        let chunks: Vec<String> = client
            .stream(&request())
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(chunks, vec!["hél", "lo ", "wör", "ld"]);
    }

    #[tokio::test]
    async fn test_queued_failure() {
        let client = ScriptedClient::default();
        client.push_failure("connection reset");
        client.push_reply("after");

        assert!(matches!(
            client.stream(&request()).await,
            Err(Error::Transport(m)) if m == "connection reset"
        ));
        assert_eq!(client.complete(&request()).await.unwrap(), "after");
    }
}
