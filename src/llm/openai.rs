//! Chat-completions client for OpenAI-compatible endpoints.
//!
//! Streaming replies arrive as server-sent events: one `data: {json}` line
//! per delta, terminated by `data: [DONE]`.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use url::Url;
use uuid::Uuid;

use super::http::{send_with_retry, RetryPolicy, RETRY_BASE_DELAY};
use super::{ChatRequest, ChunkStream, LlmClient};
use crate::config::LlmConfig;
use crate::error::{Error, Result};

const CHAT_COMPLETIONS_ENDPOINT: &str = "chat/completions";
const DONE_MARKER: &str = "[DONE]";

/// Default CLI version (from Cargo.toml)
const DEFAULT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

impl<'a> CompletionBody<'a> {
    fn new(request: &'a ChatRequest, stream: bool) -> Self {
        Self {
            model: &request.model,
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            stream,
            reasoning_effort: request.reasoning.as_deref(),
            temperature: request.temperature,
        }
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Incremental decoder for a chat-completions SSE body.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw bytes; returns the content pieces of every complete line.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>> {
        self.buffer.extend_from_slice(bytes);

        let mut pieces = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            if self.done {
                continue;
            }
            if let Some(piece) = self.handle_line(&String::from_utf8_lossy(&line))? {
                pieces.push(piece);
            }
        }
        Ok(pieces)
    }

    /// Process whatever is left once the body ends.
    pub(crate) fn finish(&mut self) -> Result<Vec<String>> {
        let rest = std::mem::take(&mut self.buffer);
        if self.done || rest.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .handle_line(&String::from_utf8_lossy(&rest))?
            .into_iter()
            .collect())
    }

    fn handle_line(&mut self, line: &str) -> Result<Option<String>> {
        let line = line.trim_end_matches(|c: char| c == '\r' || c == '\n');
        let Some(payload) = line.strip_prefix("data:") else {
            // Comments, `event:` and `id:` lines carry nothing we need.
            return Ok(None);
        };
        let payload = payload.trim();
        if payload.is_empty() {
            return Ok(None);
        }
        if payload == DONE_MARKER {
            self.done = true;
            return Ok(None);
        }

        let chunk: StreamChunk = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!("Ignoring unparseable stream line: {}", e);
                return Ok(None);
            }
        };
        if let Some(err) = chunk.error {
            return Err(Error::Transport(format!("stream error: {err}")));
        }

        Ok(chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|c| !c.is_empty()))
    }
}

struct SseState {
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    finished: bool,
}

fn decode_sse(response: reqwest::Response) -> ChunkStream {
    let state = SseState {
        bytes: response.bytes_stream().map(|r| r.map(|b| b.to_vec())).boxed(),
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(piece) = st.pending.pop_front() {
                return Some((Ok(piece), st));
            }
            if st.finished {
                return None;
            }

            let decoded = match st.bytes.next().await {
                Some(Ok(chunk)) => st.decoder.push(&chunk),
                Some(Err(e)) => Err(Error::Transport(format!("failed to read stream: {e}"))),
                None => {
                    st.finished = true;
                    st.decoder.finish()
                }
            };

            match decoded {
                Ok(pieces) => {
                    st.pending.extend(pieces);
                    if st.decoder.is_done() {
                        st.finished = true;
                    }
                }
                Err(e) => {
                    st.finished = true;
                    st.pending.clear();
                    return Some((Err(e), st));
                }
            }
        }
    })
    .boxed()
}

/// Client for `POST {base_url}/chat/completions`.
pub struct OpenAiClient {
    client: Client,
    url: Url,
    api_key: Option<String>,
    user_agent: String,
    session_id: String,
    retry: RetryPolicy,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let url = Url::parse(&base)
            .and_then(|b| b.join(CHAT_COMPLETIONS_ENDPOINT))
            .map_err(|e| Error::InvalidOptions(format!("invalid base URL {}: {}", config.base_url, e)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url,
            api_key: config.api_key.clone(),
            user_agent: format!("sgforge/{}", DEFAULT_VERSION),
            session_id: Uuid::new_v4().to_string(),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                base_delay: RETRY_BASE_DELAY,
            },
        })
    }

    /// Override the first retry delay (later retries double it).
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry.base_delay = delay;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn post(&self, request: &ChatRequest, stream: bool) -> Result<reqwest::Response> {
        let body = CompletionBody::new(request, stream);
        let request_id = Uuid::new_v4().to_string();

        info!(
            "📤 Sending {} message(s) to {} (stream: {})",
            request.messages.len(),
            request.model,
            stream
        );
        debug!("URL: {}", self.url);

        let response = send_with_retry(self.retry, || {
            let mut builder = self
                .client
                .post(self.url.clone())
                .header("Content-Type", "application/json")
                .header("User-Agent", &self.user_agent)
                .header("x-request-id", &request_id)
                .header("x-request-session-id", &self.session_id);

            if let Some(key) = &self.api_key {
                builder = builder.header("Authorization", format!("Bearer {}", key));
            }

            builder.json(&body)
        })
        .await?;

        let status = response.status();
        debug!("Status: {}", status);

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Chat request failed with status {}: {}", status, error_text);
            return Err(Error::Transport(format!(
                "chat request failed with status {}: {}",
                status, error_text
            )));
        }

        Ok(response)
    }
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("url", &self.url.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let response = self.post(request, false).await?;
        let text = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("failed to read response body: {e}")))?;
        let parsed: CompletionResponse = serde_json::from_str(&text)
            .map_err(|e| Error::Transport(format!("failed to parse chat response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Transport("chat response has no choices".to_string()))?
            .message
            .content
            .unwrap_or_default();

        debug!("Reply length: {}", content.len());
        Ok(content)
    }

    async fn stream(&self, request: &ChatRequest) -> Result<ChunkStream> {
        let response = self.post(request, true).await?;
        Ok(decode_sse(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Message;
    use futures_util::TryStreamExt;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ChatRequest {
        ChatRequest::new(
            "test-model",
            vec![Message::system("rules"), Message::user("hello")],
        )
    }

    fn client_for(server: &MockServer) -> OpenAiClient {
        let config = LlmConfig::new(format!("{}/v1", server.uri())).with_api_key("sk-test");
        OpenAiClient::new(&config)
            .unwrap()
            .with_retry_base_delay(Duration::from_millis(10))
    }

    fn sse(pieces: &[&str]) -> String {
        let mut body = String::new();
        for piece in pieces {
            let chunk = serde_json::json!({"choices": [{"delta": {"content": piece}}]});
            body.push_str(&format!("data: {}\n\n", chunk));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    #[test]
    fn test_url_building() {
        let client = OpenAiClient::new(&LlmConfig::default()).unwrap();
        assert_eq!(
            client.url().as_str(),
            "https://api.openai.com/v1/chat/completions"
        );

        let client = OpenAiClient::new(&LlmConfig::new("http://localhost:8080/v1")).unwrap();
        assert_eq!(client.url().as_str(), "http://localhost:8080/v1/chat/completions");

        assert!(OpenAiClient::new(&LlmConfig::new("not a url")).is_err());
    }

    #[test]
    fn test_sse_decoder_split_lines() {
        let mut decoder = SseDecoder::default();
        let body = sse(&["Hel", "lo ✓"]);
        let bytes = body.as_bytes();

        let mut pieces = Vec::new();
        // Byte-at-a-time, which also splits the multi-byte check mark.
        for b in bytes {
            pieces.extend(decoder.push(std::slice::from_ref(b)).unwrap());
        }
        pieces.extend(decoder.finish().unwrap());

        assert_eq!(pieces.concat(), "Hello ✓");
        assert!(decoder.is_done());
    }

    #[test]
    fn test_sse_decoder_ignores_noise_and_reports_errors() {
        let mut decoder = SseDecoder::default();
        let pieces = decoder
            .push(b": keep-alive\nevent: message\ndata: {not json}\ndata: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n")
            .unwrap();
        assert!(pieces.is_empty());

        let err = decoder
            .push(b"data: {\"error\":{\"message\":\"overloaded\"}}\n")
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn test_complete() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "test-model",
                "stream": false,
                "messages": [
                    {"role": "system", "content": "rules"},
                    {"role": "user", "content": "hello"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "hi there"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reply = client_for(&server).complete(&request()).await.unwrap();
        assert_eq!(reply, "hi there");
    }

    #[tokio::test]
    async fn test_stream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse(&["<sg-file path=\"a.txt\">", "hi", "</sg-file>"])),
            )
            .mount(&server)
            .await;

        let mut req = request();
        req.stream = true;
        let stream = client_for(&server).stream(&req).await.unwrap();
        let pieces: Vec<String> = stream.try_collect().await.unwrap();

        assert_eq!(pieces, vec!["<sg-file path=\"a.txt\">", "hi", "</sg-file>"]);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "ok"}}]
            })))
            .mount(&server)
            .await;

        let reply = client_for(&server).complete(&request()).await.unwrap();
        assert_eq!(reply, "ok");
    }

    #[tokio::test]
    async fn test_error_status_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server).complete(&request()).await.unwrap_err();
        match err {
            Error::Transport(message) => {
                assert!(message.contains("401"));
                assert!(message.contains("bad key"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
