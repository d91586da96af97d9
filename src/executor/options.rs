use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::progress::ProgressEvent;
use crate::conversation::{ConversationId, ConversationStore};
use crate::snapshot::SnapshotOptions;

/// Receives every raw content chunk of a streamed reply.
pub type StreamCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Receives turn milestones and per-file preview events.
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Where the context document for a turn comes from.
#[derive(Debug, Clone)]
pub enum SnapshotSource {
    /// A pre-built document, used verbatim.
    Text(String),
    /// Build a fresh snapshot of the workspace with these options.
    Options(SnapshotOptions),
}

#[derive(Clone, Default)]
pub struct ExecuteOptions {
    /// Falls back to [`crate::config::DEFAULT_MODEL`].
    pub model: Option<String>,
    /// Extra system instructions, sent before the built-in one.
    pub instructions: Vec<String>,
    /// `None` builds a snapshot with default options.
    pub snapshot: Option<SnapshotSource>,
    /// Keep history for this turn in `store`.
    pub conversation: bool,
    /// Continue an existing conversation (implies `conversation`).
    pub conversation_id: Option<ConversationId>,
    pub store: Option<Arc<dyn ConversationStore>>,
    pub stream: bool,
    pub stream_callback: Option<StreamCallback>,
    pub progress_callback: Option<ProgressCallback>,
    pub reasoning_effort: Option<String>,
    pub temperature: Option<f32>,
    pub decode_html_entities: bool,
    pub cancel: Option<CancellationToken>,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instructions.push(instruction.into());
        self
    }

    pub fn with_snapshot_text(mut self, snapshot: impl Into<String>) -> Self {
        self.snapshot = Some(SnapshotSource::Text(snapshot.into()));
        self
    }

    pub fn with_snapshot_options(mut self, options: SnapshotOptions) -> Self {
        self.snapshot = Some(SnapshotSource::Options(options));
        self
    }

    /// Start a new conversation persisted in `store`.
    pub fn with_conversation(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.conversation = true;
        self.store = Some(store);
        self
    }

    pub fn with_conversation_id(mut self, id: ConversationId) -> Self {
        self.conversation_id = Some(id);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Stream the reply and forward each chunk to `callback`.
    pub fn with_stream_callback(mut self, callback: StreamCallback) -> Self {
        self.stream = true;
        self.stream_callback = Some(callback);
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn with_reasoning_effort(mut self, effort: impl Into<String>) -> Self {
        self.reasoning_effort = Some(effort.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn decode_html_entities(mut self, decode: bool) -> Self {
        self.decode_html_entities = decode;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Whether this turn reads and writes conversation history.
    pub fn conversation_mode(&self) -> bool {
        self.conversation || self.conversation_id.is_some()
    }
}

impl fmt::Debug for ExecuteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("model", &self.model)
            .field("instructions", &self.instructions.len())
            .field("snapshot", &self.snapshot.as_ref().map(|s| match s {
                SnapshotSource::Text(text) => format!("text ({} bytes)", text.len()),
                SnapshotSource::Options(_) => "options".to_string(),
            }))
            .field("conversation", &self.conversation)
            .field("conversation_id", &self.conversation_id)
            .field("has_store", &self.store.is_some())
            .field("stream", &self.stream)
            .field("reasoning_effort", &self.reasoning_effort)
            .field("temperature", &self.temperature)
            .field("decode_html_entities", &self.decode_html_entities)
            .finish()
    }
}
