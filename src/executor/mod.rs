//! Static-context execution: one LLM call per turn with the whole workspace
//! as context and no tool calls.
//!
//! A turn runs strictly in order: snapshot, model call, commit to disk,
//! then (in conversation mode) a compact history append. A crash between
//! commit and append loses the turn from history but never the files.

mod options;
mod progress;
mod prompts;

pub use options::{ExecuteOptions, ProgressCallback, SnapshotSource, StreamCallback};
pub use progress::ProgressEvent;
pub use prompts::{CODEBASE_INTRO, STATIC_CONTEXT_PROMPT};

use std::future::Future;
use std::sync::Arc;

use futures_util::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::compact::modified_summary;
use crate::config::DEFAULT_MODEL;
use crate::conversation::{is_alternating, ConversationId, ConversationStore, Message};
use crate::error::{Error, Result};
use crate::llm::{ChatRequest, LlmClient};
use crate::protocol::{
    apply_file_writes, parse_file_writes, strip_file_blocks, StreamingFileParser, WrittenFile,
};
use crate::snapshot::SnapshotOptions;
use crate::workspace::Workspace;

/// Outcome of one turn.
#[derive(Debug, Serialize)]
pub struct ExecutionResult {
    /// The reply with every `<sg-file>` record removed, trimmed.
    pub content: String,
    /// The reply exactly as the model sent it.
    pub raw_content: String,
    pub conversation_id: Option<ConversationId>,
    pub files_written: Vec<WrittenFile>,
    pub files_deleted: Vec<String>,
    /// Per-record parse and write failures.
    #[serde(serialize_with = "serialize_errors")]
    pub errors: Vec<Error>,
    /// Set when cancellation stopped the commit part-way.
    pub cancelled: bool,
}

fn serialize_errors<S: serde::Serializer>(errors: &[Error], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(errors.iter().map(|e| e.to_string()))
}

impl ExecutionResult {
    pub fn parse_error_count(&self) -> usize {
        self.errors
            .iter()
            .filter(|e| matches!(e, Error::Parse { .. }))
            .count()
    }
}

/// Races `future` against the cancellation token, if any.
async fn cancellable<T>(
    cancel: Option<&CancellationToken>,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            result = future => result,
        },
        None => future.await,
    }
}

fn into_persistence(err: Error) -> Error {
    match err {
        Error::Persistence(_) => err,
        other => Error::persistence(other),
    }
}

pub struct StaticExecutor<'a> {
    workspace: &'a Workspace,
    client: Arc<dyn LlmClient>,
}

impl<'a> StaticExecutor<'a> {
    pub fn new(workspace: &'a Workspace, client: Arc<dyn LlmClient>) -> Self {
        Self { workspace, client }
    }

    pub async fn execute(&self, prompt: &str, options: ExecuteOptions) -> Result<ExecutionResult> {
        let conversation_mode = options.conversation_mode();
        let store = match (&options.store, conversation_mode) {
            (Some(store), true) => Some(store.clone()),
            (None, true) => {
                return Err(Error::InvalidOptions(
                    "conversation mode requires a conversation store".to_string(),
                ))
            }
            (_, false) => None,
        };
        let cancel = options.cancel.as_ref();
        if cancel.is_some_and(|t| t.is_cancelled()) {
            return Err(Error::Cancelled);
        }

        let emit = |event: ProgressEvent| {
            if let Some(callback) = &options.progress_callback {
                callback(&event);
            }
        };

        info!(
            "🔄 Executing turn in workspace {} (conversation: {}, stream: {})",
            self.workspace.id(),
            conversation_mode,
            options.stream
        );

        // 1. Snapshot
        let snapshot = self.snapshot_for_turn(&options, &emit)?;

        // 2. Messages
        let conversation_id = store.as_ref().map(|_| {
            options
                .conversation_id
                .clone()
                .unwrap_or_else(ConversationId::generate)
        });
        let history = match (&store, &conversation_id) {
            (Some(store), Some(id)) => load_history(store.as_ref(), id).await?,
            _ => Vec::new(),
        };
        let messages = build_messages(&options.instructions, snapshot, history, prompt);

        let request = ChatRequest {
            model: options
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            messages,
            stream: options.stream,
            reasoning: options.reasoning_effort.clone(),
            temperature: options.temperature,
        };

        // 3. Model call
        emit(ProgressEvent::ResponseWaiting);
        let reply = if options.stream {
            self.stream_reply(&request, &options, &emit).await?
        } else {
            cancellable(cancel, self.client.complete(&request)).await?
        };
        emit(ProgressEvent::ResponseReceived);
        info!("📥 Reply received ({} chars)", reply.chars().count());

        if cancel.is_some_and(|t| t.is_cancelled()) {
            info!("Turn cancelled before commit");
            return Err(Error::Cancelled);
        }

        // 4. Commit
        emit(ProgressEvent::FilesWriting);
        let parsed = parse_file_writes(&reply, options.decode_html_entities);
        let mut errors = parsed.errors;
        for err in &errors {
            warn!("Skipping record: {}", err);
        }
        let report = apply_file_writes(self.workspace, &parsed.writes, cancel);
        errors.extend(report.errors);
        emit(ProgressEvent::FilesWritten {
            count: report.written.len(),
        });

        let content = strip_file_blocks(&reply);
        let result = ExecutionResult {
            content,
            raw_content: reply,
            conversation_id: conversation_id.clone(),
            files_written: report.written,
            files_deleted: report.deleted,
            errors,
            cancelled: report.cancelled,
        };

        if result.cancelled {
            warn!(
                "Turn cancelled during commit; {} file(s) already written, history not updated",
                result.files_written.len()
            );
            return Ok(result);
        }

        // 5. Persist
        if let (Some(store), Some(id)) = (&store, &conversation_id) {
            let summary = compact_assistant_message(&result);
            store
                .append_many(id, vec![Message::user(prompt), Message::assistant(summary)])
                .await
                .map_err(|e| {
                    warn!(
                        "Files committed but history append for {} failed: {}",
                        id, e
                    );
                    into_persistence(e)
                })?;
            debug!("Appended turn to conversation {}", id);
        }

        // 6. Return
        Ok(result)
    }

    fn snapshot_for_turn(
        &self,
        options: &ExecuteOptions,
        emit: &impl Fn(ProgressEvent),
    ) -> Result<String> {
        let snapshot_options = match (&options.snapshot, &options.conversation_id) {
            // Continuations always see the files written by earlier turns.
            (Some(SnapshotSource::Options(opts)), Some(_)) => opts.clone(),
            (Some(SnapshotSource::Text(_)), Some(_)) => {
                debug!("Ignoring supplied snapshot text for a continued conversation");
                SnapshotOptions::default()
            }
            (Some(SnapshotSource::Text(text)), None) => return Ok(text.clone()),
            (Some(SnapshotSource::Options(opts)), None) => opts.clone(),
            (None, _) => SnapshotOptions::default(),
        };

        emit(ProgressEvent::SnapshotGenerating);
        let snapshot = self.workspace.snapshot(&snapshot_options)?;
        debug!("Snapshot digest: {}", snapshot.digest());
        emit(ProgressEvent::SnapshotGenerated {
            files: snapshot.file_count(),
            bytes: snapshot.as_str().len(),
        });
        Ok(snapshot.into_string())
    }

    async fn stream_reply(
        &self,
        request: &ChatRequest,
        options: &ExecuteOptions,
        emit: &impl Fn(ProgressEvent),
    ) -> Result<String> {
        let cancel = options.cancel.as_ref();
        let mut chunks = cancellable(cancel, self.client.stream(request)).await?;
        emit(ProgressEvent::ResponseStreaming);

        let mut parser = StreamingFileParser::new();
        let mut reply = String::new();
        loop {
            let next = cancellable(cancel, async { Ok(chunks.next().await) }).await?;
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;
            reply.push_str(&chunk);

            if let Some(callback) = &options.stream_callback {
                callback(&chunk);
            }
            for event in parser.push(&chunk) {
                emit(event.into());
            }
        }
        for event in parser.finish() {
            emit(event.into());
        }

        emit(ProgressEvent::ResponseStreamed);
        Ok(reply)
    }
}

async fn load_history(store: &dyn ConversationStore, id: &ConversationId) -> Result<Vec<Message>> {
    let history = store
        .get(id)
        .await
        .map_err(into_persistence)?
        .unwrap_or_default();
    if history.is_empty() {
        debug!("Starting conversation {}", id);
    } else if !is_alternating(&history) {
        warn!(
            "History of {} does not alternate user/assistant ({} messages)",
            id,
            history.len()
        );
    }
    Ok(history)
}

fn build_messages(
    instructions: &[String],
    snapshot: String,
    history: Vec<Message>,
    prompt: &str,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(instructions.len() + history.len() + 4);
    messages.extend(instructions.iter().map(|i| Message::system(i.as_str())));
    messages.push(Message::system(STATIC_CONTEXT_PROMPT));
    messages.push(Message::user(CODEBASE_INTRO));
    messages.push(Message::user(snapshot));
    messages.extend(history);
    messages.push(Message::user(prompt));
    messages
}

/// History form of the assistant turn: touched paths, or the prose reply.
fn compact_assistant_message(result: &ExecutionResult) -> String {
    let touched: Vec<&str> = result
        .files_written
        .iter()
        .map(|f| f.path.as_str())
        .chain(result.files_deleted.iter().map(String::as_str))
        .collect();
    if touched.is_empty() {
        result.content.clone()
    } else {
        modified_summary(&touched)
    }
}
