use serde::Serialize;

use crate::protocol::{FileAction, FileStreamEvent};

/// Milestones of one turn, in the order they occur.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressEvent {
    SnapshotGenerating,
    SnapshotGenerated {
        files: usize,
        bytes: usize,
    },
    ResponseWaiting,
    ResponseReceived,
    ResponseStreaming,
    ResponseStreamed,
    FileStreamingStart {
        path: String,
        action: FileAction,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    FileStreamingContent {
        path: String,
        content: String,
        is_incremental: bool,
    },
    FileStreamingEnd {
        path: String,
        action: FileAction,
        full_content: String,
    },
    FilesWriting,
    FilesWritten {
        count: usize,
    },
}

impl From<FileStreamEvent> for ProgressEvent {
    fn from(event: FileStreamEvent) -> Self {
        match event {
            FileStreamEvent::Start {
                path,
                action,
                summary,
            } => ProgressEvent::FileStreamingStart {
                path,
                action,
                summary,
            },
            FileStreamEvent::Content {
                path,
                content,
                is_incremental,
            } => ProgressEvent::FileStreamingContent {
                path,
                content,
                is_incremental,
            },
            FileStreamEvent::End {
                path,
                action,
                full_content,
            } => ProgressEvent::FileStreamingEnd {
                path,
                action,
                full_content,
            },
        }
    }
}
