//! Error types surfaced by the engine.
//!
//! Per-record failures (`PathEscape`, `Parse`, `Write`) are collected by the
//! commit step and never abort a batch. Everything else is returned to the
//! caller as-is.

use std::path::PathBuf;

/// Result alias used throughout the library.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A path resolved outside the workspace root (or was absolute, or held a NUL byte).
    #[error("path escapes workspace root: {path}")]
    PathEscape { path: String },

    #[error("workspace already populated: {}", root.display())]
    AlreadyPopulated { root: PathBuf },

    #[error("failed to extract archive: {0}")]
    Extract(String),

    #[error("failed to walk workspace: {0}")]
    Walk(String),

    #[error("snapshot body size {actual} exceeds budget of {limit} bytes")]
    BudgetExceeded { limit: u64, actual: u64 },

    #[error("LLM transport error: {0}")]
    Transport(String),

    /// A malformed `<sg-file>` record in a model reply.
    #[error("parse error{}: {message}", path.as_deref().map(|p| format!(" in {p}")).unwrap_or_default())]
    Parse {
        path: Option<String>,
        message: String,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("conversation persistence failed: {0}")]
    Persistence(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("invalid conversation id: {0}")]
    InvalidConversationId(String),

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("workspace not found: {}", root.display())]
    WorkspaceNotFound { root: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn parse(path: Option<&str>, message: impl Into<String>) -> Self {
        Error::Parse {
            path: path.map(str::to_string),
            message: message.into(),
        }
    }

    pub(crate) fn persistence(err: impl std::fmt::Display) -> Self {
        Error::Persistence(err.to_string())
    }

    /// Whether this error belongs to a single record and was collected rather than raised.
    pub fn is_per_record(&self) -> bool {
        matches!(
            self,
            Error::PathEscape { .. } | Error::Parse { .. } | Error::Write { .. }
        )
    }
}
