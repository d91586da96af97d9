//! Static-context code generation over a sandboxed workspace.
//!
//! A turn snapshots the workspace into one `<sg-file>` document, sends it
//! with the prompt (and any conversation history) to an LLM, and applies
//! the file records in the reply back to disk.
//!
//! ```no_run
//! use std::sync::Arc;
//! use sgforge::{ExecuteOptions, OpenAiClient, LlmConfig, Workspace};
//!
//! # async fn run() -> sgforge::Result<()> {
//! let workspace = Workspace::create("/tmp/demo")?;
//! let client = Arc::new(OpenAiClient::new(&LlmConfig::default().with_api_key("sk-..."))?);
//! let result = workspace
//!     .execute(client, "Create src/util.ts exporting x = 1", ExecuteOptions::new())
//!     .await?;
//! println!("wrote {} file(s)", result.files_written.len());
//! # Ok(())
//! # }
//! ```

pub mod compact;
pub mod config;
pub mod conversation;
pub mod error;
pub mod executor;
pub mod llm;
pub mod protocol;
pub mod snapshot;
pub mod workspace;

pub use compact::{compact_conversation, CompactionMode, CompactionOptions, CompactionReport};
pub use config::{Config, LlmConfig};
pub use conversation::{ConversationId, ConversationStore, FileSystemStore, InMemoryStore, Message, Role};
pub use error::{Error, Result};
pub use executor::{ExecuteOptions, ExecutionResult, ProgressEvent, SnapshotSource, StaticExecutor};
pub use llm::{ChatRequest, LlmClient, OpenAiClient, ScriptedClient};
pub use snapshot::{Snapshot, SnapshotOptions};
pub use workspace::{PathSandbox, PopulateOptions, Workspace};
