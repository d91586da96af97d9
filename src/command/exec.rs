use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sgforge::config::ConfigOverrides;
use sgforge::workspace::create_shared_workspace;
use sgforge::{
    Config, ConversationId, ExecuteOptions, ExecutionResult, FileSystemStore, LlmClient,
    OpenAiClient, ProgressEvent, ScriptedClient, SnapshotOptions,
};

use crate::cli;

/// Everything `sgforge exec` takes from the command line.
pub struct ExecArgs {
    pub workspace_root: Option<String>,
    pub prompt: String,
    pub conversation: bool,
    pub conversation_id: Option<String>,
    pub store: Option<PathBuf>,
    pub stream: bool,
    pub replay: Option<PathBuf>,
    pub decode_entities: bool,
    pub instructions: Vec<String>,
    pub reasoning_effort: Option<String>,
    pub temperature: Option<f32>,
    pub json: bool,
    pub snapshot: SnapshotOptions,
    pub overrides: ConfigOverrides,
}

pub async fn run_exec(args: ExecArgs) -> Result<()> {
    let config = Config::load(args.overrides.clone())?;
    let root_path = cli::resolve_existing_root(args.workspace_root.clone())?;
    let workspace = create_shared_workspace(root_path)
        .context("Failed to open workspace")?;

    let client: Arc<dyn LlmClient> = match &args.replay {
        Some(path) => {
            let reply = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read replay file {}", path.display()))?;
            info!("🔁 Replaying saved reply from {}", path.display());
            Arc::new(ScriptedClient::new([reply]))
        }
        None => {
            if config.llm.api_key.is_none() {
                warn!("⚠️ No API key set. Set SGFORGE_API_KEY or OPENAI_API_KEY.");
            }
            Arc::new(OpenAiClient::new(&config.llm)?)
        }
    };

    let cancel = CancellationToken::new();
    let mut options = ExecuteOptions::new()
        .with_model(config.model.clone())
        .with_snapshot_options(args.snapshot)
        .streaming(args.stream)
        .decode_html_entities(args.decode_entities)
        .with_cancellation(cancel.clone())
        .with_progress(Arc::new(log_progress));

    for instruction in args.instructions {
        options = options.with_instruction(instruction);
    }
    if let Some(effort) = args.reasoning_effort {
        options = options.with_reasoning_effort(effort);
    }
    if let Some(temperature) = args.temperature {
        options = options.with_temperature(temperature);
    }
    if args.stream && !args.json {
        options = options.with_stream_callback(Arc::new(|chunk: &str| {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(chunk.as_bytes());
            let _ = stdout.flush();
        }));
    }

    if args.conversation || args.conversation_id.is_some() {
        let dir = args.store.unwrap_or_else(|| config.conversations_dir());
        let store = FileSystemStore::new(&dir)
            .with_context(|| format!("Failed to open conversation store at {}", dir.display()))?;
        options = options.with_conversation(Arc::new(store));
        if let Some(id) = &args.conversation_id {
            let id: ConversationId = id.parse()?;
            options = options.with_conversation_id(id);
        }
    }

    let prompt = args.prompt;
    let task_workspace = Arc::clone(&workspace);
    let mut turn = tokio::spawn(async move {
        task_workspace.execute(client, &prompt, options).await
    });

    let result = tokio::select! {
        joined = &mut turn => joined.context("Execution task failed")??,
        _ = tokio::signal::ctrl_c() => {
            warn!("🛑 Interrupted, cancelling turn");
            cancel.cancel();
            turn.await.context("Execution task failed")??
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result, args.stream);
    }
    Ok(())
}

fn log_progress(event: &ProgressEvent) {
    match event {
        ProgressEvent::SnapshotGenerated { files, bytes } => {
            info!("📸 Snapshot ready: {} file(s), {}", files, cli::format_size(*bytes as u64));
        }
        ProgressEvent::ResponseWaiting => info!("⏳ Waiting for model response"),
        ProgressEvent::FileStreamingStart { path, action, .. } => {
            info!("✏️ {} {}", action.as_str(), path);
        }
        ProgressEvent::FilesWritten { count } => info!("💾 Applied {} file record(s)", count),
        _ => {}
    }
}

fn print_result(result: &ExecutionResult, streamed: bool) {
    if streamed {
        println!();
    } else if !result.content.is_empty() {
        println!("{}\n", result.content);
    }

    for file in &result.files_written {
        println!("  ✅ wrote   {} ({})", file.path, cli::format_size(file.size));
    }
    for path in &result.files_deleted {
        println!("  🗑️ deleted {}", path);
    }
    for err in &result.errors {
        println!("  ❌ {}", err);
    }
    if result.cancelled {
        println!("  ⚠️ Cancelled before every record was applied");
    }
    if let Some(id) = &result.conversation_id {
        println!("\nConversation: {}", id);
        println!("  Continue with: sgforge exec --conversation-id {} -p \"...\"", id);
    }
}
