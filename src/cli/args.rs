use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// sgforge - snapshot a workspace, drive an LLM, apply its file writes
#[derive(Parser)]
#[command(name = "sgforge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Workspace root (auto-detects git root if absent)
    #[arg(short = 'w', long, global = true)]
    pub workspace_root: Option<String>,

    /// Select model to use
    #[arg(short = 'm', long, global = true)]
    pub model: Option<String>,

    /// Base URL of an OpenAI-compatible API
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Directory for local state. Defaults to ~/.sgforge
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Snapshot filters shared by `snapshot` and `exec`.
#[derive(Args, Debug, Clone, Default)]
pub struct SnapshotArgs {
    /// Only include paths matching this glob (repeatable)
    #[arg(long = "include")]
    pub include: Vec<String>,

    /// Exclude paths matching this glob, on top of the defaults (repeatable)
    #[arg(long = "exclude")]
    pub exclude: Vec<String>,

    /// Only include files with this extension (repeatable)
    #[arg(long = "ext")]
    pub extensions: Vec<String>,

    /// Inline files up to this many bytes
    #[arg(long)]
    pub max_file_size: Option<u64>,

    /// Fail if inlined bodies exceed this many bytes in total
    #[arg(long)]
    pub max_total_size: Option<u64>,

    /// Ignore .gitignore files
    #[arg(long)]
    pub no_gitignore: bool,

    /// Leave skipped files out instead of listing them as placeholders
    #[arg(long)]
    pub no_placeholders: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the snapshot document for a workspace (dry-run)
    Snapshot {
        #[command(flatten)]
        filters: SnapshotArgs,

        /// Print the full document instead of a summary
        #[arg(long)]
        print: bool,
    },
    /// Run one static-context turn against the workspace
    Exec {
        /// The instruction for the model
        #[arg(short, long)]
        prompt: String,

        /// Start a new persisted conversation
        #[arg(long)]
        conversation: bool,

        /// Continue an existing conversation
        #[arg(long)]
        conversation_id: Option<String>,

        /// Conversation store directory. Defaults to <home>/conversations
        #[arg(long)]
        store: Option<PathBuf>,

        /// Stream the reply to stdout as it arrives
        #[arg(long)]
        stream: bool,

        /// Apply a saved model reply from FILE instead of calling the API
        #[arg(long, value_name = "FILE")]
        replay: Option<PathBuf>,

        /// Decode HTML entities in file bodies
        #[arg(long)]
        decode_entities: bool,

        /// Extra system instruction (repeatable)
        #[arg(long = "instruction")]
        instructions: Vec<String>,

        /// Opaque reasoning effort passed to the model
        #[arg(long)]
        reasoning_effort: Option<String>,

        #[arg(long)]
        temperature: Option<f32>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        filters: SnapshotArgs,
    },
    /// Compact a stored conversation's assistant turns
    Compact {
        /// Conversation id (conv_...)
        id: String,

        /// Report without rewriting the conversation
        #[arg(long)]
        dry_run: bool,

        /// Conversation store directory. Defaults to <home>/conversations
        #[arg(long)]
        store: Option<PathBuf>,
    },
    /// Write the workspace to a gzipped tar
    Export {
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Seed the workspace from a gzipped tar
    Populate {
        #[arg(short, long)]
        archive: PathBuf,

        /// Leading path components to strip from each member
        #[arg(long, default_value_t = 0)]
        strip: usize,
    },
}
