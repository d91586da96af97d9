use std::path::PathBuf;

use anyhow::{Context, Result};

use sgforge::config::ConfigOverrides;
use sgforge::{compact_conversation, CompactionOptions, Config, ConversationId, FileSystemStore};

pub async fn run_compact(
    id: &str,
    dry_run: bool,
    store_dir: Option<PathBuf>,
    home: Option<PathBuf>,
) -> Result<()> {
    let id: ConversationId = id.parse()?;
    let dir = match store_dir {
        Some(dir) => dir,
        None => Config::load(ConfigOverrides { home, ..Default::default() })?.conversations_dir(),
    };
    let store = FileSystemStore::new(&dir)
        .with_context(|| format!("Failed to open conversation store at {}", dir.display()))?;

    let options = CompactionOptions {
        dry_run,
        ..Default::default()
    };
    let report = compact_conversation(&store, &id, options).await?;

    let verb = if dry_run { "Would compact" } else { "Compacted" };
    println!(
        "🗜️ {} {}: {} of {} message(s), {} -> {} chars ({:.1}% smaller)",
        verb,
        id,
        report.messages_compacted,
        report.messages_processed,
        report.original_chars,
        report.compacted_chars,
        report.reduction_percent
    );
    Ok(())
}
