//! History compaction.
//!
//! Verbose assistant turns (the raw reply with its `<sg-file>` records) are
//! rewritten to `Modified: p1, p2`. User and system messages, and assistant
//! messages with no file records, pass through unchanged, so running the
//! compactor twice gives the same history as running it once.

use serde::Serialize;
use tracing::info;

use crate::conversation::{ConversationId, ConversationStore, Message, Role};
use crate::error::{Error, Result};
use crate::protocol::referenced_paths;

pub const MODIFIED_PREFIX: &str = "Modified: ";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompactionMode {
    /// Keep only the list of paths an assistant turn touched.
    #[default]
    FilesOnly,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CompactionOptions {
    pub mode: CompactionMode,
    /// Compute the report without writing back.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompactionReport {
    pub original_chars: usize,
    pub compacted_chars: usize,
    pub reduction_percent: f64,
    pub messages_processed: usize,
    pub messages_compacted: usize,
}

/// `Modified: a, b` for a list of paths.
pub fn modified_summary<S: AsRef<str>>(paths: &[S]) -> String {
    let joined = paths
        .iter()
        .map(|p| p.as_ref())
        .collect::<Vec<_>>()
        .join(", ");
    format!("{MODIFIED_PREFIX}{joined}")
}

fn compact_one(message: &Message, mode: CompactionMode) -> Option<Message> {
    if message.role != Role::Assistant {
        return None;
    }
    match mode {
        CompactionMode::FilesOnly => {
            let mut paths = referenced_paths(&message.content);
            if paths.is_empty() {
                return None;
            }
            let mut seen = std::collections::HashSet::new();
            paths.retain(|p| seen.insert(p.clone()));
            Some(Message {
                role: Role::Assistant,
                content: modified_summary(&paths),
                meta: message.meta.clone(),
            })
        }
    }
}

/// Compact a history in memory. Order and length are preserved.
pub fn compact_messages(messages: &[Message], mode: CompactionMode) -> (Vec<Message>, CompactionReport) {
    let mut report = CompactionReport {
        messages_processed: messages.len(),
        ..Default::default()
    };

    let compacted: Vec<Message> = messages
        .iter()
        .map(|message| {
            report.original_chars += message.content.chars().count();
            let out = match compact_one(message, mode) {
                Some(replacement) => {
                    report.messages_compacted += 1;
                    replacement
                }
                None => message.clone(),
            };
            report.compacted_chars += out.content.chars().count();
            out
        })
        .collect();

    if report.original_chars > 0 {
        let saved = report.original_chars.saturating_sub(report.compacted_chars);
        report.reduction_percent = saved as f64 * 100.0 / report.original_chars as f64;
    }

    (compacted, report)
}

/// Load, compact and (unless `dry_run`) atomically write back a conversation.
pub async fn compact_conversation(
    store: &dyn ConversationStore,
    id: &ConversationId,
    options: CompactionOptions,
) -> Result<CompactionReport> {
    let history = store
        .get(id)
        .await?
        .ok_or_else(|| Error::ConversationNotFound(id.to_string()))?;

    let (compacted, report) = compact_messages(&history, options.mode);

    if options.dry_run {
        info!(
            "🗜️ Dry run for {}: {} of {} messages would be compacted ({:.1}% smaller)",
            id, report.messages_compacted, report.messages_processed, report.reduction_percent
        );
        return Ok(report);
    }

    if report.messages_compacted > 0 {
        store.replace(id, compacted).await?;
    }

    info!(
        "🗜️ Compacted {}: {} of {} messages, {} -> {} chars ({:.1}% smaller)",
        id,
        report.messages_compacted,
        report.messages_processed,
        report.original_chars,
        report.compacted_chars,
        report.reduction_percent
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{FileSystemStore, InMemoryStore};
    use tempfile::TempDir;

    fn verbose_history() -> Vec<Message> {
        vec![
            Message::system("rules"),
            Message::user("create two files"),
            Message::assistant(
                "Sure.\n<sg-file path=\"src/a.ts\">a</sg-file>\n<sg-file path=\"src/b.ts\" summary=\"b\">b</sg-file>",
            ),
            Message::user("what did you do?"),
            Message::assistant("I created two files."),
            Message::user("edit a again <sg-file path=\"user.txt\">"),
            Message::assistant(
                "<sg-file path=\"src/a.ts\">a2</sg-file><sg-file path=\"src/a.ts\">a3</sg-file>",
            ),
            Message::user("compare them"),
            Message::assistant(
                "<sg-file summary=\"a > b\" path=\"src/x.ts\">x</sg-file>",
            ),
        ]
    }

    #[test]
    fn test_compact_messages_files_only() {
        let history = verbose_history();
        let (compacted, report) = compact_messages(&history, CompactionMode::FilesOnly);

        assert_eq!(compacted.len(), history.len());
        assert_eq!(compacted[2].content, "Modified: src/a.ts, src/b.ts");
        assert_eq!(compacted[4].content, "I created two files.");
        assert_eq!(compacted[6].content, "Modified: src/a.ts");
        assert_eq!(compacted[8].content, "Modified: src/x.ts");
        assert!(compacted
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .all(|m| !m.content.contains("<sg-file")));
        // User messages are untouched even when they contain tags.
        assert_eq!(compacted[5], history[5]);
        for (before, after) in history.iter().zip(&compacted) {
            assert_eq!(before.role, after.role);
        }

        assert_eq!(report.messages_processed, 9);
        assert_eq!(report.messages_compacted, 3);
        assert!(report.compacted_chars < report.original_chars);
        assert!(report.reduction_percent > 0.0);
    }

    #[test]
    fn test_compaction_is_idempotent() {
        let (once, _) = compact_messages(&verbose_history(), CompactionMode::FilesOnly);
        let (twice, report) = compact_messages(&once, CompactionMode::FilesOnly);

        assert_eq!(once, twice);
        assert_eq!(report.messages_compacted, 0);
        assert_eq!(report.reduction_percent, 0.0);
    }

    #[test]
    fn test_modified_summary() {
        assert_eq!(modified_summary(&["a", "b/c.ts"]), "Modified: a, b/c.ts");
    }

    #[tokio::test]
    async fn test_compact_conversation_writes_back() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSystemStore::new(temp_dir.path()).unwrap();
        let id = ConversationId::generate();
        store.append_many(&id, verbose_history()).await.unwrap();

        let report = compact_conversation(&store, &id, CompactionOptions::default())
            .await
            .unwrap();
        assert_eq!(report.messages_compacted, 3);

        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored[2].content, "Modified: src/a.ts, src/b.ts");
        assert_eq!(stored.len(), 9);
    }

    #[tokio::test]
    async fn test_dry_run_leaves_history_alone() {
        let store = InMemoryStore::new();
        let id = ConversationId::generate();
        store.append_many(&id, verbose_history()).await.unwrap();

        let options = CompactionOptions {
            dry_run: true,
            ..Default::default()
        };
        let report = compact_conversation(&store, &id, options).await.unwrap();
        assert_eq!(report.messages_compacted, 3);
        assert_eq!(store.get(&id).await.unwrap().unwrap(), verbose_history());
    }

    #[tokio::test]
    async fn test_missing_conversation() {
        let store = InMemoryStore::new();
        let err = compact_conversation(&store, &ConversationId::generate(), Default::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConversationNotFound(_)));
    }
}
