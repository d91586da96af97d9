//! Authoritative parse of a complete reply and its application to disk.
//!
//! Records are applied in source order. A failing record is logged and
//! collected, and the rest of the batch still runs.

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::entities::decode_html_entities;
use super::{
    find_open_tag, find_open_tag_end, parse_attributes, FileAction, FileWrite, CLOSE_TAG,
    OPEN_TAG_PREFIX,
};
use crate::error::Error;
use crate::workspace::Workspace;

/// A file that was written during commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WrittenFile {
    pub path: String,
    pub size: u64,
}

/// Records parsed from a reply plus the parse failures met on the way.
#[derive(Debug, Default)]
pub struct ParsedReply {
    pub writes: Vec<FileWrite>,
    pub errors: Vec<Error>,
}

/// Outcome of applying a batch of records.
#[derive(Debug, Default)]
pub struct CommitReport {
    /// One entry per path, in order of its last successful write.
    pub written: Vec<WrittenFile>,
    /// Paths that existed and were removed.
    pub deleted: Vec<String>,
    pub errors: Vec<Error>,
    /// Set when a cancellation stopped the batch part-way.
    pub cancelled: bool,
}

fn normalize_path(path: &str) -> String {
    let mut path = path.trim();
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    path.to_string()
}

/// Extract every `<sg-file>` record from a complete reply.
///
/// Records carrying a `placeholder` attribute are echoes of snapshot
/// placeholders and are skipped. A record with no closing tag ends parsing
/// and is reported as a parse error.
pub fn parse_file_writes(text: &str, decode_entities: bool) -> ParsedReply {
    let mut parsed = ParsedReply::default();
    let mut rest = text;

    while let Some(start) = find_open_tag(rest) {
        let tag = &rest[start..];
        let Some(tag_end) = find_open_tag_end(tag) else {
            parsed
                .errors
                .push(Error::parse(None, "unterminated opening tag"));
            rest = &tag[OPEN_TAG_PREFIX.len()..];
            continue;
        };
        let after_tag = &tag[tag_end + 1..];

        let attrs = match parse_attributes(&tag[OPEN_TAG_PREFIX.len()..tag_end]) {
            Ok(attrs) => attrs,
            Err(reason) => {
                parsed.errors.push(Error::parse(None, reason));
                match after_tag.find(CLOSE_TAG) {
                    Some(close) => {
                        rest = &after_tag[close + CLOSE_TAG.len()..];
                        continue;
                    }
                    None => break,
                }
            }
        };

        let Some(close) = after_tag.find(CLOSE_TAG) else {
            parsed
                .errors
                .push(Error::parse(Some(&attrs.path), "missing closing tag"));
            break;
        };
        rest = &after_tag[close + CLOSE_TAG.len()..];

        if let Some(reason) = attrs.placeholder {
            debug!("Ignoring placeholder record {} ({})", attrs.path, reason);
            continue;
        }

        let trimmed = after_tag[..close].trim();
        let body = if decode_entities {
            decode_html_entities(trimmed)
        } else {
            trimmed.to_string()
        };

        parsed.writes.push(FileWrite {
            path: normalize_path(&attrs.path),
            action: attrs.action,
            summary: attrs.summary,
            body,
        });
    }

    parsed
}

/// Apply records to the workspace in order. Duplicate paths: last record wins.
///
/// The cancellation token is checked between records; writes already made
/// stay on disk.
pub fn apply_file_writes(
    workspace: &Workspace,
    writes: &[FileWrite],
    cancel: Option<&CancellationToken>,
) -> CommitReport {
    apply_file_writes_with(workspace, writes, cancel, |_| {})
}

/// [`apply_file_writes`] with a hook run after each record is handled.
pub(crate) fn apply_file_writes_with(
    workspace: &Workspace,
    writes: &[FileWrite],
    cancel: Option<&CancellationToken>,
    mut after_record: impl FnMut(&FileWrite),
) -> CommitReport {
    let mut report = CommitReport::default();

    for write in writes {
        if cancel.is_some_and(|token| token.is_cancelled()) {
            warn!(
                "Commit cancelled after {} of {} records",
                report.written.len() + report.deleted.len() + report.errors.len(),
                writes.len()
            );
            report.cancelled = true;
            break;
        }

        match write.action {
            FileAction::Write => match workspace.write_file(&write.path, &write.body) {
                Ok(size) => {
                    report.written.retain(|w| w.path != write.path);
                    report.written.push(WrittenFile {
                        path: write.path.clone(),
                        size,
                    });
                    debug!("Wrote {} ({} bytes)", write.path, size);
                }
                Err(e) => {
                    warn!("Failed to write {}: {}", write.path, e);
                    report.errors.push(e);
                }
            },
            FileAction::Delete => match workspace.delete_file(&write.path) {
                Ok(existed) => {
                    report.written.retain(|w| w.path != write.path);
                    if existed {
                        report.deleted.push(write.path.clone());
                        debug!("Deleted {}", write.path);
                    } else {
                        debug!("Delete of missing file {} ignored", write.path);
                    }
                }
                Err(e) => {
                    warn!("Failed to delete {}: {}", write.path, e);
                    report.errors.push(e);
                }
            },
        }
        after_record(write);
    }

    info!(
        "💾 Commit: {} written, {} deleted, {} failed",
        report.written.len(),
        report.deleted.len(),
        report.errors.len()
    );
    report
}
