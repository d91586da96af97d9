//! Workspace snapshots: one bounded text document listing selected files.
//!
//! Records are sorted by path and framed with the same `<sg-file>` grammar
//! the model writes back, so the document is reproducible for a fixed
//! filesystem state and options.

mod options;
mod scanner;
#[cfg(test)]
mod tests;

pub use options::{SnapshotOptions, DEFAULT_EXCLUDES, DEFAULT_MAX_FILE_SIZE};
pub use scanner::build_snapshot;

use std::fmt;

use sha2::{Digest, Sha256};

use crate::protocol::{render_file_record, render_placeholder};

/// Why a file appears without its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderReason {
    TooLarge,
    Binary,
    Excluded,
}

impl PlaceholderReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaceholderReason::TooLarge => "too-large",
            PlaceholderReason::Binary => "binary",
            PlaceholderReason::Excluded => "excluded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotEntry {
    File { path: String, content: String },
    Placeholder { path: String, reason: PlaceholderReason },
}

impl SnapshotEntry {
    pub fn path(&self) -> &str {
        match self {
            SnapshotEntry::File { path, .. } | SnapshotEntry::Placeholder { path, .. } => path,
        }
    }
}

/// An immutable, serialised snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    entries: Vec<SnapshotEntry>,
    text: String,
}

impl Snapshot {
    /// Sort entries by path and render the document.
    pub fn from_entries(mut entries: Vec<SnapshotEntry>) -> Self {
        entries.sort_by(|a, b| a.path().cmp(b.path()));

        let mut text = String::new();
        for entry in &entries {
            match entry {
                SnapshotEntry::File { path, content } => {
                    text.push_str(&render_file_record(path, content))
                }
                SnapshotEntry::Placeholder { path, reason } => {
                    text.push_str(&render_placeholder(path, reason.as_str()))
                }
            }
        }

        Self { entries, text }
    }

    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    pub fn get(&self, path: &str) -> Option<&SnapshotEntry> {
        self.entries
            .binary_search_by(|e| e.path().cmp(path))
            .ok()
            .map(|idx| &self.entries[idx])
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn file_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, SnapshotEntry::File { .. }))
            .count()
    }

    pub fn placeholder_count(&self) -> usize {
        self.entries.len() - self.file_count()
    }

    /// Total bytes of inlined bodies.
    pub fn body_bytes(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| match e {
                SnapshotEntry::File { content, .. } => content.len() as u64,
                SnapshotEntry::Placeholder { .. } => 0,
            })
            .sum()
    }

    /// SHA-256 of the serialised document, hex encoded.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.text.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
