//! Workspace walk for snapshot building.
//!
//! Uses `ignore::WalkBuilder` for per-directory .gitignore support. Excluded
//! directories are pruned before descent; every surviving file passes the
//! include, exclude, extension and size filters in that order.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use tracing::{debug, info, warn};

use super::options::SnapshotOptions;
use super::{PlaceholderReason, Snapshot, SnapshotEntry};
use crate::error::{Error, Result};
use crate::workspace::{to_posix, PathSandbox};

/// Compiled include/exclude/extension filters.
struct Filters {
    include: Option<GlobSet>,
    exclude: GlobSet,
    /// Directory forms of `…/**` excludes, used for pruning.
    exclude_dirs: GlobSet,
    extensions: Option<HashSet<String>>,
}

fn compile(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::InvalidOptions(format!("bad glob '{pattern}': {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::InvalidOptions(format!("bad glob set: {e}")))
}

impl Filters {
    fn new(options: &SnapshotOptions) -> Result<Self> {
        let include = if options.include.is_empty() {
            None
        } else {
            Some(compile(&options.include)?)
        };

        let dir_patterns: Vec<String> = options
            .exclude
            .iter()
            .filter_map(|p| p.strip_suffix("/**").map(str::to_string))
            .collect();

        let extensions = options.extensions.as_ref().map(|exts| {
            exts.iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect()
        });

        Ok(Self {
            include,
            exclude: compile(&options.exclude)?,
            exclude_dirs: compile(&dir_patterns)?,
            extensions,
        })
    }

    fn prunes_dir(&self, relative: &str) -> bool {
        self.exclude_dirs.is_match(relative) || self.exclude.is_match(relative)
    }

    fn is_included(&self, relative: &str) -> bool {
        self.include
            .as_ref()
            .map_or(true, |set| set.is_match(relative))
    }

    fn has_allowed_extension(&self, relative: &str) -> bool {
        let Some(allowed) = &self.extensions else {
            return true;
        };
        Path::new(relative)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| allowed.contains(&e.to_ascii_lowercase()))
            .unwrap_or(false)
    }
}

/// Build a WalkBuilder with directory pruning and gitignore configured.
fn build_walker(root_path: &Path, options: &SnapshotOptions, filters: Arc<Filters>) -> WalkBuilder {
    let mut builder = WalkBuilder::new(root_path);

    builder.standard_filters(false);
    builder.hidden(false);
    builder.parents(false);
    builder.git_ignore(options.respect_gitignore);
    builder.require_git(false);

    // Don't follow symlinks
    builder.follow_links(false);

    builder.sort_by_file_name(|a, b| a.cmp(b));

    let root = root_path.to_path_buf();
    builder.filter_entry(move |entry| {
        if entry.depth() == 0 || !entry.file_type().is_some_and(|t| t.is_dir()) {
            return true;
        }
        match entry.path().strip_prefix(&root) {
            Ok(rel) => !filters.prunes_dir(&to_posix(rel)),
            Err(_) => true,
        }
    });

    builder
}

/// Walk the workspace and build a snapshot document.
pub fn build_snapshot(sandbox: &PathSandbox, options: &SnapshotOptions) -> Result<Snapshot> {
    let root_path = sandbox.root();
    let filters = Arc::new(Filters::new(options)?);

    debug!("Scanning workspace for snapshot: {}", root_path.display());

    let mut entries = Vec::new();
    for entry in build_walker(root_path, options, filters.clone()).build() {
        let entry = entry.map_err(|e| Error::Walk(e.to_string()))?;

        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }

        let relative = match entry.path().strip_prefix(root_path) {
            Ok(p) => to_posix(p),
            Err(_) => {
                warn!("Failed to get relative path for {}", entry.path().display());
                continue;
            }
        };

        if let Some(record) = process_file(entry.path(), relative, options, &filters)? {
            entries.push(record);
        }
    }

    let snapshot = Snapshot::from_entries(entries);

    if let Some(limit) = options.max_total_size {
        let actual = snapshot.body_bytes();
        if actual > limit {
            return Err(Error::BudgetExceeded { limit, actual });
        }
    }

    info!(
        "📸 Snapshot: {} files inlined, {} placeholders, {} bytes",
        snapshot.file_count(),
        snapshot.placeholder_count(),
        snapshot.as_str().len()
    );

    Ok(snapshot)
}

/// Turn one file into a snapshot record, or `None` if it is filtered out.
fn process_file(
    path: &Path,
    relative: String,
    options: &SnapshotOptions,
    filters: &Filters,
) -> Result<Option<SnapshotEntry>> {
    if relative.contains('"') {
        warn!("Skipping file with unframeable path: {}", relative);
        return Ok(None);
    }

    if !filters.is_included(&relative) {
        return Ok(None);
    }

    let placeholder = |reason: PlaceholderReason| -> Result<Option<SnapshotEntry>> {
        Ok(options.include_placeholders.then(|| SnapshotEntry::Placeholder {
            path: relative.clone(),
            reason,
        }))
    };

    if filters.exclude.is_match(&relative) {
        return placeholder(PlaceholderReason::Excluded);
    }

    if !filters.has_allowed_extension(&relative) {
        return Ok(None);
    }

    let metadata = fs::metadata(path).map_err(|e| Error::Walk(format!("{relative}: {e}")))?;
    if metadata.len() > options.max_file_size {
        debug!("Placeholder for large file ({} bytes): {}", metadata.len(), relative);
        return placeholder(PlaceholderReason::TooLarge);
    }

    let content_bytes = fs::read(path).map_err(|e| Error::Walk(format!("{relative}: {e}")))?;

    // Non-UTF-8 content is never inlined
    let content = match String::from_utf8(content_bytes) {
        Ok(s) => s,
        Err(_) => {
            debug!("Placeholder for binary file: {}", relative);
            return placeholder(PlaceholderReason::Binary);
        }
    };

    Ok(Some(SnapshotEntry::File {
        path: relative,
        content,
    }))
}
