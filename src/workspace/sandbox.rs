//! Path rooting for every filesystem operation on a workspace.
//!
//! A candidate path is accepted only when its normalised, symlink-resolved
//! form lies strictly below the (canonical) workspace root.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct PathSandbox {
    root: PathBuf,
}

impl PathSandbox {
    /// Create a sandbox for an existing directory. The root is canonicalised once.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().canonicalize()?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a workspace-relative path to an absolute one under the root.
    ///
    /// Rejects absolute paths, NUL bytes, `..` that climbs above the root,
    /// the root itself, and anything a symlink redirects outside the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let escape = || Error::PathEscape {
            path: relative.to_string(),
        };

        if relative.is_empty() || relative.contains('\0') {
            return Err(escape());
        }
        if relative.starts_with('/') || relative.starts_with('\\') {
            return Err(escape());
        }

        let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => parts.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(escape());
                    }
                }
                Component::RootDir | Component::Prefix(_) => return Err(escape()),
            }
        }
        if parts.is_empty() {
            return Err(escape());
        }

        let candidate = parts
            .iter()
            .fold(self.root.clone(), |acc, part| acc.join(part));

        // Walk up to the deepest ancestor that exists, resolve it, then
        // re-attach the not-yet-existing tail.
        let mut existing = candidate.as_path();
        let mut tail = Vec::new();
        while fs::symlink_metadata(existing).is_err() {
            match (existing.file_name(), existing.parent()) {
                (Some(name), Some(parent)) => {
                    tail.push(name.to_os_string());
                    existing = parent;
                }
                _ => return Err(escape()),
            }
        }

        // Dangling symlinks fail to canonicalise; treat them as escapes.
        let mut resolved = existing.canonicalize().map_err(|_| escape())?;
        for name in tail.iter().rev() {
            resolved.push(name);
        }

        if resolved == self.root || !resolved.starts_with(&self.root) {
            return Err(escape());
        }
        Ok(resolved)
    }

    /// POSIX-form path of `absolute` relative to the root, if it lies under it.
    pub fn relative(&self, absolute: &Path) -> Option<String> {
        let rel = absolute.strip_prefix(&self.root).ok()?;
        if rel.as_os_str().is_empty() {
            return None;
        }
        Some(to_posix(rel))
    }
}

/// Render a relative path with `/` separators.
pub(crate) fn to_posix(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
