//! The workspace handle: a rooted directory the engine is allowed to mutate.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::Rng;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::archive;
use super::sandbox::{to_posix, PathSandbox};
use super::types::PopulateOptions;
use crate::error::{Error, Result};
use crate::executor::{ExecuteOptions, ExecutionResult, StaticExecutor};
use crate::llm::LlmClient;
use crate::snapshot::{build_snapshot, Snapshot, SnapshotOptions};

/// A rooted directory under the engine's control.
///
/// The identifier is the basename of the root. All reads and writes go
/// through the [`PathSandbox`].
#[derive(Debug)]
pub struct Workspace {
    id: String,
    sandbox: PathSandbox,
    populated: AtomicBool,
}

impl Workspace {
    /// Open (creating if needed) a workspace at `root`.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let sandbox = PathSandbox::new(&root)?;
        let id = sandbox
            .root()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        debug!("Opened workspace {} at {}", id, sandbox.root().display());

        Ok(Self {
            id,
            sandbox,
            populated: AtomicBool::new(false),
        })
    }

    /// Create a fresh workspace directory named `ws_<hex>` under `base`.
    pub fn create_in(base: &Path) -> Result<Self> {
        let suffix: u64 = rand::thread_rng().gen();
        Self::create(base.join(format!("ws_{:016x}", suffix)))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &Path {
        self.sandbox.root()
    }

    pub fn sandbox(&self) -> &PathSandbox {
        &self.sandbox
    }

    pub fn is_populated(&self) -> bool {
        self.populated.load(Ordering::SeqCst)
    }

    /// Seed the workspace from a gzipped tar buffer. Allowed at most once.
    ///
    /// On failure, top-level entries created by the extraction are removed
    /// and the workspace stays unpopulated.
    pub fn populate(&self, buffer: &[u8], options: PopulateOptions) -> Result<()> {
        if self
            .populated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyPopulated {
                root: self.root().to_path_buf(),
            });
        }

        let before = match self.top_level_entries() {
            Ok(before) => before,
            Err(e) => {
                self.populated.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        match archive::unpack(&self.sandbox, buffer, options.strip) {
            Ok(files) => {
                info!("📦 Populated workspace {} with {} files", self.id, files);
                Ok(())
            }
            Err(e) => {
                warn!("Populate failed for workspace {}: {}", self.id, e);
                self.remove_new_entries(&before);
                self.populated.store(false, Ordering::SeqCst);
                Err(match e {
                    Error::Extract(_) => e,
                    other => Error::Extract(other.to_string()),
                })
            }
        }
    }

    /// Serialise the whole workspace into a portable gzipped tar.
    pub fn export(&self) -> Result<Vec<u8>> {
        archive::pack(self.root())
    }

    pub fn read_file(&self, relative: &str) -> Result<String> {
        let path = self.sandbox.resolve(relative)?;
        Ok(fs::read_to_string(path)?)
    }

    /// Write `content` to `relative`, creating parent directories. Returns the byte count.
    pub fn write_file(&self, relative: &str, content: &str) -> Result<u64> {
        let path = self.sandbox.resolve(relative)?;
        let write_err = |source| Error::Write {
            path: relative.to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        fs::write(&path, content).map_err(write_err)?;
        Ok(content.len() as u64)
    }

    /// Remove a file. Returns `false` if it did not exist.
    pub fn delete_file(&self, relative: &str) -> Result<bool> {
        let path = self.sandbox.resolve(relative)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(Error::Write {
                path: relative.to_string(),
                source,
            }),
        }
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.sandbox
            .resolve(relative)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    /// Relative POSIX paths of every regular file, sorted.
    pub fn files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(self.root()).min_depth(1).follow_links(false) {
            let entry = entry.map_err(|e| Error::Walk(e.to_string()))?;
            if entry.file_type().is_file() {
                if let Ok(rel) = entry.path().strip_prefix(self.root()) {
                    files.push(to_posix(rel));
                }
            }
        }
        files.sort();
        Ok(files)
    }

    pub fn snapshot(&self, options: &SnapshotOptions) -> Result<Snapshot> {
        build_snapshot(&self.sandbox, options)
    }

    /// Run one static-context turn against this workspace.
    pub async fn execute(
        &self,
        client: Arc<dyn LlmClient>,
        prompt: &str,
        options: ExecuteOptions,
    ) -> Result<ExecutionResult> {
        StaticExecutor::new(self, client).execute(prompt, options).await
    }

    /// Delete the workspace root. Fails if it is already gone.
    pub fn destroy(self) -> Result<()> {
        let root = self.root().to_path_buf();
        match fs::remove_dir_all(&root) {
            Ok(()) => {
                info!("🗑️ Deleted workspace {}", self.id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::WorkspaceNotFound { root })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn top_level_entries(&self) -> Result<HashSet<PathBuf>> {
        let mut entries = HashSet::new();
        for entry in fs::read_dir(self.root())? {
            entries.insert(entry?.path());
        }
        Ok(entries)
    }

    fn remove_new_entries(&self, before: &HashSet<PathBuf>) {
        let Ok(current) = self.top_level_entries() else {
            return;
        };
        for path in current.difference(before) {
            let result = if path.is_dir() {
                fs::remove_dir_all(path)
            } else {
                fs::remove_file(path)
            };
            if let Err(e) = result {
                warn!("Cleanup after failed populate: {}: {}", path.display(), e);
            }
        }
    }
}
