//! Workspace types and utilities.
//!
//! This module contains shared types for workspace management.

use std::path::PathBuf;
use std::sync::Arc;

use super::manager::Workspace;
use crate::error::Result;

/// Options for [`Workspace::populate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PopulateOptions {
    /// Number of leading path components removed from each archive member.
    pub strip: usize,
}

impl PopulateOptions {
    pub fn strip(strip: usize) -> Self {
        Self { strip }
    }
}

/// Shared workspace handle for concurrent tasks
pub type SharedWorkspace = Arc<Workspace>;

/// Create a shared workspace rooted at `root_path`
pub fn create_shared_workspace(root_path: PathBuf) -> Result<SharedWorkspace> {
    Ok(Arc::new(Workspace::create(root_path)?))
}
