//! Workspace management.
//!
//! A workspace is a rooted directory the engine may mutate. This module
//! covers path rooting (every read and write is resolved through
//! [`PathSandbox`]), one-shot seeding from a gzipped tar, and portable export
//! back to one.

mod archive;
mod manager;
mod sandbox;
mod types;

// Re-exports
pub use manager::Workspace;
pub use sandbox::PathSandbox;
pub use types::{create_shared_workspace, PopulateOptions, SharedWorkspace};

pub(crate) use sandbox::to_posix;
