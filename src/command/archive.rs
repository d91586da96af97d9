use std::path::Path;

use anyhow::{Context, Result};

use sgforge::{PopulateOptions, Workspace};

use crate::cli;

pub async fn run_export(workspace_root: Option<String>, out: &Path) -> Result<()> {
    let root_path = cli::resolve_existing_root(workspace_root)?;
    let workspace = Workspace::create(&root_path)?;

    let bytes = workspace.export().context("Failed to export workspace")?;
    tokio::fs::write(out, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", out.display()))?;

    println!(
        "📦 Exported {} ({}) to {}",
        workspace.id(),
        cli::format_size(bytes.len() as u64),
        out.display()
    );
    Ok(())
}

pub async fn run_populate(workspace_root: Option<String>, archive: &Path, strip: usize) -> Result<()> {
    let root_path = cli::resolve_workspace_root(workspace_root)?;
    let buffer = tokio::fs::read(archive)
        .await
        .with_context(|| format!("Failed to read {}", archive.display()))?;

    let workspace = Workspace::create(&root_path)
        .with_context(|| format!("Failed to open workspace at {}", root_path.display()))?;
    workspace
        .populate(&buffer, PopulateOptions::strip(strip))
        .context("Failed to populate workspace")?;

    let count = workspace.files()?.len();
    println!("✅ Populated {} with {} file(s)", workspace.root().display(), count);
    Ok(())
}
