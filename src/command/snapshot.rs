use anyhow::{Context, Result};

use sgforge::snapshot::SnapshotEntry;
use sgforge::{SnapshotOptions, Workspace};

use crate::cli;

pub async fn run_snapshot(
    workspace_root: Option<String>,
    options: SnapshotOptions,
    print: bool,
    verbose: bool,
) -> Result<()> {
    let root_path = cli::resolve_existing_root(workspace_root)?;
    let workspace = Workspace::create(&root_path)
        .with_context(|| format!("Failed to open workspace at {}", root_path.display()))?;

    let snapshot = workspace
        .snapshot(&options)
        .context("Failed to build snapshot")?;

    if print {
        print!("{}", snapshot.as_str());
        return Ok(());
    }

    println!("Scanning workspace: {}\n", root_path.display());
    println!("Summary:");
    println!("  Files inlined: {}", snapshot.file_count());
    println!("  Placeholders: {}", snapshot.placeholder_count());
    println!("  Body size: {}", cli::format_size(snapshot.body_bytes()));
    println!("  Document size: {}", cli::format_size(snapshot.as_str().len() as u64));
    println!("  Digest: {}", snapshot.digest());

    if verbose {
        println!("\nFiles:");
        for entry in snapshot.entries() {
            match entry {
                SnapshotEntry::File { path, content } => {
                    println!("  {:>10}  {}", cli::format_size(content.len() as u64), path);
                }
                SnapshotEntry::Placeholder { path, reason } => {
                    println!("  {:>10}  {}", format!("[{}]", reason.as_str()), path);
                }
            }
        }
    } else if !snapshot.is_empty() {
        println!("\n  Use --verbose to see all files");
    }

    Ok(())
}
