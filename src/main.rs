use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use sgforge::config::ConfigOverrides;

mod cli;
mod command;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Snapshot { filters, print } => {
            command::run_snapshot(cli.workspace_root, filters.to_options(), print, cli.verbose)
                .await?;
        }
        Commands::Exec {
            prompt,
            conversation,
            conversation_id,
            store,
            stream,
            replay,
            decode_entities,
            instructions,
            reasoning_effort,
            temperature,
            json,
            filters,
        } => {
            command::run_exec(command::ExecArgs {
                workspace_root: cli.workspace_root,
                prompt,
                conversation,
                conversation_id,
                store,
                stream,
                replay,
                decode_entities,
                instructions,
                reasoning_effort,
                temperature,
                json,
                snapshot: filters.to_options(),
                overrides: ConfigOverrides {
                    api_url: cli.api_url,
                    api_key: None,
                    model: cli.model,
                    home: cli.home,
                },
            })
            .await?;
        }
        Commands::Compact { id, dry_run, store } => {
            command::run_compact(&id, dry_run, store, cli.home).await?;
        }
        Commands::Export { out } => {
            command::run_export(cli.workspace_root, &out).await?;
        }
        Commands::Populate { archive, strip } => {
            command::run_populate(cli.workspace_root, &archive, strip).await?;
        }
    }

    Ok(())
}
