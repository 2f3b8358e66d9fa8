//! cairn - content-addressed sync and layered image builds
//!
//! CLI entry point that dispatches to subcommands.

use cairn::cli::{Cli, Commands};
use cairn::config::ConfigManager;
use cairn::error::CairnResult;
use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> CairnResult<()> {
    let cli = Cli::parse();

    let config_manager = if let Some(ref path) = cli.config {
        ConfigManager::with_path(path.clone())
    } else {
        ConfigManager::new()
    };
    let config = config_manager.load().await?;

    // Initialize logging: 0 = warn (spinners only), 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("cairn=warn"),
        1 => EnvFilter::new("cairn=info"),
        _ => EnvFilter::new("cairn=debug"),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if config.general.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.without_time().init();
    }

    match cli.command {
        Commands::Hash(args) => cairn::cli::commands::hash(args, &config).await,
        Commands::Sync(args) => cairn::cli::commands::sync(args, &config).await,
        Commands::Build(args) => cairn::cli::commands::build(args, &config).await,
        Commands::Config(args) => cairn::cli::commands::config(args, &config_manager, &config).await,
    }
}
