//! Sluice CLI - Main entry point

use clap::Parser;
use sluice_cli::{Cli, Commands, Config};
use sluice_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Warn
        })
        .output(LogOutput::Console)
        .log_file_prefix("sluice")
        .build();

    // LOG_* environment variables take precedence when any is set
    let env_configured = std::env::vars_os().any(|(k, _)| k.to_string_lossy().starts_with("LOG_"));
    let log_config = if env_configured {
        LogConfig::from_env().unwrap_or(log_config)
    } else {
        log_config
    };

    // The CLI works without logging
    let _guard = init_logging(&log_config).ok().flatten();

    if let Err(e) = execute_command(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn execute_command(cli: &Cli) -> sluice_cli::Result<()> {
    let config = Config::from_env()?;

    match &cli.command {
        Commands::Run {
            definition,
            run_id,
            batch_size,
            queue_capacity,
        } => {
            let overrides = sluice_cli::commands::run::Overrides {
                run_id: run_id.clone(),
                batch_size: *batch_size,
                queue_capacity: *queue_capacity,
            };
            sluice_cli::commands::run::run(&config, definition, overrides).await
        }

        Commands::Validate { definition } => sluice_cli::commands::validate::run(definition),

        Commands::Components { kind } => sluice_cli::commands::components::run(kind.as_deref()),

        Commands::Variable { definition, name } => {
            sluice_cli::commands::variable::run(&config, definition, name).await
        }
    }
}
