//! Run a pipeline definition

use crate::commands::load_definition;
use crate::config::Config;
use crate::error::{CliError, Result};
use colored::Colorize;
use sluice_components::builtin_registry;
use sluice_engine::definition::{assemble, PipelineDefinition};
use sluice_engine::files::LocalFileStore;
use sluice_engine::variables::{resolve_variables, substitute};
use sluice_engine::{PipelineError, RunReport};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Per-invocation settings from the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub run_id: Option<String>,
    pub batch_size: Option<usize>,
    pub queue_capacity: Option<usize>,
}

impl Overrides {
    /// Command-line flags win over the environment, which wins over the
    /// definition's own options
    pub fn apply(&self, config: &Config, definition: &mut PipelineDefinition) -> Result<()> {
        if self.batch_size == Some(0) {
            return Err(CliError::invalid_argument("--batch-size must be greater than zero"));
        }
        if self.queue_capacity == Some(0) {
            return Err(CliError::invalid_argument(
                "--queue-capacity must be greater than zero",
            ));
        }

        let mut options = config.apply(definition.options);
        if let Some(batch_size) = self.batch_size {
            options = options.with_batch_size(batch_size);
        }
        if let Some(queue_capacity) = self.queue_capacity {
            options = options.with_queue_capacity(queue_capacity);
        }
        definition.options = options;

        if let Some(run_id) = &self.run_id {
            definition.id = Some(run_id.clone());
        }
        Ok(())
    }
}

/// Resolve variables, assemble and run the definition at `path`
pub async fn run(config: &Config, path: &Path, overrides: Overrides) -> Result<()> {
    let registry = builtin_registry()?;
    let mut definition = load_definition(path)?;
    overrides.apply(config, &mut definition)?;

    let store = LocalFileStore::new(&config.file_dir);
    let values = resolve_variables(&registry, &definition, &store).await?;
    substitute(&mut definition, &values)?;

    let assembled = assemble(&registry, &definition, Arc::new(store)).await?;
    let run_id = assembled.pipeline.run_id().clone();

    let token = CancellationToken::new();
    let interrupt = tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling run");
                token.cancel();
            }
        }
    });

    let result = assembled.pipeline.run(&token, assembled.configs).await;
    interrupt.abort();

    match result {
        Ok(report) => {
            info!(run_id = %report.run_id, written = report.records_written, "Run finished");
            print_summary(&report);
            Ok(())
        }
        Err(e) if token.is_cancelled() && e.any(|e| matches!(e, PipelineError::Cancelled)) => {
            Err(CliError::Cancelled(run_id.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

fn print_summary(report: &RunReport) {
    println!("{}", "Pipeline run finished".green().bold());
    println!("  {:<16} {}", "Run id:", report.run_id.to_string().cyan());
    println!("  {:<16} {}", "State:", report.state);
    println!("  {:<16} {}", "Records read:", report.records_read);
    println!("  {:<16} {}", "Records written:", report.records_written);
    println!("  {:<16} {}", "Batches:", report.batches_written);
    for stats in &report.processors {
        if stats.filtered() > 0 {
            println!("  {:<16} {} ({} dropped)", "Processor:", stats.kind, stats.filtered());
        }
    }
    println!(
        "  {:<16} {:.3}s",
        "Duration:",
        report.duration.as_secs_f64()
    );
}
