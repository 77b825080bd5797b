//! Check a definition against the registry

use crate::commands::load_definition;
use crate::error::Result;
use colored::Colorize;
use sluice_components::builtin_registry;
use sluice_engine::definition::{validate, PipelineDefinition};
use sluice_engine::variables::placeholders;
use sluice_engine::AssemblyError;
use std::path::Path;
use tracing::debug;

/// Validate a definition without opening any component
pub fn run(path: &Path) -> Result<()> {
    let definition = load_definition(path)?;
    check(&definition)?;

    println!(
        "{} {}",
        "Valid:".green().bold(),
        path.display().to_string().cyan()
    );
    println!("  {}", describe(&definition));
    Ok(())
}

/// Registry references, datasource bindings, parameters and placeholders
pub fn check(definition: &PipelineDefinition) -> Result<()> {
    let registry = builtin_registry()?;
    validate(&registry, definition)?;

    for name in placeholders(definition)? {
        if !definition.variables.contains_key(&name) {
            return Err(AssemblyError::UnknownVariable(name).into());
        }
    }
    debug!(components = definition.components().len(), "Definition validated");
    Ok(())
}

/// One-line shape of the pipeline, in run order
fn describe(definition: &PipelineDefinition) -> String {
    let mut stages = Vec::new();
    if let Some(pre) = &definition.pre_execute {
        stages.push(format!("[{}]", pre.kind));
    }
    stages.push(definition.source.kind.clone());
    stages.extend(definition.processors.iter().map(|p| p.kind.clone()));
    stages.push(definition.sink.kind.clone());
    if let Some(post) = &definition.post_execute {
        stages.push(format!("[{}]", post.kind));
    }
    stages.join(" -> ")
}
