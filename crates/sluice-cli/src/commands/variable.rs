//! Resolve one variable of a definition

use crate::commands::load_definition;
use crate::config::Config;
use crate::error::Result;
use sluice_components::builtin_registry;
use sluice_engine::files::LocalFileStore;
use sluice_engine::variables::resolve_variable;
use std::path::Path;

/// Resolve variable `name` and print its value on stdout
pub async fn run(config: &Config, path: &Path, name: &str) -> Result<()> {
    let registry = builtin_registry()?;
    let definition = load_definition(path)?;
    let store = LocalFileStore::new(&config.file_dir);

    let value = resolve_variable(&registry, &definition, name, &store).await?;
    println!("{}", value);
    Ok(())
}
