//! CLI command implementations

pub mod components;
pub mod run;
pub mod validate;
pub mod variable;

use crate::error::{CliError, Result};
use sluice_engine::definition::PipelineDefinition;
use std::path::Path;

/// Read and parse a definition file
pub fn load_definition(path: &Path) -> Result<PipelineDefinition> {
    PipelineDefinition::from_path(path)
        .map_err(|e| CliError::definition(path.display().to_string(), e))
}
