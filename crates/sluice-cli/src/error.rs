//! Error types for the Sluice CLI
//!
//! Every variant is user-facing and says what to check next.

use sluice_engine::{AssemblyError, PipelineError, RegistryError};
use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    /// Definition file could not be read or parsed
    #[error("Invalid pipeline definition '{path}': {source}. Check the file path and its YAML syntax.")]
    Definition {
        path: String,
        #[source]
        source: AssemblyError,
    },

    /// Definition parsed, but does not fit the registered components
    #[error("Pipeline definition is not runnable: {0}. Run 'sluice components' to list available types and parameters.")]
    Assembly(#[from] AssemblyError),

    /// The run itself failed
    #[error("Pipeline run failed: {0}")]
    Pipeline(#[from] PipelineError),

    /// The run was interrupted before it finished
    #[error("Pipeline run '{0}' was cancelled. Output files of this run were discarded.")]
    Cancelled(String),

    /// Component catalog could not be built
    #[error("Component registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Environment configuration is invalid
    #[error("Configuration error: {0}. Check your environment variables or .env file.")]
    Config(String),

    /// Unknown value for a command option
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// File system operation failed
    #[error("File operation failed: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    /// Generic anyhow error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    /// Create a definition error for the file at `path`
    pub fn definition(path: impl Into<String>, source: AssemblyError) -> Self {
        Self::Definition {
            path: path.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}
