//! Process configuration for the Sluice CLI
//!
//! Read from the environment after `.env` has been loaded.

use crate::error::{CliError, Result};
use serde::Serialize;
use sluice_engine::PipelineOptions;
use std::path::PathBuf;

/// Default root of the local file store
pub const DEFAULT_FILE_DIR: &str = "./file";

pub const ENV_FILE_DIR: &str = "SLUICE_FILE_DIR";
pub const ENV_BATCH_SIZE: &str = "SLUICE_BATCH_SIZE";
pub const ENV_QUEUE_CAPACITY: &str = "SLUICE_QUEUE_CAPACITY";

/// CLI configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Config {
    /// Root of the local file store (`input/` and `output/` live below it)
    pub file_dir: PathBuf,

    /// Batch size override for every run
    pub batch_size: Option<usize>,

    /// Queue capacity override for every run
    pub queue_capacity: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            file_dir: PathBuf::from(DEFAULT_FILE_DIR),
            batch_size: None,
            queue_capacity: None,
        }
    }
}

impl Config {
    /// Load config from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load config through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = lookup(ENV_FILE_DIR).filter(|d| !d.trim().is_empty()) {
            config.file_dir = PathBuf::from(dir);
        }
        config.batch_size = parse_size(ENV_BATCH_SIZE, lookup(ENV_BATCH_SIZE))?;
        config.queue_capacity = parse_size(ENV_QUEUE_CAPACITY, lookup(ENV_QUEUE_CAPACITY))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == Some(0) {
            return Err(CliError::config(format!(
                "{} must be greater than zero",
                ENV_BATCH_SIZE
            )));
        }
        if self.queue_capacity == Some(0) {
            return Err(CliError::config(format!(
                "{} must be greater than zero",
                ENV_QUEUE_CAPACITY
            )));
        }
        Ok(())
    }

    /// Apply the configured overrides on top of a definition's options
    pub fn apply(&self, options: PipelineOptions) -> PipelineOptions {
        let mut options = options;
        if let Some(batch_size) = self.batch_size {
            options = options.with_batch_size(batch_size);
        }
        if let Some(queue_capacity) = self.queue_capacity {
            options = options.with_queue_capacity(queue_capacity);
        }
        options
    }
}

fn parse_size(key: &str, value: Option<String>) -> Result<Option<usize>> {
    match value {
        None => Ok(None),
        Some(v) if v.trim().is_empty() => Ok(None),
        Some(v) => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| CliError::config(format!("{} must be a positive integer, got '{}'", key, v))),
    }
}
