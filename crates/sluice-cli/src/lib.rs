//! Sluice CLI Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Command-line interface for running Sluice pipeline definitions.
//!
//! # Overview
//!
//! - **Runs**: execute a definition end to end (`sluice run`)
//! - **Validation**: check a definition against the registry without opening
//!   anything (`sluice validate`)
//! - **Catalog**: list registered components and their parameters
//!   (`sluice components`)
//! - **Variables**: resolve one `${name}` variable (`sluice variable`)

pub mod commands;
pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::Config;
pub use error::{CliError, Result};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Sluice - embeddable ETL pipelines
#[derive(Parser, Debug)]
#[command(name = "sluice")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a pipeline definition
    Run {
        /// Definition file (YAML, or JSON with a .json extension)
        definition: PathBuf,

        /// Run identifier (defaults to the definition id, else generated)
        #[arg(long)]
        run_id: Option<String>,

        /// Records per sink write
        #[arg(long)]
        batch_size: Option<usize>,

        /// Capacity of the queues between stages
        #[arg(long)]
        queue_capacity: Option<usize>,
    },

    /// Check a definition without opening any component
    Validate {
        /// Definition file
        definition: PathBuf,
    },

    /// List registered components
    Components {
        /// Only show one kind (datasource, source, processor, sink, executor, variable)
        #[arg(short, long)]
        kind: Option<String>,
    },

    /// Resolve one variable of a definition and print its value
    Variable {
        /// Definition file
        definition: PathBuf,

        /// Variable name
        name: String,
    },
}
