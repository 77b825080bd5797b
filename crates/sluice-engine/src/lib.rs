//! Sluice Engine
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Runs ETL pipelines: a source, zero or more processors and a sink,
//! optionally bracketed by pre/post executors, executed as concurrent stages
//! joined by bounded queues.
//!
//! # Modules
//!
//! - **component**: capability contracts every plugin implements
//! - **registry**: catalog of component types and their declared parameters
//! - **schema**: column mapping negotiated from source to sink
//! - **pipeline**: lifecycle, workers, batching and cancellation
//! - **files**: file-key resolution for component configuration
//! - **definition**: YAML/JSON pipeline definitions and assembly
//! - **variables**: `${name}` placeholder resolution
//!
//! # Example
//!
//! ```no_run
//! use sluice_engine::definition::{assemble, PipelineDefinition};
//! use sluice_engine::files::NoopResolver;
//! use sluice_engine::registry::Registry;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = Registry::new();
//!     let definition = PipelineDefinition::from_path("pipeline.yaml")?;
//!     let assembled = assemble(&registry, &definition, Arc::new(NoopResolver)).await?;
//!
//!     let token = CancellationToken::new();
//!     let report = assembled.pipeline.run(&token, assembled.configs).await?;
//!     println!("wrote {} records", report.records_written);
//!     Ok(())
//! }
//! ```

pub mod component;
pub mod definition;
pub mod error;
pub mod files;
pub mod pipeline;
pub mod registry;
pub mod schema;
pub mod variables;

pub use component::{
    Connection, Datasource, Executor, HttpEndpoint, Processor, Sink, Source, SqlConnection,
    SqlDialect, Variable,
};
pub use error::{AssemblyError, PipelineError, RegistryError, Stage};
pub use pipeline::{
    Bound, Pipeline, PipelineComponents, PipelineOptions, ProcessorConfig, RunConfigs, RunId,
    RunReport, RunState,
};
pub use registry::{ComponentKind, Registry};
pub use schema::{FrozenSchema, SchemaMapping};
