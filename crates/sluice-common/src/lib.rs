//! Sluice Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared data model, configuration helpers, and error handling for the
//! Sluice workspace.
//!
//! # Overview
//!
//! - **Records**: [`record::Record`] and [`record::Value`], the unit of data
//!   moving through a pipeline
//! - **Configuration**: [`params::ComponentConfig`], the flat string map every
//!   component is configured with, and [`params::ParamSpec`] declarations
//! - **Error Handling**: [`SluiceError`] and the [`Result`] alias
//! - **Logging**: tracing subscriber setup shared by every binary
//! - **Digests**: hex digests used for masking values
//!
//! # Example
//!
//! ```no_run
//! use sluice_common::params::ComponentConfig;
//! use sluice_common::record::{Record, Value};
//!
//! fn main() -> sluice_common::Result<()> {
//!     let config = ComponentConfig::from_pairs([("delimiter", ";")]);
//!     let delimiter = config.get_or("delimiter", ",");
//!
//!     let mut record = Record::new();
//!     record.insert("name", Value::from("ada"));
//!     println!("{} -> {}", delimiter, record.len());
//!     Ok(())
//! }
//! ```

pub mod digest;
pub mod error;
pub mod logging;
pub mod params;
pub mod record;

// Re-export commonly used types
pub use error::{Result, SluiceError};
pub use params::{ComponentConfig, ParamSpec};
pub use record::{Record, Value};
