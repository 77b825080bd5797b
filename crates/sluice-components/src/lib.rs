//! Sluice Components
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Built-in datasources, sources, processors, sinks, executors and variables
//! for the Sluice engine.
//!
//! SQL components exist once per dialect and are registered under the
//! dialect's name (`sqlite`, `postgres`, `mysql`), each requiring a
//! datasource of the same type.
//!
//! ```no_run
//! let registry = sluice_components::builtin_registry()?;
//! for name in registry.type_names(sluice_engine::ComponentKind::Sink) {
//!     println!("{}", name);
//! }
//! # Ok::<(), sluice_engine::RegistryError>(())
//! ```

pub mod datasources;
pub mod executors;
pub mod processors;
pub mod sinks;
pub mod sources;
pub mod sql;
pub mod variables;

use sluice_engine::component::SqlDialect;
use sluice_engine::{Registry, RegistryError};

use datasources::{DorisDatasource, SqlDatasource};
use executors::SqlExecutor;
use processors::{ConvertType, FilterRows, MaskData, RenameColumn, SelectColumns};
use sinks::{CsvSink, DorisSink, JsonSink, SqlSink};
use sources::{CsvSource, JsonSource, SqlSource};
use variables::SqlVariable;

const DIALECTS: [SqlDialect; 3] = [SqlDialect::Sqlite, SqlDialect::Postgres, SqlDialect::Mysql];

/// Registry holding every built-in component
pub fn builtin_registry() -> Result<Registry, RegistryError> {
    let mut registry = Registry::new();
    register_builtins(&mut registry)?;
    Ok(registry)
}

/// Add the built-in components to an existing registry
pub fn register_builtins(registry: &mut Registry) -> Result<(), RegistryError> {
    // Datasources first so dependents can name them
    for dialect in DIALECTS {
        registry.register_datasource(dialect.name(), SqlDatasource::params(dialect), move || {
            Box::new(SqlDatasource::new(dialect))
        })?;
    }
    registry.register_datasource("doris", DorisDatasource::params(), || {
        Box::new(DorisDatasource::new())
    })?;

    registry.register_source("csv", CsvSource::params(), None, || Box::new(CsvSource::new()))?;
    registry.register_source("json", JsonSource::params(), None, || {
        Box::new(JsonSource::new())
    })?;

    registry.register_processor("rename_column", RenameColumn::params(), || {
        Box::new(RenameColumn::new())
    })?;
    registry.register_processor("select_columns", SelectColumns::params(), || {
        Box::new(SelectColumns::new())
    })?;
    registry.register_processor("filter_rows", FilterRows::params(), || {
        Box::new(FilterRows::new())
    })?;
    registry.register_processor("mask_data", MaskData::params(), || Box::new(MaskData::new()))?;
    registry.register_processor("convert_type", ConvertType::params(), || {
        Box::new(ConvertType::new())
    })?;

    registry.register_sink("csv", CsvSink::params(), None, || Box::new(CsvSink::new()))?;
    registry.register_sink("json", JsonSink::params(), None, || Box::new(JsonSink::new()))?;
    registry.register_sink("doris", DorisSink::params(), Some("doris"), || {
        Box::new(DorisSink::new())
    })?;

    for dialect in DIALECTS {
        let name = dialect.name();
        registry.register_source(name, SqlSource::params(), Some(name), || {
            Box::new(SqlSource::new())
        })?;
        registry.register_sink(name, SqlSink::params(), Some(name), || Box::new(SqlSink::new()))?;
        registry.register_executor(name, SqlExecutor::params(), Some(name), || {
            Box::new(SqlExecutor::new())
        })?;
        registry.register_variable(name, SqlVariable::params(), Some(name), || {
            Box::new(SqlVariable::new())
        })?;
    }

    Ok(())
}
