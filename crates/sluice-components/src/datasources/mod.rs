//! Built-in datasources

pub mod doris;
pub mod sql;

pub use doris::DorisDatasource;
pub use sql::SqlDatasource;
