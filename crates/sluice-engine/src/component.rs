//! Capability contracts implemented by pipeline components
//!
//! Every plugin kind is an object-safe async trait. The engine only ever
//! holds boxed trait objects and never calls one component from two tasks
//! at once, so implementations need `Send` but not `Sync`.
//!
//! Lifecycles:
//!
//! - [`Source`]: `open` → `columns` → `read`* → `close`
//! - [`Processor`]: `handle_columns` → `open` → `process`* → `close`
//! - [`Sink`]: `open` → `write`* → `close`
//! - [`Executor`]: `open` → `close`
//! - [`Variable`]: `get`
//! - [`Datasource`]: `init` → `connection`* → `close`
//!
//! A component that receives a datasource at `open` owns it and closes it
//! from its own `close`.

use crate::pipeline::RunId;
use crate::schema::{FrozenSchema, SchemaMapping};
use anyhow::{bail, Result};
use async_trait::async_trait;
use sluice_common::{ComponentConfig, Record};
use sqlx::AnyPool;
use std::fmt;

/// SQL flavour of a connection pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Sqlite,
    Postgres,
    Mysql,
}

impl SqlDialect {
    /// Bind placeholder for the 1-based parameter `index`
    pub fn placeholder(self, index: usize) -> String {
        match self {
            SqlDialect::Postgres => format!("${}", index),
            SqlDialect::Sqlite | SqlDialect::Mysql => "?".to_string(),
        }
    }

    /// Quote an identifier (table or column name)
    pub fn quote_ident(self, ident: &str) -> String {
        match self {
            SqlDialect::Mysql => format!("`{}`", ident.replace('`', "``")),
            SqlDialect::Sqlite | SqlDialect::Postgres => {
                format!("\"{}\"", ident.replace('"', "\"\""))
            },
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SqlDialect::Sqlite => "sqlite",
            SqlDialect::Postgres => "postgres",
            SqlDialect::Mysql => "mysql",
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pooled SQL connection handed out by SQL datasources
#[derive(Debug, Clone)]
pub struct SqlConnection {
    pub pool: AnyPool,
    pub dialect: SqlDialect,
}

/// Coordinates of an HTTP bulk-load endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct HttpEndpoint {
    /// Scheme and host, e.g. `http://doris-fe`
    pub host: String,
    pub port: String,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl HttpEndpoint {
    /// `host:port` base URL without a trailing slash
    pub fn base_url(&self) -> String {
        format!("{}:{}", self.host.trim_end_matches('/'), self.port)
    }
}

impl fmt::Debug for HttpEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .finish()
    }
}

/// Connection handle exposed by a [`Datasource`]
#[derive(Debug, Clone)]
pub enum Connection {
    Sql(SqlConnection),
    Http(HttpEndpoint),
}

impl Connection {
    pub fn into_sql(self) -> Result<SqlConnection> {
        match self {
            Connection::Sql(sql) => Ok(sql),
            Connection::Http(_) => bail!("expected a SQL connection, got an HTTP endpoint"),
        }
    }

    pub fn into_http(self) -> Result<HttpEndpoint> {
        match self {
            Connection::Http(endpoint) => Ok(endpoint),
            Connection::Sql(_) => bail!("expected an HTTP endpoint, got a SQL connection"),
        }
    }
}

/// Connection resource shared by configuration, owned per component at runtime
#[async_trait]
pub trait Datasource: Send {
    async fn init(&mut self, config: &ComponentConfig) -> Result<()>;

    /// Handle to the initialized resource. Errors before `init`.
    fn connection(&self) -> Result<Connection>;

    async fn close(&mut self) -> Result<()>;
}

/// Producer of records
#[async_trait]
pub trait Source: Send {
    async fn open(
        &mut self,
        config: &ComponentConfig,
        datasource: Option<Box<dyn Datasource>>,
    ) -> Result<()>;

    /// Initial column mapping; only meaningful after `open`
    fn columns(&self) -> SchemaMapping;

    /// Next record, or `Ok(None)` once the input is exhausted
    async fn read(&mut self) -> Result<Option<Record>>;

    async fn close(&mut self) -> Result<()>;
}

/// Per-record transformation
#[async_trait]
pub trait Processor: Send {
    /// Advertise how this processor reshapes the columns.
    ///
    /// Called once during setup, before `open`, with the processor's own
    /// configuration. The default keeps the mapping unchanged.
    fn handle_columns(&self, _config: &ComponentConfig, columns: SchemaMapping) -> SchemaMapping {
        columns
    }

    async fn open(&mut self, config: &ComponentConfig) -> Result<()>;

    /// Transform one record. `Ok(None)` drops it.
    async fn process(&mut self, record: Record) -> Result<Option<Record>>;

    async fn close(&mut self) -> Result<()>;
}

/// Consumer of record batches
#[async_trait]
pub trait Sink: Send {
    async fn open(
        &mut self,
        config: &ComponentConfig,
        schema: FrozenSchema,
        datasource: Option<Box<dyn Datasource>>,
    ) -> Result<()>;

    /// Persist one batch; called repeatedly with successive batches
    async fn write(&mut self, run_id: &RunId, batch: &[Record]) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// One-shot side effect run before or after the data flow
#[async_trait]
pub trait Executor: Send {
    async fn open(
        &mut self,
        config: &ComponentConfig,
        datasource: Option<Box<dyn Datasource>>,
    ) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Resolves a single named value used for placeholder substitution
#[async_trait]
pub trait Variable: Send {
    /// The datasource, if any, is closed by the variable before returning
    async fn get(
        &mut self,
        config: &ComponentConfig,
        datasource: Option<Box<dyn Datasource>>,
    ) -> Result<String>;
}

/// Take ownership of a datasource that a component requires
pub fn require_datasource(
    datasource: Option<Box<dyn Datasource>>,
    component: &str,
) -> Result<Box<dyn Datasource>> {
    match datasource {
        Some(ds) => Ok(ds),
        None => bail!("{}: a datasource is required", component),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(SqlDialect::Postgres.placeholder(3), "$3");
        assert_eq!(SqlDialect::Mysql.placeholder(3), "?");
        assert_eq!(SqlDialect::Sqlite.placeholder(1), "?");
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(SqlDialect::Mysql.quote_ident("order"), "`order`");
        assert_eq!(SqlDialect::Postgres.quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(SqlDialect::Sqlite.quote_ident("name"), "\"name\"");
    }

    #[test]
    fn test_endpoint_debug_hides_password() {
        let endpoint = HttpEndpoint {
            host: "http://fe".into(),
            port: "8030".into(),
            user: "root".into(),
            password: "secret".into(),
            database: "db".into(),
        };
        assert_eq!(endpoint.base_url(), "http://fe:8030");
        assert!(!format!("{:?}", endpoint).contains("secret"));
        assert!(Connection::Http(endpoint).into_sql().is_err());
    }
}
