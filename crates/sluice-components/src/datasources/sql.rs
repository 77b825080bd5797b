//! SQL datasources backed by a sqlx `AnyPool`

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use sluice_common::{ComponentConfig, ParamSpec};
use sluice_engine::component::{Connection, Datasource, SqlConnection, SqlDialect};
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use std::time::Duration;
use tracing::{debug, info};

/// Pool sizing read from datasource parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl PoolSettings {
    fn from_config(config: &ComponentConfig, dialect: SqlDialect) -> Result<Self> {
        let default_max = match dialect {
            // A single connection keeps `:memory:` databases coherent
            SqlDialect::Sqlite => 1,
            SqlDialect::Postgres | SqlDialect::Mysql => 5,
        };
        Ok(Self {
            max_connections: config.parse("max_connections")?.unwrap_or(default_max),
            connect_timeout_secs: config.parse("connect_timeout")?.unwrap_or(30),
        })
    }
}

/// Datasource yielding a pooled connection of one SQL dialect
pub struct SqlDatasource {
    dialect: SqlDialect,
    pool: Option<AnyPool>,
}

impl SqlDatasource {
    pub fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            pool: None,
        }
    }

    /// Parameters declared for `dialect`
    pub fn params(dialect: SqlDialect) -> Vec<ParamSpec> {
        let pool = [
            ParamSpec::optional("max_connections", "maximum pooled connections"),
            ParamSpec::optional("connect_timeout", "seconds to wait for a connection")
                .with_default("30"),
        ];

        let mut params = match dialect {
            SqlDialect::Sqlite => vec![
                ParamSpec::optional("file_id", "stored database file id"),
                ParamSpec::optional("file_path", "database file path, or :memory:"),
            ],
            SqlDialect::Postgres => vec![
                ParamSpec::required("host", "server host"),
                ParamSpec::optional("port", "server port").with_default("5432"),
                ParamSpec::required("user", "user name"),
                ParamSpec::optional("password", "password"),
                ParamSpec::required("database", "database name"),
                ParamSpec::optional("sslmode", "TLS mode").with_default("disable"),
            ],
            SqlDialect::Mysql => vec![
                ParamSpec::required("host", "server host"),
                ParamSpec::optional("port", "server port").with_default("3306"),
                ParamSpec::required("user", "user name"),
                ParamSpec::optional("password", "password"),
                ParamSpec::required("database", "database name"),
            ],
        };
        params.extend(pool);
        params
    }
}

/// sqlx connection URL for the given parameters
pub fn connection_url(dialect: SqlDialect, config: &ComponentConfig) -> Result<String> {
    match dialect {
        SqlDialect::Sqlite => {
            let path = config
                .require("file_path")
                .context("sqlite datasource needs file_path or file_id")?;
            if path == ":memory:" {
                Ok("sqlite::memory:".to_string())
            } else {
                Ok(format!("sqlite://{}?mode=rwc", path))
            }
        },
        SqlDialect::Postgres | SqlDialect::Mysql => {
            let scheme = match dialect {
                SqlDialect::Postgres => "postgres",
                _ => "mysql",
            };
            let default_port = match dialect {
                SqlDialect::Postgres => "5432",
                _ => "3306",
            };
            let host = config.require("host")?;
            let port = config.get_or("port", default_port);
            let database = config.require("database")?;

            let mut url = Url::parse(&format!("{}://{}:{}/{}", scheme, host, port, database))
                .with_context(|| format!("invalid {} address {}:{}", dialect, host, port))?;
            url.set_username(config.require("user")?)
                .map_err(|()| anyhow!("cannot set user on {} url", dialect))?;
            if let Some(password) = config.get("password").filter(|p| !p.is_empty()) {
                url.set_password(Some(password))
                    .map_err(|()| anyhow!("cannot set password on {} url", dialect))?;
            }
            if dialect == SqlDialect::Postgres {
                url.query_pairs_mut()
                    .append_pair("sslmode", config.get_or("sslmode", "disable"));
            }
            Ok(url.to_string())
        },
    }
}

#[async_trait]
impl Datasource for SqlDatasource {
    async fn init(&mut self, config: &ComponentConfig) -> Result<()> {
        sqlx::any::install_default_drivers();

        let url = connection_url(self.dialect, config)?;
        let settings = PoolSettings::from_config(config, self.dialect)?;
        let pool = AnyPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .connect(&url)
            .await
            .with_context(|| format!("failed to connect to {} database", self.dialect))?;

        info!(
            dialect = %self.dialect,
            max_connections = settings.max_connections,
            "Database connection pool created"
        );
        self.pool = Some(pool);
        Ok(())
    }

    fn connection(&self) -> Result<Connection> {
        let pool = self
            .pool
            .clone()
            .ok_or_else(|| anyhow!("{} datasource is not initialized", self.dialect))?;
        Ok(Connection::Sql(SqlConnection {
            pool,
            dialect: self.dialect,
        }))
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
            debug!(dialect = %self.dialect, "Database connection pool closed");
        }
        Ok(())
    }
}
