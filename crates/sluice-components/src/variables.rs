//! Variables resolved from a read-only SQL query

use crate::sql::{decode_value, ensure_read_only};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sluice_common::{ComponentConfig, ParamSpec};
use sluice_engine::component::{require_datasource, Connection, Datasource, Variable};

/// Yields the first column of the first row as text
#[derive(Default)]
pub struct SqlVariable;

impl SqlVariable {
    pub fn new() -> Self {
        Self
    }

    pub fn params() -> Vec<ParamSpec> {
        vec![ParamSpec::required("query", "SELECT returning the value")]
    }
}

async fn query_first(config: &ComponentConfig, connection: Result<Connection>) -> Result<String> {
    let query = config.require("query")?;
    ensure_read_only(query)?;

    let sql = connection?.into_sql()?;
    let row = sqlx::query(query)
        .fetch_optional(&sql.pool)
        .await
        .context("variable query failed")?;
    let Some(row) = row else {
        bail!("variable query returned no rows");
    };

    let value = decode_value(&row, 0)?;
    if value.is_null() {
        bail!("variable query returned NULL");
    }
    Ok(value.to_string())
}

#[async_trait]
impl Variable for SqlVariable {
    async fn get(
        &mut self,
        config: &ComponentConfig,
        datasource: Option<Box<dyn Datasource>>,
    ) -> Result<String> {
        let mut datasource = require_datasource(datasource, "sql variable")?;
        let connection = datasource.connection();
        let value = query_first(config, connection).await;
        let closed = datasource.close().await;
        let value = value?;
        closed?;
        Ok(value)
    }
}
