//! One-shot SQL statements run before or after the data flow

use anyhow::{Context, Result};
use async_trait::async_trait;
use sluice_common::{ComponentConfig, ParamSpec};
use sluice_engine::component::{require_datasource, Datasource, Executor};
use tracing::info;

/// Executes `sql` once at `open`; `close` releases the datasource
#[derive(Default)]
pub struct SqlExecutor {
    datasource: Option<Box<dyn Datasource>>,
}

impl SqlExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params() -> Vec<ParamSpec> {
        vec![ParamSpec::required("sql", "statement to execute")]
    }
}

#[async_trait]
impl Executor for SqlExecutor {
    async fn open(
        &mut self,
        config: &ComponentConfig,
        datasource: Option<Box<dyn Datasource>>,
    ) -> Result<()> {
        let datasource = require_datasource(datasource, "sql executor")?;
        let connection = datasource.connection();
        self.datasource = Some(datasource);

        let statement = config.require("sql")?;
        let sql = connection?.into_sql()?;
        let result = sqlx::raw_sql(statement)
            .execute(&sql.pool)
            .await
            .context("sql executor: statement failed")?;
        info!(
            dialect = %sql.dialect,
            rows_affected = result.rows_affected(),
            "Executed statement"
        );
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut datasource) = self.datasource.take() {
            datasource.close().await?;
        }
        Ok(())
    }
}
