//! SQL table sink

use crate::sql::bind_value;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use sluice_common::{ComponentConfig, ParamSpec, Record};
use sluice_engine::component::{require_datasource, Datasource, Sink, SqlConnection, SqlDialect};
use sluice_engine::{FrozenSchema, RunId};
use tracing::debug;

/// Largest number of bind parameters one statement may carry
fn max_bind_params(dialect: SqlDialect) -> usize {
    match dialect {
        SqlDialect::Sqlite => 32_766,
        SqlDialect::Postgres | SqlDialect::Mysql => 65_535,
    }
}

/// `INSERT INTO table (cols) VALUES (..), (..)` for `rows` rows
pub fn insert_statement(
    dialect: SqlDialect,
    table: &str,
    columns: &[String],
    rows: usize,
) -> String {
    let quoted: Vec<String> = columns.iter().map(|c| dialect.quote_ident(c)).collect();
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ",
        dialect.quote_ident(table),
        quoted.join(", ")
    );

    let mut index = 0;
    for row in 0..rows {
        if row > 0 {
            sql.push_str(", ");
        }
        let group: Vec<String> = columns
            .iter()
            .map(|_| {
                index += 1;
                dialect.placeholder(index)
            })
            .collect();
        sql.push('(');
        sql.push_str(&group.join(", "));
        sql.push(')');
    }
    sql
}

/// Inserts each batch in one transaction.
///
/// Columns are the schema's external names; values are taken by in-pipeline
/// key and missing keys insert NULL. Batches larger than the dialect's bind
/// parameter limit are split into several statements inside the same
/// transaction.
#[derive(Default)]
pub struct SqlSink {
    datasource: Option<Box<dyn Datasource>>,
    connection: Option<SqlConnection>,
    table: String,
    keys: Vec<String>,
    columns: Vec<String>,
}

impl SqlSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params() -> Vec<ParamSpec> {
        vec![ParamSpec::required("table", "target table")]
    }
}

#[async_trait]
impl Sink for SqlSink {
    async fn open(
        &mut self,
        config: &ComponentConfig,
        schema: FrozenSchema,
        datasource: Option<Box<dyn Datasource>>,
    ) -> Result<()> {
        let datasource = require_datasource(datasource, "sql sink")?;
        let connection = datasource.connection();
        self.datasource = Some(datasource);

        self.table = config.require("table")?.to_string();
        if schema.is_empty() {
            bail!("sql sink: no columns to insert into '{}'", self.table);
        }
        self.keys = schema.keys().map(str::to_string).collect();
        self.columns = schema.external_names().map(str::to_string).collect();
        self.connection = Some(connection?.into_sql()?);
        Ok(())
    }

    async fn write(&mut self, _run_id: &RunId, batch: &[Record]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let conn = self
            .connection
            .as_ref()
            .ok_or_else(|| anyhow!("sql sink is not open"))?;

        let rows_per_statement = (max_bind_params(conn.dialect) / self.keys.len()).max(1);
        let mut tx = conn
            .pool
            .begin()
            .await
            .context("failed to begin transaction")?;

        for chunk in batch.chunks(rows_per_statement) {
            let sql = insert_statement(conn.dialect, &self.table, &self.columns, chunk.len());
            let mut query = sqlx::query(&sql);
            for record in chunk {
                for key in &self.keys {
                    query = bind_value(query, record.get(key));
                }
            }
            query
                .execute(&mut *tx)
                .await
                .with_context(|| format!("failed to insert into '{}'", self.table))?;
        }

        tx.commit().await.context("failed to commit batch")?;
        debug!(table = %self.table, rows = batch.len(), "Inserted batch");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.connection = None;
        if let Some(mut datasource) = self.datasource.take() {
            datasource.close().await?;
        }
        Ok(())
    }
}
