//! SQL query source
//!
//! The query runs on a background task that streams rows into a small
//! channel, so a slow pipeline applies backpressure to the fetch.

use crate::sql::{column_names, decode_row};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use sluice_common::{ComponentConfig, ParamSpec, Record};
use sluice_engine::component::{require_datasource, Datasource, Source};
use sluice_engine::SchemaMapping;
use sqlx::any::AnyRow;
use sqlx::AnyPool;
use sqlx::{Column, Executor as SqlxExecutor};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const ROW_BUFFER: usize = 64;

#[derive(Default)]
pub struct SqlSource {
    datasource: Option<Box<dyn Datasource>>,
    rows: Option<mpsc::Receiver<Result<AnyRow>>>,
    pending: Option<AnyRow>,
    columns: Vec<String>,
    fetcher: Option<JoinHandle<()>>,
}

impl SqlSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params() -> Vec<ParamSpec> {
        vec![ParamSpec::required("query", "SELECT statement to read")]
    }
}

fn spawn_fetch(pool: AnyPool, query: String) -> (mpsc::Receiver<Result<AnyRow>>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(ROW_BUFFER);
    let handle = tokio::spawn(async move {
        let mut rows = sqlx::query(&query).fetch(&pool);
        while let Some(row) = rows.next().await {
            let failed = row.is_err();
            if tx.send(row.map_err(anyhow::Error::from)).await.is_err() || failed {
                break;
            }
        }
    });
    (rx, handle)
}

/// Column names of a query that returned no rows
async fn describe_columns(pool: &AnyPool, query: &str) -> Vec<String> {
    match pool.describe(query).await {
        Ok(described) => described
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect(),
        Err(e) => {
            warn!(error = %e, "Could not describe query columns");
            Vec::new()
        },
    }
}

#[async_trait]
impl Source for SqlSource {
    async fn open(
        &mut self,
        config: &ComponentConfig,
        datasource: Option<Box<dyn Datasource>>,
    ) -> Result<()> {
        let datasource = require_datasource(datasource, "sql source")?;
        let connection = datasource.connection();
        self.datasource = Some(datasource);

        let query = config.require("query")?.to_string();
        let sql = connection?.into_sql()?;
        let (mut rows, fetcher) = spawn_fetch(sql.pool.clone(), query.clone());
        self.fetcher = Some(fetcher);

        match rows.recv().await {
            Some(Ok(row)) => {
                self.columns = column_names(&row);
                self.pending = Some(row);
            },
            Some(Err(e)) => return Err(e.context("query failed")),
            None => self.columns = describe_columns(&sql.pool, &query).await,
        }
        debug!(dialect = %sql.dialect, columns = self.columns.len(), "SQL source opened");

        self.rows = Some(rows);
        Ok(())
    }

    fn columns(&self) -> SchemaMapping {
        SchemaMapping::identity(self.columns.iter().cloned())
    }

    async fn read(&mut self) -> Result<Option<Record>> {
        if let Some(row) = self.pending.take() {
            return decode_row(&row).map(Some);
        }

        let rows = self
            .rows
            .as_mut()
            .ok_or_else(|| anyhow!("sql source is not open"))?;
        match rows.recv().await {
            Some(row) => {
                let row = row.context("failed to fetch row")?;
                decode_row(&row).map(Some)
            },
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(fetcher) = self.fetcher.take() {
            fetcher.abort();
        }
        self.rows = None;
        self.pending = None;
        if let Some(mut datasource) = self.datasource.take() {
            datasource.close().await?;
        }
        Ok(())
    }
}
