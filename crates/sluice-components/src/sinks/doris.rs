//! Apache Doris stream-load sink

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sluice_common::{ComponentConfig, ParamSpec, Record};
use sluice_engine::component::{require_datasource, Datasource, HttpEndpoint, Sink};
use sluice_engine::{FrozenSchema, RunId};
use std::time::Duration;
use tracing::{debug, info};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Subset of the stream-load response we act on
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StreamLoadResponse {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    number_loaded_rows: i64,
}

/// Loads each batch with one HTTP stream-load request.
///
/// Every schema column is sent under its external name, null when the
/// record lacks it.
#[derive(Default)]
pub struct DorisSink {
    datasource: Option<Box<dyn Datasource>>,
    client: Option<Client>,
    endpoint: Option<HttpEndpoint>,
    url: String,
    schema: FrozenSchema,
}

impl DorisSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params() -> Vec<ParamSpec> {
        vec![ParamSpec::required("table", "target table")]
    }

    fn body(&self, batch: &[Record]) -> Vec<serde_json::Value> {
        batch
            .iter()
            .map(|record| {
                let row: serde_json::Map<_, _> = self
                    .schema
                    .iter()
                    .map(|(key, column)| {
                        let value = record
                            .get(key)
                            .map_or(serde_json::Value::Null, |v| v.to_json());
                        (column.to_string(), value)
                    })
                    .collect();
                serde_json::Value::Object(row)
            })
            .collect()
    }
}

/// Stream-load URL for `table` on `endpoint`
pub fn stream_load_url(endpoint: &HttpEndpoint, table: &str) -> String {
    format!(
        "{}/api/{}/{}/_stream_load",
        endpoint.base_url(),
        endpoint.database,
        table
    )
}

#[async_trait]
impl Sink for DorisSink {
    async fn open(
        &mut self,
        config: &ComponentConfig,
        schema: FrozenSchema,
        datasource: Option<Box<dyn Datasource>>,
    ) -> Result<()> {
        let datasource = require_datasource(datasource, "doris sink")?;
        let connection = datasource.connection();
        self.datasource = Some(datasource);

        let table = config.require("table")?;
        if schema.is_empty() {
            bail!("doris sink: no columns to load into '{}'", table);
        }
        let endpoint = connection?.into_http()?;
        self.url = stream_load_url(&endpoint, table);
        self.client = Some(
            Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .context("failed to build HTTP client")?,
        );
        self.endpoint = Some(endpoint);
        self.schema = schema;
        info!(url = %self.url, "Doris sink opened");
        Ok(())
    }

    async fn write(&mut self, run_id: &RunId, batch: &[Record]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let body = self.body(batch);
        let (Some(client), Some(endpoint)) = (self.client.as_ref(), self.endpoint.as_ref()) else {
            return Err(anyhow!("doris sink is not open"));
        };

        let label = format!("{}_{}", run_id, chrono::Utc::now().timestamp_micros());
        let response = client
            .put(&self.url)
            .basic_auth(&endpoint.user, Some(&endpoint.password))
            .header("format", "json")
            .header("strip_outer_array", "true")
            .header("Expect", "100-continue")
            .header("label", &label)
            .json(&body)
            .send()
            .await
            .context("stream load request failed")?;

        let status = response.status();
        let text = response
            .text()
            .await
            .context("failed to read stream load response")?;
        if status != StatusCode::OK {
            bail!("stream load failed with status {}: {}", status, text);
        }

        let parsed: StreamLoadResponse =
            serde_json::from_str(&text).context("failed to parse stream load response")?;
        if parsed.status != "Success" {
            bail!("stream load {} failed: {} {}", label, parsed.status, parsed.message);
        }
        debug!(label = %label, rows = parsed.number_loaded_rows, "Stream load succeeded");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.client = None;
        self.endpoint = None;
        if let Some(mut datasource) = self.datasource.take() {
            datasource.close().await?;
        }
        Ok(())
    }
}
