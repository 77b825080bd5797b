//! CSV file sink

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sluice_common::{ComponentConfig, ParamSpec, Record};
use sluice_engine::component::{Datasource, Sink};
use sluice_engine::{FrozenSchema, RunId};
use std::fs::File;
use tracing::debug;

/// Writes records as CSV rows.
///
/// The header holds the external column names in schema order; each row
/// looks values up by in-pipeline key. Missing values are written empty.
#[derive(Default)]
pub struct CsvSink {
    writer: Option<csv::Writer<File>>,
    keys: Vec<String>,
    rows: u64,
}

impl CsvSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params() -> Vec<ParamSpec> {
        vec![
            ParamSpec::optional("file_name", "name of a new output file"),
            ParamSpec::optional("file_ext", "output file extension").with_default("csv"),
            ParamSpec::optional("file_path", "output file path"),
        ]
    }
}

#[async_trait]
impl Sink for CsvSink {
    async fn open(
        &mut self,
        config: &ComponentConfig,
        schema: FrozenSchema,
        _datasource: Option<Box<dyn Datasource>>,
    ) -> Result<()> {
        let path = config
            .require("file_path")
            .context("csv sink needs file_path or file_name")?;
        let file = File::create(path).with_context(|| format!("failed to create {}", path))?;
        let mut writer = csv::Writer::from_writer(file);

        if !schema.is_empty() {
            writer.write_record(schema.external_names())?;
            writer.flush()?;
        }
        self.keys = schema.keys().map(str::to_string).collect();
        self.writer = Some(writer);
        debug!(path = %path, columns = self.keys.len(), "CSV sink opened");
        Ok(())
    }

    async fn write(&mut self, _run_id: &RunId, batch: &[Record]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow!("csv sink is not open"))?;

        for record in batch {
            let row = self.keys.iter().map(|key| {
                record
                    .get(key)
                    .map(ToString::to_string)
                    .unwrap_or_default()
            });
            writer.write_record(row).context("failed to write row")?;
        }
        writer.flush().context("failed to flush csv output")?;
        self.rows += batch.len() as u64;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            debug!(rows = self.rows, "CSV sink closed");
        }
        Ok(())
    }
}
