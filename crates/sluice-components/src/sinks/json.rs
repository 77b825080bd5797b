//! JSON file sink

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sluice_common::{ComponentConfig, ParamSpec, Record};
use sluice_engine::component::{Datasource, Sink};
use sluice_engine::{FrozenSchema, RunId};
use std::fs::File;
use std::io::{BufWriter, Write};
use tracing::debug;

/// Writes every batch into a single JSON array of objects.
///
/// Keys known to the schema are renamed to their external names; other keys
/// are written as they are.
#[derive(Default)]
pub struct JsonSink {
    out: Option<BufWriter<File>>,
    schema: FrozenSchema,
    rows: u64,
}

impl JsonSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params() -> Vec<ParamSpec> {
        vec![
            ParamSpec::optional("file_name", "name of a new output file"),
            ParamSpec::optional("file_ext", "output file extension").with_default("json"),
            ParamSpec::optional("file_path", "output file path"),
        ]
    }

    fn to_object(&self, record: &Record) -> serde_json::Map<String, serde_json::Value> {
        record
            .iter()
            .map(|(key, value)| {
                let name = self.schema.get(key).unwrap_or(key.as_str());
                (name.to_string(), value.to_json())
            })
            .collect()
    }
}

#[async_trait]
impl Sink for JsonSink {
    async fn open(
        &mut self,
        config: &ComponentConfig,
        schema: FrozenSchema,
        _datasource: Option<Box<dyn Datasource>>,
    ) -> Result<()> {
        let path = config
            .require("file_path")
            .context("json sink needs file_path or file_name")?;
        let file = File::create(path).with_context(|| format!("failed to create {}", path))?;
        let mut out = BufWriter::new(file);
        out.write_all(b"[")?;

        self.schema = schema;
        self.out = Some(out);
        debug!(path = %path, "JSON sink opened");
        Ok(())
    }

    async fn write(&mut self, _run_id: &RunId, batch: &[Record]) -> Result<()> {
        let objects: Vec<_> = batch.iter().map(|r| self.to_object(r)).collect();
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| anyhow!("json sink is not open"))?;

        for object in objects {
            let separator: &[u8] = if self.rows == 0 { b"\n" } else { b",\n" };
            out.write_all(separator)?;
            serde_json::to_writer(&mut *out, &object).context("failed to encode record")?;
            self.rows += 1;
        }
        out.flush().context("failed to flush json output")?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut out) = self.out.take() {
            let end: &[u8] = if self.rows == 0 { b"]\n" } else { b"\n]\n" };
            out.write_all(end)?;
            out.flush()?;
            debug!(rows = self.rows, "JSON sink closed");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use sluice_common::Value;
    use sluice_engine::SchemaMapping;
    use tempfile::TempDir;

    async fn open_sink(path: &std::path::Path, schema: SchemaMapping) -> JsonSink {
        let config = ComponentConfig::from_pairs([("file_path", path.to_string_lossy())]);
        let mut sink = JsonSink::new();
        sink.open(&config, schema.freeze(), None).await.unwrap();
        sink
    }

    #[tokio::test]
    async fn test_one_array_across_batches() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");

        let mut schema = SchemaMapping::new();
        schema.insert("id", "ID");
        let mut sink = open_sink(&path, schema).await;

        let run = RunId::new("r");
        let a: Record = [("id", Value::Int(1)), ("extra", Value::Null)].into_iter().collect();
        let b: Record = [("id", Value::Int(2))].into_iter().collect();
        let c: Record = [("id", Value::Int(3))].into_iter().collect();
        sink.write(&run, &[a, b]).await.unwrap();
        sink.write(&run, &[c]).await.unwrap();
        sink.close().await.unwrap();

        let parsed: Vec<serde_json::Value> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            parsed,
            vec![
                serde_json::json!({"ID": 1, "extra": null}),
                serde_json::json!({"ID": 2}),
                serde_json::json!({"ID": 3}),
            ]
        );
    }

    #[tokio::test]
    async fn test_no_records_is_empty_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.json");

        let mut sink = open_sink(&path, SchemaMapping::new()).await;
        sink.close().await.unwrap();

        let parsed: Vec<serde_json::Value> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(parsed.is_empty());
    }
}
