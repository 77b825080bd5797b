//! CSV file source

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use sluice_common::{ComponentConfig, ParamSpec, Record, Value};
use sluice_engine::component::{Datasource, Source};
use sluice_engine::SchemaMapping;
use std::fs::File;
use std::io::BufReader;
use tracing::debug;

/// Reads a delimited file; the header row names the columns
#[derive(Default)]
pub struct CsvSource {
    reader: Option<csv::Reader<BufReader<File>>>,
    headers: Vec<String>,
    row: csv::StringRecord,
}

impl CsvSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params() -> Vec<ParamSpec> {
        vec![
            ParamSpec::optional("file_id", "stored input file id"),
            ParamSpec::optional("file_path", "input file path"),
            ParamSpec::optional("delimiter", "field delimiter").with_default(","),
        ]
    }
}

/// Single-byte delimiter; `\t` spells a tab
pub fn parse_delimiter(raw: &str) -> Result<u8> {
    let raw = if raw == "\\t" { "\t" } else { raw };
    match raw.as_bytes() {
        [b] => Ok(*b),
        [] => Ok(b','),
        _ => bail!("delimiter must be a single ASCII character, got '{}'", raw),
    }
}

#[async_trait]
impl Source for CsvSource {
    async fn open(
        &mut self,
        config: &ComponentConfig,
        _datasource: Option<Box<dyn Datasource>>,
    ) -> Result<()> {
        let path = config
            .require("file_path")
            .context("csv source needs file_path or file_id")?;
        let delimiter = parse_delimiter(config.get_or("delimiter", ","))?;

        let file = File::open(path).with_context(|| format!("failed to open {}", path))?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(BufReader::new(file));

        let headers = reader
            .headers()
            .with_context(|| format!("failed to read header of {}", path))?;
        if headers.is_empty() {
            bail!("{} is empty", path);
        }
        self.headers = headers.iter().map(str::to_string).collect();
        debug!(path = %path, columns = self.headers.len(), "CSV source opened");

        self.reader = Some(reader);
        Ok(())
    }

    fn columns(&self) -> SchemaMapping {
        SchemaMapping::identity(self.headers.iter().cloned())
    }

    async fn read(&mut self) -> Result<Option<Record>> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| anyhow!("csv source is not open"))?;

        if !reader.read_record(&mut self.row)? {
            return Ok(None);
        }

        if self.row.len() != self.headers.len() {
            let line = self.row.position().map_or(0, |p| p.line());
            bail!(
                "line {}: expected {} fields, found {}",
                line,
                self.headers.len(),
                self.row.len()
            );
        }

        let record = self
            .headers
            .iter()
            .zip(self.row.iter())
            .map(|(name, field)| (name.clone(), Value::from(field)))
            .collect();
        Ok(Some(record))
    }

    async fn close(&mut self) -> Result<()> {
        self.reader = None;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config_for(file: &NamedTempFile) -> ComponentConfig {
        ComponentConfig::from_pairs([("file_path", file.path().to_string_lossy().to_string())])
    }

    fn csv_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_reads_rows_by_header() {
        let file = csv_file("name,age\nada,36\ngrace,45\n");
        let mut source = CsvSource::new();
        source.open(&config_for(&file), None).await.unwrap();

        let columns: Vec<String> = source.columns().iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(columns, vec!["age", "name"]);

        let first = source.read().await.unwrap().unwrap();
        assert_eq!(first.get("name"), Some(&Value::from("ada")));
        assert_eq!(first.get("age"), Some(&Value::from("36")));
        assert!(source.read().await.unwrap().is_some());
        assert!(source.read().await.unwrap().is_none());
        source.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_custom_delimiter() {
        let file = csv_file("a;b\n1;2\n");
        let mut config = config_for(&file);
        config.insert("delimiter", ";");

        let mut source = CsvSource::new();
        source.open(&config, None).await.unwrap();
        let row = source.read().await.unwrap().unwrap();
        assert_eq!(row.get("b"), Some(&Value::from("2")));
    }

    #[tokio::test]
    async fn test_empty_file_fails_open() {
        let file = csv_file("");
        let err = CsvSource::new()
            .open(&config_for(&file), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("is empty"), "{}", err);
    }

    #[tokio::test]
    async fn test_field_count_mismatch_names_line() {
        let file = csv_file("a,b\n1,2\n3\n");
        let mut source = CsvSource::new();
        source.open(&config_for(&file), None).await.unwrap();

        assert!(source.read().await.unwrap().is_some());
        let err = source.read().await.unwrap_err();
        assert_eq!(err.to_string(), "line 3: expected 2 fields, found 1");
    }

    #[test]
    fn test_parse_delimiter() {
        assert_eq!(parse_delimiter("\\t").unwrap(), b'\t');
        assert_eq!(parse_delimiter("|").unwrap(), b'|');
        assert!(parse_delimiter("::").is_err());
    }
}
