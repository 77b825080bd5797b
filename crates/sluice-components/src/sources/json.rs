//! JSON array source
//!
//! Reads a top-level array of objects one element at a time. The columns
//! are the union of keys found in the first `keys_sample_rows` objects.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use sluice_common::{ComponentConfig, ParamSpec, Record};
use sluice_engine::component::{Datasource, Source};
use sluice_engine::SchemaMapping;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use tracing::debug;

/// Default number of objects sampled for keys
pub const DEFAULT_KEYS_SAMPLE_ROWS: usize = 100;

/// Streaming reader over the elements of a JSON array
pub struct JsonArrayReader<R> {
    reader: R,
    started: bool,
    finished: bool,
}

impl<R: BufRead> JsonArrayReader<R> {
    /// Consume the opening `[`
    pub fn new(mut reader: R) -> Result<Self> {
        match next_significant(&mut reader)? {
            Some(b'[') => {
                reader.consume(1);
                Ok(Self {
                    reader,
                    started: false,
                    finished: false,
                })
            },
            Some(other) => bail!(
                "expected a JSON array starting with '[', found '{}'",
                char::from(other)
            ),
            None => bail!("expected a JSON array starting with '[', found end of file"),
        }
    }

    /// Next object, or `None` after the closing `]`
    pub fn next_object(&mut self) -> Result<Option<serde_json::Map<String, serde_json::Value>>> {
        if self.finished {
            return Ok(None);
        }

        let mut byte = next_significant(&mut self.reader)?;
        if byte == Some(b']') {
            self.reader.consume(1);
            self.finished = true;
            return Ok(None);
        }

        if self.started {
            if byte != Some(b',') {
                return Err(unterminated(byte));
            }
            self.reader.consume(1);
            byte = next_significant(&mut self.reader)?;
        }
        if byte.is_none() || byte == Some(b']') {
            return Err(unterminated(byte));
        }

        let mut de = serde_json::Deserializer::from_reader(&mut self.reader);
        let object = serde_json::Map::deserialize(&mut de).context("invalid JSON object")?;
        self.started = true;
        Ok(Some(object))
    }
}

fn unterminated(found: Option<u8>) -> anyhow::Error {
    match found {
        Some(b) => anyhow!("expected ',' or ']' in JSON array, found '{}'", char::from(b)),
        None => anyhow!("unexpected end of file, JSON array not closed with ']'"),
    }
}

/// Skip whitespace and peek the next byte without consuming it
fn next_significant<R: BufRead>(reader: &mut R) -> Result<Option<u8>> {
    loop {
        let buf = reader.fill_buf()?;
        let Some(&byte) = buf.first() else {
            return Ok(None);
        };
        if byte.is_ascii_whitespace() {
            reader.consume(1);
        } else {
            return Ok(Some(byte));
        }
    }
}

#[derive(Default)]
pub struct JsonSource {
    reader: Option<JsonArrayReader<BufReader<File>>>,
    keys: BTreeSet<String>,
}

impl JsonSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params() -> Vec<ParamSpec> {
        vec![
            ParamSpec::optional("file_id", "stored input file id"),
            ParamSpec::optional("file_path", "input file path"),
            ParamSpec::optional("keys_sample_rows", "objects sampled for column keys, 0 for all")
                .with_default("100"),
        ]
    }
}

fn open_array(path: &str) -> Result<JsonArrayReader<BufReader<File>>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path))?;
    JsonArrayReader::new(BufReader::new(file)).with_context(|| format!("failed to read {}", path))
}

#[async_trait]
impl Source for JsonSource {
    async fn open(
        &mut self,
        config: &ComponentConfig,
        _datasource: Option<Box<dyn Datasource>>,
    ) -> Result<()> {
        let path = config
            .require("file_path")
            .context("json source needs file_path or file_id")?;
        let sample: usize = config
            .parse("keys_sample_rows")?
            .unwrap_or(DEFAULT_KEYS_SAMPLE_ROWS);

        let mut sampler = open_array(path)?;
        let mut sampled = 0usize;
        while sample == 0 || sampled < sample {
            match sampler.next_object()? {
                Some(object) => self.keys.extend(object.into_iter().map(|(k, _)| k)),
                None => break,
            }
            sampled += 1;
        }
        debug!(path = %path, sampled, keys = self.keys.len(), "JSON source sampled keys");

        self.reader = Some(open_array(path)?);
        Ok(())
    }

    fn columns(&self) -> SchemaMapping {
        SchemaMapping::identity(self.keys.iter().cloned())
    }

    async fn read(&mut self) -> Result<Option<Record>> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| anyhow!("json source is not open"))?;
        Ok(reader.next_object()?.map(Record::from))
    }

    async fn close(&mut self) -> Result<()> {
        self.reader = None;
        Ok(())
    }
}
