use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sluice_common::{ComponentConfig, ParamSpec, Record};
use sluice_engine::component::Processor;
use sluice_engine::SchemaMapping;
use std::collections::BTreeSet;

/// Keeps only the listed columns; listed columns a record lacks are skipped
#[derive(Default)]
pub struct SelectColumns {
    keep: BTreeSet<String>,
}

impl SelectColumns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params() -> Vec<ParamSpec> {
        vec![ParamSpec::required("columns", "JSON array of columns to keep")]
    }
}

fn parse_columns(config: &ComponentConfig) -> Result<BTreeSet<String>> {
    let columns: Vec<String> = config
        .parse_json("columns")
        .context("select_columns: 'columns' must be a JSON array of strings")?;
    if columns.is_empty() {
        bail!("select_columns: 'columns' cannot be empty");
    }
    Ok(columns.into_iter().collect())
}

#[async_trait]
impl Processor for SelectColumns {
    fn handle_columns(&self, config: &ComponentConfig, columns: SchemaMapping) -> SchemaMapping {
        match parse_columns(config) {
            Ok(keep) => columns.retained(&keep),
            Err(_) => columns,
        }
    }

    async fn open(&mut self, config: &ComponentConfig) -> Result<()> {
        self.keep = parse_columns(config)?;
        Ok(())
    }

    async fn process(&mut self, record: Record) -> Result<Option<Record>> {
        Ok(Some(
            record
                .into_iter()
                .filter(|(key, _)| self.keep.contains(key))
                .collect(),
        ))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
