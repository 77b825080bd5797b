use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sluice_common::{ComponentConfig, ParamSpec, Record};
use sluice_engine::component::Processor;
use sluice_engine::SchemaMapping;
use std::collections::BTreeMap;

/// Renames columns from a `{"old": "new"}` mapping.
///
/// Renames are applied simultaneously, so `{"a":"b","b":"a"}` swaps the two
/// columns. Keys missing from a record are ignored.
#[derive(Default)]
pub struct RenameColumn {
    mapping: BTreeMap<String, String>,
}

impl RenameColumn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params() -> Vec<ParamSpec> {
        vec![ParamSpec::required(
            "mapping",
            "JSON object from old column name to new name",
        )]
    }
}

fn parse_mapping(config: &ComponentConfig) -> Result<BTreeMap<String, String>> {
    let mapping: BTreeMap<String, String> = config
        .parse_json("mapping")
        .context("rename_column: 'mapping' must be a JSON object of strings")?;
    if mapping.is_empty() {
        bail!("rename_column: 'mapping' cannot be empty");
    }
    Ok(mapping)
}

#[async_trait]
impl Processor for RenameColumn {
    fn handle_columns(&self, config: &ComponentConfig, columns: SchemaMapping) -> SchemaMapping {
        match parse_mapping(config) {
            Ok(mapping) => columns.renamed(&mapping),
            // Reported by open
            Err(_) => columns,
        }
    }

    async fn open(&mut self, config: &ComponentConfig) -> Result<()> {
        self.mapping = parse_mapping(config)?;
        Ok(())
    }

    async fn process(&mut self, mut record: Record) -> Result<Option<Record>> {
        let moved: Vec<_> = self
            .mapping
            .iter()
            .filter_map(|(from, to)| record.remove(from).map(|value| (to.clone(), value)))
            .collect();
        for (to, value) in moved {
            record.insert(to, value);
        }
        Ok(Some(record))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
