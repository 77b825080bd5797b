use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use sluice_common::{ComponentConfig, ParamSpec, Record, Value};
use sluice_engine::component::Processor;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    Integer,
    Float,
    String,
    Boolean,
}

impl FromStr for TargetType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "integer" | "int" => Ok(TargetType::Integer),
            "float" | "double" => Ok(TargetType::Float),
            "string" => Ok(TargetType::String),
            "boolean" | "bool" => Ok(TargetType::Boolean),
            other => bail!("unsupported target type '{}'", other),
        }
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

impl TargetType {
    /// Convert through the value's text form
    pub fn convert(self, value: &Value) -> Result<Value> {
        let text = value.to_string();
        let converted = match self {
            TargetType::Integer => text.parse::<i64>().map(Value::Int).map_err(|e| anyhow!(e)),
            TargetType::Float => text.parse::<f64>().map(Value::Float).map_err(|e| anyhow!(e)),
            TargetType::String => Ok(Value::Text(text.clone())),
            TargetType::Boolean => parse_bool(&text)
                .map(Value::Bool)
                .ok_or_else(|| anyhow!("not a boolean")),
        };
        converted.map_err(|e| e.context(format!("cannot convert '{}' to {:?}", text, self)))
    }
}

/// Converts one column to a target type; missing and null values pass through
pub struct ConvertType {
    column: String,
    target: TargetType,
}

impl Default for ConvertType {
    fn default() -> Self {
        Self {
            column: String::new(),
            target: TargetType::String,
        }
    }
}

impl ConvertType {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params() -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("column", "column to convert"),
            ParamSpec::required("type", "integer, float, string or boolean"),
        ]
    }
}

#[async_trait]
impl Processor for ConvertType {
    async fn open(&mut self, config: &ComponentConfig) -> Result<()> {
        self.column = config.require("column")?.to_string();
        self.target = config
            .require("type")?
            .parse()
            .map_err(|e: anyhow::Error| e.context("convert_type"))?;
        Ok(())
    }

    async fn process(&mut self, mut record: Record) -> Result<Option<Record>> {
        if let Some(value) = record.get_mut(&self.column) {
            if !value.is_null() {
                *value = self.target.convert(value).map_err(|e| {
                    e.context(format!("convert_type: column '{}'", self.column))
                })?;
            }
        }
        Ok(Some(record))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
