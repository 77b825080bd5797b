use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use sluice_common::{ComponentConfig, ParamSpec, Record, Value};
use sluice_engine::component::Processor;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl FromStr for Operator {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "=" | "==" => Ok(Operator::Eq),
            "!=" | "<>" => Ok(Operator::Ne),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Ge),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Le),
            other => bail!("unsupported operator '{}'", other),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
        };
        f.write_str(symbol)
    }
}

impl Operator {
    /// Compare numerically when both sides are numbers, otherwise as text.
    ///
    /// Text supports only equality operators.
    pub fn matches(self, left: &Value, right: &Value) -> Result<bool> {
        if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
            return Ok(match self {
                Operator::Eq => l == r,
                Operator::Ne => l != r,
                Operator::Gt => l > r,
                Operator::Ge => l >= r,
                Operator::Lt => l < r,
                Operator::Le => l <= r,
            });
        }

        let (l, r) = (left.to_string(), right.to_string());
        match self {
            Operator::Eq => Ok(l == r),
            Operator::Ne => Ok(l != r),
            _ => Err(anyhow!(
                "operator '{}' needs numbers, only '=', '==', '!=', '<>' compare text",
                self
            )),
        }
    }
}

/// Keeps records whose `column` compares true against `value`
pub struct FilterRows {
    column: String,
    operator: Operator,
    value: Value,
}

impl Default for FilterRows {
    fn default() -> Self {
        Self {
            column: String::new(),
            operator: Operator::Eq,
            value: Value::Null,
        }
    }
}

impl FilterRows {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params() -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("column", "column to compare"),
            ParamSpec::required("operator", "one of = == != <> > >= < <="),
            ParamSpec::required("value", "value to compare against"),
        ]
    }
}

#[async_trait]
impl Processor for FilterRows {
    async fn open(&mut self, config: &ComponentConfig) -> Result<()> {
        self.column = config.require("column")?.to_string();
        self.operator = config
            .require("operator")?
            .parse()
            .map_err(|e: anyhow::Error| e.context("filter_rows"))?;
        self.value = Value::from(config.get("value").unwrap_or_default());
        Ok(())
    }

    async fn process(&mut self, record: Record) -> Result<Option<Record>> {
        let Some(current) = record.get(&self.column) else {
            return Ok(None);
        };
        let keep = self.operator.matches(current, &self.value).map_err(|e| {
            e.context(format!(
                "filter_rows: cannot compare column '{}'",
                self.column
            ))
        })?;
        Ok(keep.then_some(record))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    async fn filter(operator: &str, value: &str) -> FilterRows {
        let mut processor = FilterRows::new();
        processor
            .open(&ComponentConfig::from_pairs([
                ("column", "age"),
                ("operator", operator),
                ("value", value),
            ]))
            .await
            .unwrap();
        processor
    }

    fn row(age: impl Into<Value>) -> Record {
        [("age", age.into())].into_iter().collect()
    }

    #[tokio::test]
    async fn test_numeric_comparison() {
        let mut gt = filter(">", "30").await;
        assert!(gt.process(row(45i64)).await.unwrap().is_some());
        assert!(gt.process(row("29")).await.unwrap().is_none());
        assert!(gt.process(row(30.5)).await.unwrap().is_some());

        let mut eq = filter("==", "3").await;
        assert!(eq.process(row("3.0")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_text_comparison() {
        let mut ne = filter("<>", "bob").await;
        assert!(ne.process(row("ada")).await.unwrap().is_some());
        assert!(ne.process(row("bob")).await.unwrap().is_none());

        let mut lt = filter("<", "bob").await;
        assert!(lt.process(row("ada")).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_column_drops_record() {
        let mut eq = filter("=", "1").await;
        let record: Record = [("other", 1i64)].into_iter().collect();
        assert!(eq.process(record).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_operator_fails_open() {
        let config =
            ComponentConfig::from_pairs([("column", "a"), ("operator", "~"), ("value", "1")]);
        assert!(FilterRows::new().open(&config).await.is_err());
    }
}
