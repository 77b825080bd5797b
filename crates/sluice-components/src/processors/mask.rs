use anyhow::{Context, Result};
use async_trait::async_trait;
use sluice_common::digest::DigestMethod;
use sluice_common::{ComponentConfig, ParamSpec, Record, Value};
use sluice_engine::component::Processor;

/// Replaces a column's value with the hex digest of its text
pub struct MaskData {
    column: String,
    method: DigestMethod,
}

impl Default for MaskData {
    fn default() -> Self {
        Self {
            column: String::new(),
            method: DigestMethod::Sha256,
        }
    }
}

impl MaskData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params() -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("column", "column to mask"),
            ParamSpec::required("method", "md5 or sha256").with_default("sha256"),
        ]
    }
}

#[async_trait]
impl Processor for MaskData {
    async fn open(&mut self, config: &ComponentConfig) -> Result<()> {
        self.column = config.require("column")?.to_string();
        self.method = config
            .get_or("method", "sha256")
            .parse()
            .context("mask_data")?;
        Ok(())
    }

    async fn process(&mut self, mut record: Record) -> Result<Option<Record>> {
        if let Some(value) = record.get_mut(&self.column) {
            if !value.is_null() {
                let digest = self.method.hex_digest(value.to_string().as_bytes());
                *value = Value::Text(digest);
            }
        }
        Ok(Some(record))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    async fn mask(method: &str) -> MaskData {
        let mut processor = MaskData::new();
        processor
            .open(&ComponentConfig::from_pairs([
                ("column", "email"),
                ("method", method),
            ]))
            .await
            .unwrap();
        processor
    }

    #[tokio::test]
    async fn test_masks_value_text() {
        let mut md5 = mask("md5").await;
        let record: Record = [("email", "hello world")].into_iter().collect();
        let out = md5.process(record).await.unwrap().unwrap();
        assert_eq!(
            out.get("email"),
            Some(&Value::from("5eb63bbbe01eeed093cb22bb8f5acdc3"))
        );

        // Numbers hash their rendered text
        let mut sha = mask("sha256").await;
        let record: Record = [("email", 42i64)].into_iter().collect();
        let out = sha.process(record).await.unwrap().unwrap();
        assert_eq!(
            out.get("email"),
            Some(&Value::from(
                "73475cb40a568e8da8a045ced110137e159f890ac4da883b6b17dc651b3a8049"
            ))
        );
    }

    #[tokio::test]
    async fn test_null_and_missing_pass_through() {
        let mut processor = mask("sha256").await;
        let record: Record = [("email", Value::Null)].into_iter().collect();
        let out = processor.process(record).await.unwrap().unwrap();
        assert_eq!(out.get("email"), Some(&Value::Null));

        let record: Record = [("name", "ada")].into_iter().collect();
        let out = processor.process(record).await.unwrap().unwrap();
        assert!(!out.contains_key("email"));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let config = ComponentConfig::from_pairs([("column", "a"), ("method", "crc32")]);
        assert!(MaskData::new().open(&config).await.is_err());
    }
}
