//! Component configuration and declared parameters
//!
//! Every component is configured with a flat string-to-string map. Structured
//! values (lists, nested maps) travel as JSON text inside a single value and
//! are decoded by the component that owns them via
//! [`ComponentConfig::parse_json`].

use crate::error::{Result, SluiceError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// A configuration parameter a component declares at registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamSpec {
    pub key: String,
    pub required: bool,
    #[serde(default)]
    pub default_value: String,
    #[serde(default)]
    pub description: String,
}

impl ParamSpec {
    /// A required parameter without a default
    pub fn required(key: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            required: true,
            default_value: String::new(),
            description: description.into(),
        }
    }

    /// An optional parameter without a default
    pub fn optional(key: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            required: false,
            default_value: String::new(),
            description: description.into(),
        }
    }

    /// Attach a default value
    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = value.into();
        self
    }
}

/// Flat configuration map handed to a component's `open`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentConfig {
    values: BTreeMap<String, String>,
}

impl ComponentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Value for `key`, or `default` when absent or empty
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        match self.get(key) {
            Some(v) if !v.is_empty() => v,
            _ => default,
        }
    }

    /// Value for `key`; absent or empty values are an error
    pub fn require(&self, key: &str) -> Result<&str> {
        match self.get(key) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(SluiceError::MissingConfig(key.to_string())),
        }
    }

    /// Parse a scalar value with [`FromStr`]. Absent keys yield `Ok(None)`.
    pub fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| SluiceError::invalid_config(key, e.to_string())),
        }
    }

    /// Decode a JSON-encoded value (list or map) stored under a required key
    pub fn parse_json<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let raw = self
            .get(key)
            .ok_or_else(|| SluiceError::MissingConfig(key.to_string()))?;
        serde_json::from_str(raw).map_err(|e| SluiceError::invalid_config(key, e.to_string()))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.values.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Mutable access to every value, used for placeholder substitution
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut String> {
        self.values.values_mut()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ComponentConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

/// Fill declared defaults for keys that are absent from `config`
pub fn apply_defaults(specs: &[ParamSpec], config: &mut ComponentConfig) {
    for spec in specs {
        if !spec.default_value.is_empty() && !config.contains_key(&spec.key) {
            config.insert(spec.key.clone(), spec.default_value.clone());
        }
    }
}

/// Required keys declared in `specs` that `config` does not carry
pub fn missing_required<'a>(specs: &'a [ParamSpec], config: &ComponentConfig) -> Vec<&'a str> {
    specs
        .iter()
        .filter(|spec| spec.required && config.get(&spec.key).map_or(true, str::is_empty))
        .map(|spec| spec.key.as_str())
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_require_and_get_or() {
        let config = ComponentConfig::from_pairs([("column", "age"), ("empty", "")]);

        assert_eq!(config.require("column").unwrap(), "age");
        assert!(matches!(
            config.require("empty"),
            Err(SluiceError::MissingConfig(_))
        ));
        assert_eq!(config.get_or("empty", ","), ",");
        assert_eq!(config.get_or("missing", ";"), ";");
    }

    #[test]
    fn test_parse_json_values() {
        let config = ComponentConfig::from_pairs([
            ("columns", r#"["a","b"]"#),
            ("mapping", r#"{"a":"x"}"#),
            ("broken", "[1,"),
        ]);

        let columns: Vec<String> = config.parse_json("columns").unwrap();
        assert_eq!(columns, vec!["a", "b"]);

        let mapping: HashMap<String, String> = config.parse_json("mapping").unwrap();
        assert_eq!(mapping.get("a").map(String::as_str), Some("x"));

        assert!(config.parse_json::<Vec<String>>("broken").is_err());
        assert!(config.parse_json::<Vec<String>>("absent").is_err());
    }

    #[test]
    fn test_parse_scalar() {
        let config = ComponentConfig::from_pairs([("rows", " 25 "), ("bad", "x")]);
        assert_eq!(config.parse::<usize>("rows").unwrap(), Some(25));
        assert_eq!(config.parse::<usize>("absent").unwrap(), None);
        assert!(config.parse::<usize>("bad").is_err());
    }

    #[test]
    fn test_apply_defaults_and_missing_required() {
        let specs = vec![
            ParamSpec::required("file_path", "input file"),
            ParamSpec::optional("delimiter", "field separator").with_default(","),
        ];

        let mut config = ComponentConfig::new();
        apply_defaults(&specs, &mut config);
        assert_eq!(config.get("delimiter"), Some(","));
        assert_eq!(missing_required(&specs, &config), vec!["file_path"]);

        config.insert("file_path", "/tmp/in.csv");
        assert!(missing_required(&specs, &config).is_empty());
    }
}
