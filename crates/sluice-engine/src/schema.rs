//! Column schema negotiation
//!
//! The source proposes a mapping from in-pipeline key to external column
//! name. Each processor receives the mapping by value during setup and
//! returns the one it advertises. The result is frozen and handed to the
//! sink. Nothing checks that a processor's records actually match what it
//! advertised.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Mutable mapping used while negotiating the schema
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SchemaMapping {
    columns: BTreeMap<String, String>,
}

impl SchemaMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mapping where every key maps to itself
    pub fn identity<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: keys
                .into_iter()
                .map(|k| {
                    let k = k.into();
                    (k.clone(), k)
                })
                .collect(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, external: impl Into<String>) {
        self.columns.insert(key.into(), external.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.columns.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.columns.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.columns.contains_key(key)
    }

    /// Apply a set of simultaneous renames.
    ///
    /// Every renamed key becomes an identity entry for its new name; keys not
    /// named in `renames` are kept as they are.
    pub fn renamed(self, renames: &BTreeMap<String, String>) -> Self {
        let columns = self
            .columns
            .into_iter()
            .map(|(key, external)| match renames.get(&key) {
                Some(new_key) => (new_key.clone(), new_key.clone()),
                None => (key, external),
            })
            .collect();
        Self { columns }
    }

    /// Keep only the keys in `keep`
    pub fn retained(mut self, keep: &BTreeSet<String>) -> Self {
        self.columns.retain(|key, _| keep.contains(key));
        self
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// End negotiation
    pub fn freeze(self) -> FrozenSchema {
        FrozenSchema {
            columns: Arc::new(self.columns),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SchemaMapping {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Final, immutable schema handed to the sink
///
/// Iteration order is the sorted order of in-pipeline keys, so sinks that
/// emit columns positionally produce a stable layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FrozenSchema {
    columns: Arc<BTreeMap<String, String>>,
}

impl FrozenSchema {
    /// External name for an in-pipeline key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.columns.get(key).map(String::as_str)
    }

    /// `(key, external name)` pairs in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn external_names(&self) -> impl Iterator<Item = &str> {
        self.columns.values().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Copy back into an editable mapping
    pub fn to_mapping(&self) -> SchemaMapping {
        SchemaMapping {
            columns: (*self.columns).clone(),
        }
    }
}
