// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Canonical configuration trees for product settings files.
//!
//! Product configuration (`elasticsearch.yml`, `kibana.yml`, `apm-server.yml`,
//! `logstash.yml`) is assembled from several layers: operator defaults,
//! association output settings, TLS settings and finally user overrides.
//! Users may write settings either nested or with dotted keys, so every layer
//! is first normalized into a nested tree, then layers are deep-merged.
//!
//! Merge semantics are per leaf: a later layer replaces individual leaf values
//! but keeps sibling keys of earlier layers. Lists are leaves and are replaced
//! as a whole. Maps are kept sorted, so rendering is deterministic.
//!
//! # Example
//!
//! ```rust
//! use elastic_operator::settings::CanonicalConfig;
//! use serde_json::json;
//!
//! let mut cfg = CanonicalConfig::from_pairs([
//!     ("server.host", json!("0")),
//!     ("server.name", json!("kb1")),
//! ]);
//! let user = CanonicalConfig::from_value(&json!({"server": {"name": "custom"}})).unwrap();
//! cfg.merge_with(&[user]);
//!
//! assert_eq!(cfg.get("server.host"), Some(&json!("0")));
//! assert_eq!(cfg.get("server.name"), Some(&json!("custom")));
//! ```

use crate::errors::OperatorError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// A normalized, nested settings tree.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CanonicalConfig {
    root: Map<String, Value>,
}

impl CanonicalConfig {
    /// Create an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from an arbitrary JSON value.
    ///
    /// `null` yields an empty configuration. Dotted keys are expanded at every
    /// depth.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the value is neither `null` nor an object.
    pub fn from_value(value: &Value) -> Result<Self, OperatorError> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Object(map) => Ok(Self {
                root: expand_map(map),
            }),
            other => Err(OperatorError::Validation(format!(
                "configuration must be an object, got {other}"
            ))),
        }
    }

    /// Build a configuration from dotted key / value pairs.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Value)>,
    {
        let mut root = Map::new();
        for (key, value) in pairs {
            insert_dotted(&mut root, key, expand_value(value));
        }
        Self { root }
    }

    /// Merge `others` into this configuration, left to right.
    pub fn merge_with(&mut self, others: &[CanonicalConfig]) {
        for other in others {
            merge_maps(&mut self.root, &other.root);
        }
    }

    /// Look up a value by dotted path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        parts.try_fold(self.root.get(first)?, |current, part| {
            current.as_object().and_then(|m| m.get(part))
        })
    }

    /// Whether the configuration holds no settings at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Render the configuration as a YAML document.
    ///
    /// # Errors
    ///
    /// Returns an error if YAML serialization fails.
    pub fn render(&self) -> Result<Vec<u8>, OperatorError> {
        Ok(serde_yaml::to_string(&self.root)?.into_bytes())
    }

    /// Deserialize the configuration into a typed view.
    ///
    /// # Errors
    ///
    /// Returns an error if the tree does not match `T`.
    pub fn unpack<T: DeserializeOwned>(&self) -> Result<T, OperatorError> {
        Ok(serde_json::from_value(Value::Object(self.root.clone()))?)
    }

    /// Borrow the nested tree.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.root
    }
}

fn expand_value(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(expand_map(&map)),
        other => other,
    }
}

fn expand_map(map: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in map {
        insert_dotted(&mut out, key, expand_value(value.clone()));
    }
    out
}

fn insert_dotted(root: &mut Map<String, Value>, key: &str, value: Value) {
    match key.split_once('.') {
        None => match (root.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_maps(existing, &incoming);
            }
            (_, value) => {
                root.insert(key.to_string(), value);
            }
        },
        Some((head, rest)) => {
            let entry = root
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(child) = entry {
                insert_dotted(child, rest, value);
            }
        }
    }
}

fn merge_maps(base: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_maps(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

// ============================================================================
// Typed views
// ============================================================================

/// Typed view of the Elasticsearch settings the operator needs to reason about.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ElasticsearchSettings {
    /// `node.*` settings
    #[serde(default)]
    pub node: NodeRoles,
}

/// Node role flags; every role defaults to enabled.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct NodeRoles {
    /// `node.master`
    #[serde(default = "enabled", deserialize_with = "bool_or_string")]
    pub master: bool,
    /// `node.data`
    #[serde(default = "enabled", deserialize_with = "bool_or_string")]
    pub data: bool,
    /// `node.ingest`
    #[serde(default = "enabled", deserialize_with = "bool_or_string")]
    pub ingest: bool,
}

impl Default for NodeRoles {
    fn default() -> Self {
        Self {
            master: true,
            data: true,
            ingest: true,
        }
    }
}

fn enabled() -> bool {
    true
}

/// Accept `true`/`false` as booleans or strings, as YAML users write both.
fn bool_or_string<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Text(s) => s
            .parse::<bool>()
            .map_err(|_| serde::de::Error::custom(format!("invalid boolean '{s}'"))),
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod settings_tests;
