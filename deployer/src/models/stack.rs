//! Compose-shaped stack documents.
//!
//! Only the fields the assembler touches are typed. Everything else a service
//! or the document carries is kept verbatim in the `extra` maps so a stack
//! survives a load/save round trip untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml_ng::Value;

use crate::errors::DeployError;

/// Network definition, opaque to the assembler
pub type NetworkSpec = Value;

/// Volume definition, opaque to the assembler
pub type VolumeSpec = Value;

/// Secret or config definition, opaque to the assembler
pub type ResourceSpec = Value;

/// How [`crate::deploy::compose::merge`] treats keys present in both inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMode {
    /// A shared key is a conflict
    #[default]
    Strict,
    /// A shared key keeps the first definition's value
    KeepFirst,
}

/// A declarative multi-service deployment unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackDefinition {
    #[serde(
        default,
        deserialize_with = "deserialize_version",
        skip_serializing_if = "Option::is_none"
    )]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, ServiceSpec>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, NetworkSpec>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, VolumeSpec>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secrets: BTreeMap<String, ResourceSpec>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub configs: BTreeMap<String, ResourceSpec>,

    /// Unrecognized top-level fields, rejected by validation
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl StackDefinition {
    /// Parse a stack document
    pub fn from_yaml(content: &str) -> Result<Self, DeployError> {
        Ok(serde_yaml_ng::from_str(content)?)
    }

    /// Render the on-disk document form
    pub fn to_yaml(&self) -> Result<String, DeployError> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    pub fn service_names(&self) -> Vec<&str> {
        self.services.keys().map(String::as_str).collect()
    }
}

/// Compose files write `version: 3.8` as often as `version: "3.8"`
fn deserialize_version<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "version must be a string, got {:?}",
            other
        ))),
    }
}

/// Container-level configuration of one service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,

    /// Ports, volumes, restart policy, capabilities and the rest
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Environment variables can be specified as a map or list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Environment {
    /// Environment as key-value map
    Map(BTreeMap<String, Value>),
    /// Environment as list of KEY=value strings
    List(Vec<String>),
}

impl Environment {
    /// Convert environment to a map regardless of input format.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        match self {
            Environment::Map(map) => map
                .iter()
                .map(|(k, v)| {
                    let value = match v {
                        Value::Null => String::new(),
                        Value::String(s) => s.clone(),
                        Value::Bool(b) => b.to_string(),
                        Value::Number(n) => n.to_string(),
                        other => serde_yaml_ng::to_string(other)
                            .map(|s| s.trim_end().to_string())
                            .unwrap_or_default(),
                    };
                    (k.clone(), value)
                })
                .collect(),
            Environment::List(list) => list
                .iter()
                .filter_map(|s| {
                    s.split_once('=')
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                })
                .collect(),
        }
    }
}
