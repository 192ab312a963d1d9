//! Decoded chart values as a recursive tree
//!
//! Mapping keys are strings and keep their insertion order, so a tree that is
//! parsed, rewritten and serialized again stays diffable against its source.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;
use std::path::Path;

use crate::error::Result;

/// Leaf value of a values tree
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(serde_yaml::Number),
    String(String),
}

/// A node in a chart's values tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "YamlValue", into = "YamlValue")]
pub enum ValueNode {
    Scalar(Scalar),
    Sequence(Vec<ValueNode>),
    Mapping(IndexMap<String, ValueNode>),
}

impl Default for ValueNode {
    fn default() -> Self {
        ValueNode::Mapping(IndexMap::new())
    }
}

impl ValueNode {
    /// Parse a YAML document; an empty document yields an empty mapping
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: YamlValue = serde_yaml::from_str(yaml)?;
        Ok(match value {
            YamlValue::Null => ValueNode::default(),
            other => ValueNode::from(other),
        })
    }

    /// Load a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Serialize back to YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// String scalar content, if this is one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ValueNode::Scalar(Scalar::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Non-empty string scalar content
    pub fn as_non_empty_str(&self) -> Option<&str> {
        self.as_str().filter(|s| !s.is_empty())
    }

    pub fn as_mapping(&self) -> Option<&IndexMap<String, ValueNode>> {
        match self {
            ValueNode::Mapping(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_mapping_mut(&mut self) -> Option<&mut IndexMap<String, ValueNode>> {
        match self {
            ValueNode::Mapping(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a value by dotted path (e.g. `image.repository`)
    pub fn get_path(&self, path: &str) -> Option<&ValueNode> {
        path.split('.')
            .try_fold(self, |node, key| node.as_mapping()?.get(key))
    }

    pub fn string(value: impl Into<String>) -> Self {
        ValueNode::Scalar(Scalar::String(value.into()))
    }
}

impl From<YamlValue> for ValueNode {
    fn from(value: YamlValue) -> Self {
        match value {
            YamlValue::Null => ValueNode::Scalar(Scalar::Null),
            YamlValue::Bool(b) => ValueNode::Scalar(Scalar::Bool(b)),
            YamlValue::Number(n) => ValueNode::Scalar(Scalar::Number(n)),
            YamlValue::String(s) => ValueNode::Scalar(Scalar::String(s)),
            YamlValue::Sequence(seq) => {
                ValueNode::Sequence(seq.into_iter().map(ValueNode::from).collect())
            }
            YamlValue::Mapping(map) => ValueNode::Mapping(
                map.into_iter()
                    .map(|(k, v)| (key_to_string(k), ValueNode::from(v)))
                    .collect(),
            ),
            YamlValue::Tagged(tagged) => ValueNode::from(tagged.value),
        }
    }
}

impl From<ValueNode> for YamlValue {
    fn from(node: ValueNode) -> Self {
        match node {
            ValueNode::Scalar(Scalar::Null) => YamlValue::Null,
            ValueNode::Scalar(Scalar::Bool(b)) => YamlValue::Bool(b),
            ValueNode::Scalar(Scalar::Number(n)) => YamlValue::Number(n),
            ValueNode::Scalar(Scalar::String(s)) => YamlValue::String(s),
            ValueNode::Sequence(seq) => {
                YamlValue::Sequence(seq.into_iter().map(YamlValue::from).collect())
            }
            ValueNode::Mapping(map) => YamlValue::Mapping(
                map.into_iter()
                    .map(|(k, v)| (YamlValue::String(k), YamlValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Non-string keys (`1:`, `true:`) are kept by their textual form
fn key_to_string(key: YamlValue) -> String {
    match key {
        YamlValue::String(s) => s,
        YamlValue::Bool(b) => b.to_string(),
        YamlValue::Number(n) => n.to_string(),
        YamlValue::Null => "null".to_string(),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested() {
        let node = ValueNode::from_yaml(
            r#"
image:
  repository: bitnami/nginx
  tag: "1.25"
replicaCount: 2
sidecars:
  - name: proxy
    image: envoy:1.29
"#,
        )
        .unwrap();

        assert_eq!(
            node.get_path("image.repository").and_then(|v| v.as_str()),
            Some("bitnami/nginx")
        );
        assert!(matches!(
            node.get_path("replicaCount"),
            Some(ValueNode::Scalar(Scalar::Number(_)))
        ));
        match node.get_path("sidecars") {
            Some(ValueNode::Sequence(items)) => assert_eq!(items.len(), 1),
            other => panic!("expected sequence, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_document_is_empty_mapping() {
        let node = ValueNode::from_yaml("").unwrap();
        assert_eq!(node.as_mapping().map(|m| m.len()), Some(0));
    }

    #[test]
    fn test_key_order_survives_reencoding() {
        let yaml = "zeta: 1\nalpha: 2\nmiddle:\n  b: x\n  a: y\n";
        let node = ValueNode::from_yaml(yaml).unwrap();
        assert_eq!(node.to_yaml().unwrap(), yaml);
    }

    #[test]
    fn test_non_string_keys() {
        let node = ValueNode::from_yaml("1: one\ntrue: yes\n").unwrap();
        let keys: Vec<_> = node.as_mapping().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["1", "true"]);
    }

    #[test]
    fn test_as_non_empty_str() {
        assert_eq!(ValueNode::string("").as_non_empty_str(), None);
        assert_eq!(ValueNode::string("x").as_non_empty_str(), Some("x"));
        assert_eq!(ValueNode::Scalar(Scalar::Null).as_non_empty_str(), None);
    }
}
