//! Garment design-parameter trees and attribute fact extraction.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_yaml::Value;

/// Parsed design-parameter artifact for a single garment.
///
/// The raw artifact is a YAML document whose `design` section is an
/// arbitrarily nested mapping of attribute groups. A mapping is a leaf
/// exactly when it carries a `v` key; traversal never descends past one.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DesignRecord {
    /// Root attribute group.
    #[serde(default)]
    pub design: BTreeMap<String, DesignNode>,
}

impl DesignRecord {
    /// Parses a design record from raw YAML bytes.
    pub fn from_yaml(bytes: &[u8]) -> Result<Self> {
        serde_yaml::from_slice(bytes).context("failed to parse design parameters YAML")
    }
}

/// One node in the design tree: a value leaf, a nested group, or an
/// unrecognized scalar that extraction skips.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DesignNode {
    /// Mapping carrying a `v` key; terminal for traversal.
    Leaf(LeafDescriptor),
    /// Nested attribute group.
    Group(BTreeMap<String, DesignNode>),
    /// Anything else (bare scalars, sequences); never emits facts.
    Other(Value),
}

/// Value descriptor at a design-tree leaf.
#[derive(Debug, Clone, Deserialize)]
pub struct LeafDescriptor {
    /// The attribute value; may be a string, number, boolean, or null.
    pub v: Value,
    /// Declared value type. Only `select*` and `bool` produce facts.
    #[serde(rename = "type", default)]
    pub value_type: Option<String>,
}

impl LeafDescriptor {
    /// Renders the leaf into a fact value according to its declared type,
    /// or `None` when the leaf contributes nothing.
    fn fact_value(&self) -> Option<String> {
        let tag = self.value_type.as_deref().unwrap_or("");
        if tag.starts_with("select") {
            render_scalar(&self.v)
        } else if tag == "bool" {
            Some(if truthy(&self.v) { "enabled" } else { "disabled" }.to_string())
        } else {
            None
        }
    }
}

/// Walks a design record and emits one `"dotted.path = value"` fact line
/// per meaningful leaf.
///
/// Group maps iterate in key order, so repeated calls over the same record
/// produce the same sequence. Leaves with non-emitting types are dropped
/// silently; that is not an error.
pub fn extract_meaningful_values(record: &DesignRecord) -> Vec<String> {
    let mut facts = Vec::new();
    collect_facts(&record.design, None, &mut facts);
    facts
}

fn collect_facts(group: &BTreeMap<String, DesignNode>, prefix: Option<&str>, out: &mut Vec<String>) {
    for (key, node) in group {
        let path = match prefix {
            Some(parent) => format!("{parent}.{key}"),
            None => key.clone(),
        };
        match node {
            DesignNode::Leaf(leaf) => {
                if let Some(value) = leaf.fact_value() {
                    out.push(format!("{path} = {value}"));
                }
            }
            DesignNode::Group(children) => collect_facts(children, Some(&path), out),
            DesignNode::Other(_) => {}
        }
    }
}

/// Renders a select-typed value verbatim. Sequences (multi-selects) render
/// as a bracketed list of their rendered elements; null, empty strings,
/// empty sequences, and mapping values yield no fact.
fn render_scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Sequence(items) if items.is_empty() => None,
        Value::Sequence(items) => {
            let rendered: Vec<String> = items
                .iter()
                .map(|item| render_scalar(item).unwrap_or_default())
                .collect();
            Some(format!("[{}]", rendered.join(", ")))
        }
        _ => None,
    }
}

/// Truthiness of a bool-typed leaf value; absent/null values read as off.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Sequence(s) => !s.is_empty(),
        Value::Mapping(m) => !m.is_empty(),
        Value::Tagged(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(yaml: &str) -> DesignRecord {
        DesignRecord::from_yaml(yaml.as_bytes()).expect("valid YAML")
    }

    #[test]
    fn nested_paths_join_with_dots() {
        let rec = record(
            r#"
design:
  sleeve:
    cuff:
      style:
        v: ruffle
        type: select
"#,
        );
        assert_eq!(
            extract_meaningful_values(&rec),
            vec!["sleeve.cuff.style = ruffle".to_string()]
        );
    }

    #[test]
    fn select_with_empty_value_emits_nothing() {
        let rec = record(
            r#"
design:
  collar:
    style:
      v: ""
      type: select
    shape:
      v: null
      type: select
"#,
        );
        assert!(extract_meaningful_values(&rec).is_empty());
    }

    #[test]
    fn bool_values_normalize_to_enabled_disabled() {
        let rec = record(
            r#"
design:
  hood:
    v: true
    type: bool
  pockets:
    v: false
    type: bool
"#,
        );
        assert_eq!(
            extract_meaningful_values(&rec),
            vec![
                "hood = enabled".to_string(),
                "pockets = disabled".to_string()
            ]
        );
    }

    #[test]
    fn undeclared_types_are_dropped() {
        let rec = record(
            r#"
design:
  length:
    v: 42
    type: float
  width:
    v: 7
"#,
        );
        assert!(extract_meaningful_values(&rec).is_empty());
    }

    #[test]
    fn numeric_select_values_render_via_display() {
        let rec = record(
            r#"
design:
  buttons:
    v: 6
    type: select_int
"#,
        );
        assert_eq!(
            extract_meaningful_values(&rec),
            vec!["buttons = 6".to_string()]
        );
    }

    #[test]
    fn multi_select_sequences_render_as_lists() {
        let rec = record(
            r#"
design:
  cuffs:
    finish:
      v: [ribbed, rolled]
      type: select_multi
    trims:
      v: []
      type: select_multi
"#,
        );
        assert_eq!(
            extract_meaningful_values(&rec),
            vec!["cuffs.finish = [ribbed, rolled]".to_string()]
        );
    }

    #[test]
    fn extraction_is_deterministic() {
        let rec = record(
            r#"
design:
  waistband:
    fit:
      v: snug
      type: select
  bottom:
    flare:
      v: true
      type: bool
  top:
    neckline:
      v: v-neck
      type: select
"#,
        );
        let first = extract_meaningful_values(&rec);
        let second = extract_meaningful_values(&rec);
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn leaf_with_extra_keys_still_terminates_traversal() {
        let rec = record(
            r#"
design:
  skirt:
    style:
      v: pleated
      type: select
      range: [pleated, straight]
      default: straight
"#,
        );
        assert_eq!(
            extract_meaningful_values(&rec),
            vec!["skirt.style = pleated".to_string()]
        );
    }
}
