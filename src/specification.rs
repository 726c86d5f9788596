//! Garment construction specifications: panels and stitch connections.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

/// Parsed specification artifact describing how a garment is assembled.
///
/// Only the panel names and the stitch count feed retrieval; panel geometry
/// and stitch structure are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpecificationRecord {
    /// Sewing pattern section.
    #[serde(default)]
    pub pattern: PatternSection,
    /// Stitch list as recorded at the document root (newer artifacts).
    #[serde(default)]
    pub stitches: Option<Vec<Value>>,
}

/// The `pattern` section of a specification artifact.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatternSection {
    /// Panel name to panel geometry. Only the keys matter here.
    #[serde(default)]
    pub panels: BTreeMap<String, Value>,
    /// Stitch list as nested under `pattern` (older artifacts).
    #[serde(default)]
    pub stitches: Option<Vec<Value>>,
}

impl SpecificationRecord {
    /// Parses a specification record from raw JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("failed to parse specification JSON")
    }

    /// Panel names in deterministic order.
    pub fn panel_names(&self) -> Vec<&str> {
        self.pattern.panels.keys().map(String::as_str).collect()
    }

    /// Number of panels in the pattern.
    pub fn panel_count(&self) -> usize {
        self.pattern.panels.len()
    }

    /// Stitch count, resolved from the first non-empty source: the root
    /// `stitches` list, then `pattern.stitches`, else zero. Both sources
    /// absent reads as zero rather than an error.
    pub fn stitch_count(&self) -> usize {
        non_empty_len(self.stitches.as_deref())
            .or_else(|| non_empty_len(self.pattern.stitches.as_deref()))
            .unwrap_or(0)
    }
}

fn non_empty_len(list: Option<&[Value]>) -> Option<usize> {
    list.filter(|entries| !entries.is_empty()).map(<[Value]>::len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn spec(json: &str) -> SpecificationRecord {
        SpecificationRecord::from_json(json.as_bytes()).expect("valid JSON")
    }

    #[test]
    fn root_stitches_win_over_nested() {
        let rec = spec(
            r#"{
                "pattern": {"panels": {}, "stitches": [1, 2]},
                "stitches": [1, 2, 3]
            }"#,
        );
        assert_eq!(rec.stitch_count(), 3);
    }

    #[test]
    fn empty_root_stitches_fall_back_to_nested() {
        let rec = spec(
            r#"{
                "pattern": {"panels": {}, "stitches": [1, 2]},
                "stitches": []
            }"#,
        );
        assert_eq!(rec.stitch_count(), 2);
    }

    #[test]
    fn missing_stitch_sources_read_as_zero() {
        let rec = spec(r#"{"pattern": {"panels": {}}}"#);
        assert_eq!(rec.stitch_count(), 0);
    }

    #[test]
    fn panel_names_are_ordered_deterministically() {
        let rec = spec(
            r#"{
                "pattern": {
                    "panels": {"front": {}, "back": {}, "left_sleeve": {}}
                }
            }"#,
        );
        assert_eq!(rec.panel_names(), vec!["back", "front", "left_sleeve"]);
        assert_eq!(rec.panel_count(), 3);
    }
}
