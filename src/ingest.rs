//! Offline ingestion: raw garment artifacts in, a publishable corpus out.

use std::collections::BTreeSet;

use anyhow::{Context, Result};

use crate::corpus::{Corpus, VectorArray};
use crate::description::synthesize_description;
use crate::design::{extract_meaningful_values, DesignRecord};
use crate::document::GarmentDocument;
use crate::embedder::Embedder;
use crate::specification::SpecificationRecord;
use crate::store::ObjectStore;

/// Suffix of the design-parameter artifact inside a garment folder.
pub const DESIGN_SUFFIX: &str = "_design_params.yaml";

/// Suffix of the specification artifact inside a garment folder.
pub const SPECIFICATION_SUFFIX: &str = "_specification.json";

/// Where ingestion looks for raw garment folders.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Root prefix of the raw data set, e.g. `"GarmentData_v2/garments_5000_0"`.
    pub raw_prefix: String,
    /// Body-type subdirectories scanned under the root.
    pub body_types: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            raw_prefix: String::new(),
            body_types: vec!["default_body".to_string(), "random_body".to_string()],
        }
    }
}

/// Counters describing one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Documents that made it into the corpus.
    pub loaded: usize,
    /// Garment folders skipped because their artifacts were missing or
    /// malformed.
    pub skipped: usize,
}

/// Builds a corpus from every garment folder under the configured
/// prefixes.
///
/// A folder whose artifacts cannot be fetched or parsed is logged and
/// skipped; one bad record never aborts a rebuild. Embedding failures are
/// fatal, matching the batched encode stage they interrupt.
pub fn build_corpus(
    store: &dyn ObjectStore,
    embedder: &dyn Embedder,
    config: &IngestConfig,
) -> Result<(Corpus, IngestReport)> {
    let mut documents = Vec::new();
    let mut report = IngestReport::default();

    for body_type in &config.body_types {
        let body_prefix = format!("{}/{}/", config.raw_prefix.trim_end_matches('/'), body_type);
        eprintln!("listing garments under {body_prefix}...");
        let keys = store
            .list(&body_prefix)
            .with_context(|| format!("failed to list garments under {body_prefix}"))?;
        let folders = garment_folders(&body_prefix, &keys);
        eprintln!("found {} garment folder(s) under {body_prefix}", folders.len());

        for folder in folders {
            match load_document(store, &body_prefix, &folder) {
                Ok(document) => {
                    documents.push(document);
                    report.loaded += 1;
                }
                Err(err) => {
                    eprintln!("skipping {folder}: {err:#}");
                    report.skipped += 1;
                }
            }
        }
    }

    eprintln!(
        "encoding {} description(s) ({} folder(s) skipped)...",
        documents.len(),
        report.skipped
    );
    let inputs: Vec<&str> = documents
        .iter()
        .map(|doc| doc.description.as_str())
        .collect();
    let rows = embedder
        .embed_batch(&inputs)
        .context("failed to embed garment descriptions")?;
    anyhow::ensure!(
        rows.len() == documents.len(),
        "embedder returned {} vectors for {} documents",
        rows.len(),
        documents.len()
    );
    let vectors = VectorArray::from_rows(rows)?;
    let corpus = Corpus::new(documents, vectors)?;
    Ok((corpus, report))
}

/// Derives the set of garment folder names from a prefix listing: any
/// folder that holds its own design-parameter artifact counts.
fn garment_folders(body_prefix: &str, keys: &[String]) -> BTreeSet<String> {
    let mut folders = BTreeSet::new();
    for key in keys {
        let Some(rest) = key.strip_prefix(body_prefix) else {
            continue;
        };
        let Some((folder, file)) = rest.split_once('/') else {
            continue;
        };
        if file == format!("{folder}{DESIGN_SUFFIX}") {
            folders.insert(folder.to_string());
        }
    }
    folders
}

/// Fetches and synthesizes one garment document. Any failure here is a
/// per-document failure isolated by the caller.
fn load_document(
    store: &dyn ObjectStore,
    body_prefix: &str,
    folder: &str,
) -> Result<GarmentDocument> {
    let folder_prefix = format!("{body_prefix}{folder}/");
    let design_key = format!("{folder_prefix}{folder}{DESIGN_SUFFIX}");
    let spec_key = format!("{folder_prefix}{folder}{SPECIFICATION_SUFFIX}");

    let design_bytes = store
        .get(&design_key)
        .with_context(|| format!("failed to fetch {design_key}"))?;
    let spec_bytes = store
        .get(&spec_key)
        .with_context(|| format!("failed to fetch {spec_key}"))?;

    let design = DesignRecord::from_yaml(&design_bytes)?;
    let spec = SpecificationRecord::from_json(&spec_bytes)?;

    let facts = extract_meaningful_values(&design);
    let description = synthesize_description(&facts, &spec)
        .with_context(|| format!("failed to synthesize description for {folder}"))?;

    Ok(GarmentDocument::new(folder, description, &folder_prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryObjectStore;
    use pretty_assertions::assert_eq;

    /// Deterministic stand-in embedder: a tiny content hash spread over a
    /// fixed dimension.
    struct HashEmbedder;

    impl HashEmbedder {
        fn vector(text: &str) -> Vec<f32> {
            let mut acc: u32 = 2166136261;
            for byte in text.bytes() {
                acc ^= byte as u32;
                acc = acc.wrapping_mul(16777619);
            }
            (0..4)
                .map(|i| ((acc >> (i * 8)) & 0xFF) as f32 / 255.0)
                .collect()
        }
    }

    impl Embedder for HashEmbedder {
        fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(inputs.iter().map(|text| Self::vector(text)).collect())
        }
    }

    const DESIGN_YAML: &str = r#"
design:
  hood:
    v: true
    type: bool
  fabric:
    v: denim
    type: select
"#;

    const SPEC_JSON: &str = r#"{
        "pattern": {"panels": {"back": {}, "front": {}}},
        "stitches": [0, 1]
    }"#;

    fn seed_garment(store: &MemoryObjectStore, body: &str, folder: &str) {
        let prefix = format!("raw/{body}/{folder}/");
        store
            .put(
                &format!("{prefix}{folder}{DESIGN_SUFFIX}"),
                DESIGN_YAML.as_bytes(),
            )
            .unwrap();
        store
            .put(
                &format!("{prefix}{folder}{SPECIFICATION_SUFFIX}"),
                SPEC_JSON.as_bytes(),
            )
            .unwrap();
    }

    fn config() -> IngestConfig {
        IngestConfig {
            raw_prefix: "raw".to_string(),
            body_types: vec!["default_body".to_string()],
        }
    }

    #[test]
    fn builds_aligned_corpus_from_seeded_garments() {
        let store = MemoryObjectStore::new();
        seed_garment(&store, "default_body", "rand_a");
        seed_garment(&store, "default_body", "rand_b");

        let (corpus, report) = build_corpus(&store, &HashEmbedder, &config()).unwrap();
        assert_eq!(report, IngestReport { loaded: 2, skipped: 0 });
        assert_eq!(corpus.len(), 2);

        // Index pairing: row i is the embedding of document i.
        for (i, document) in corpus.documents().iter().enumerate() {
            assert_eq!(
                corpus.vectors().row(i),
                HashEmbedder::vector(&document.description).as_slice()
            );
        }
        assert_eq!(
            corpus.documents()[0].description,
            "This garment includes: Fabric: denim, Hood: enabled. \
             It consists of 2 panels: back, front. \
             It includes 2 stitched connections between panels."
        );
    }

    #[test]
    fn bad_record_is_skipped_not_fatal() {
        let store = MemoryObjectStore::new();
        seed_garment(&store, "default_body", "rand_good");
        // Design present but unparseable spec: folder is discovered, then
        // fails per-document.
        let prefix = "raw/default_body/rand_bad/";
        store
            .put(
                &format!("{prefix}rand_bad{DESIGN_SUFFIX}"),
                DESIGN_YAML.as_bytes(),
            )
            .unwrap();
        store
            .put(
                &format!("{prefix}rand_bad{SPECIFICATION_SUFFIX}"),
                b"{not json",
            )
            .unwrap();

        let (corpus, report) = build_corpus(&store, &HashEmbedder, &config()).unwrap();
        assert_eq!(report, IngestReport { loaded: 1, skipped: 1 });
        assert_eq!(corpus.documents()[0].id, "rand_good");
    }

    #[test]
    fn folders_without_design_artifact_are_ignored() {
        let store = MemoryObjectStore::new();
        store
            .put("raw/default_body/not_a_garment/readme.txt", b"hi")
            .unwrap();
        let (corpus, report) = build_corpus(&store, &HashEmbedder, &config()).unwrap();
        assert!(corpus.is_empty());
        assert_eq!(report, IngestReport::default());
    }

    #[test]
    fn empty_listing_yields_empty_corpus() {
        let store = MemoryObjectStore::new();
        let (corpus, report) = build_corpus(&store, &HashEmbedder, &config()).unwrap();
        assert!(corpus.is_empty());
        assert_eq!(report.loaded, 0);
    }
}
