//! Versioned corpus persistence: paired artifact writes under a fresh
//! prefix, activated by a pointer update.

use anyhow::{Context, Result};

use crate::corpus::{Corpus, CorpusInconsistencyError, VectorArray};
use crate::document::GarmentDocument;
use crate::store::ObjectStore;

/// File name of the vector artifact inside a version prefix.
pub const VECTORS_ARTIFACT: &str = "vectors.bin";

/// File name of the document-metadata artifact inside a version prefix.
pub const DOCUMENTS_ARTIFACT: &str = "documents.json";

/// Pointer object naming the live version.
pub const CURRENT_POINTER: &str = "CURRENT";

/// Reads and writes corpora under one base prefix in an object store.
///
/// A publish writes both artifacts under `base/<version>/` and only then
/// rewrites `base/CURRENT`; readers that race a publish keep resolving the
/// previous version. Nothing is ever overwritten in place.
pub struct CorpusStore<'a> {
    store: &'a dyn ObjectStore,
    base_prefix: String,
}

impl<'a> CorpusStore<'a> {
    /// Binds a corpus store to a base prefix, e.g. `"corpus"`.
    pub fn new(store: &'a dyn ObjectStore, base_prefix: impl Into<String>) -> Self {
        let base_prefix = base_prefix.into().trim_end_matches('/').to_string();
        Self { store, base_prefix }
    }

    fn pointer_key(&self) -> String {
        format!("{}/{}", self.base_prefix, CURRENT_POINTER)
    }

    fn artifact_key(&self, version: &str, name: &str) -> String {
        format!("{}/{}/{}", self.base_prefix, version, name)
    }

    /// Publishes a corpus as `version` and points `CURRENT` at it.
    ///
    /// Artifact writes precede the pointer update, so a failure partway
    /// leaves the previously published version live and untouched.
    pub fn publish(&self, corpus: &Corpus, version: &str) -> Result<()> {
        anyhow::ensure!(!version.trim().is_empty(), "corpus version must not be empty");
        let vectors_key = self.artifact_key(version, VECTORS_ARTIFACT);
        let documents_key = self.artifact_key(version, DOCUMENTS_ARTIFACT);

        let vector_bytes = corpus.vectors().encode();
        let document_bytes = serde_json::to_vec_pretty(corpus.documents())
            .context("failed to serialize document artifact")?;

        self.store
            .put(&vectors_key, &vector_bytes)
            .with_context(|| format!("failed to write {vectors_key}"))?;
        self.store
            .put(&documents_key, &document_bytes)
            .with_context(|| format!("failed to write {documents_key}"))?;
        self.store
            .put(&self.pointer_key(), version.as_bytes())
            .context("failed to update corpus pointer")?;
        Ok(())
    }

    /// Loads the corpus the pointer currently names.
    pub fn load_current(&self) -> Result<Corpus> {
        let pointer = self
            .store
            .get(&self.pointer_key())
            .context("no published corpus pointer")?;
        let version = String::from_utf8(pointer).context("corpus pointer is not UTF-8")?;
        self.load_version(version.trim())
    }

    /// Loads one published version, verifying the artifact pair agrees.
    pub fn load_version(&self, version: &str) -> Result<Corpus> {
        let vectors_key = self.artifact_key(version, VECTORS_ARTIFACT);
        let documents_key = self.artifact_key(version, DOCUMENTS_ARTIFACT);

        let vector_bytes = self.store.get(&vectors_key);
        let document_bytes = self.store.get(&documents_key);

        let (vector_bytes, document_bytes) = match (vector_bytes, document_bytes) {
            (Ok(v), Ok(d)) => (v, d),
            (Ok(_), Err(_)) => {
                return Err(CorpusInconsistencyError::MissingArtifact {
                    key: documents_key,
                }
                .into())
            }
            (Err(_), Ok(_)) => {
                return Err(CorpusInconsistencyError::MissingArtifact { key: vectors_key }.into())
            }
            (Err(err), Err(_)) => {
                return Err(err).with_context(|| format!("corpus version {version} not readable"))
            }
        };

        let vectors = VectorArray::decode(&vector_bytes)
            .with_context(|| format!("vector artifact {vectors_key} is corrupt"))?;
        let documents: Vec<GarmentDocument> = serde_json::from_slice(&document_bytes)
            .with_context(|| format!("document artifact {documents_key} is corrupt"))?;
        Ok(Corpus::new(documents, vectors)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryObjectStore;
    use anyhow::anyhow;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn sample_corpus(ids: &[&str]) -> Corpus {
        let documents: Vec<GarmentDocument> = ids
            .iter()
            .map(|id| GarmentDocument::new(*id, format!("garment {id}"), "raw/"))
            .collect();
        let vectors = VectorArray::from_rows(
            ids.iter()
                .enumerate()
                .map(|(i, _)| vec![i as f32, 1.0])
                .collect(),
        )
        .unwrap();
        Corpus::new(documents, vectors).unwrap()
    }

    /// Store wrapper that starts failing writes after a budget, simulating
    /// a crash mid-publish.
    struct FlakyStore<'a> {
        inner: &'a MemoryObjectStore,
        puts_allowed: AtomicUsize,
    }

    impl ObjectStore for FlakyStore<'_> {
        fn get(&self, key: &str) -> Result<Vec<u8>> {
            self.inner.get(key)
        }

        fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
            if self.puts_allowed.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            }) == Err(0)
            {
                return Err(anyhow!("simulated storage outage writing {key}"));
            }
            self.inner.put(key, bytes)
        }

        fn list(&self, prefix: &str) -> Result<Vec<String>> {
            self.inner.list(prefix)
        }

        fn public_url(&self, key: &str) -> String {
            self.inner.public_url(key)
        }

        fn signed_download_url(&self, key: &str, ttl: Duration) -> Result<String> {
            self.inner.signed_download_url(key, ttl)
        }
    }

    #[test]
    fn publish_then_load_round_trips() {
        let store = MemoryObjectStore::new();
        let corpus_store = CorpusStore::new(&store, "corpus");
        let corpus = sample_corpus(&["a", "b", "c"]);
        corpus_store.publish(&corpus, "v1").unwrap();
        assert_eq!(corpus_store.load_current().unwrap(), corpus);
    }

    #[test]
    fn republish_swaps_pointer_wholesale() {
        let store = MemoryObjectStore::new();
        let corpus_store = CorpusStore::new(&store, "corpus");
        corpus_store.publish(&sample_corpus(&["old"]), "v1").unwrap();
        let rebuilt = sample_corpus(&["new_a", "new_b"]);
        corpus_store.publish(&rebuilt, "v2").unwrap();
        assert_eq!(corpus_store.load_current().unwrap(), rebuilt);
        // The old version stays readable for in-flight readers.
        assert_eq!(corpus_store.load_version("v1").unwrap().len(), 1);
    }

    #[test]
    fn crash_between_artifact_writes_leaves_current_intact() {
        let memory = MemoryObjectStore::new();
        let previous = sample_corpus(&["stable"]);
        CorpusStore::new(&memory, "corpus")
            .publish(&previous, "v1")
            .unwrap();

        // One write lands (vectors), then the store dies before the
        // document artifact and the pointer.
        let flaky = FlakyStore {
            inner: &memory,
            puts_allowed: AtomicUsize::new(1),
        };
        let err = CorpusStore::new(&flaky, "corpus")
            .publish(&sample_corpus(&["half", "written"]), "v2")
            .unwrap_err();
        assert!(err.to_string().contains("documents.json"));

        let current = CorpusStore::new(&memory, "corpus").load_current().unwrap();
        assert_eq!(current, previous);
    }

    #[test]
    fn lone_artifact_is_reported_as_inconsistency() {
        let store = MemoryObjectStore::new();
        let corpus_store = CorpusStore::new(&store, "corpus");
        let corpus = sample_corpus(&["x"]);
        store
            .put("corpus/v9/vectors.bin", &corpus.vectors().encode())
            .unwrap();

        let err = corpus_store.load_version("v9").unwrap_err();
        let inconsistency = err
            .downcast_ref::<CorpusInconsistencyError>()
            .expect("inconsistency error");
        assert_eq!(
            *inconsistency,
            CorpusInconsistencyError::MissingArtifact {
                key: "corpus/v9/documents.json".to_string()
            }
        );
    }

    #[test]
    fn missing_version_is_not_an_inconsistency() {
        let store = MemoryObjectStore::new();
        let err = CorpusStore::new(&store, "corpus")
            .load_version("ghost")
            .unwrap_err();
        assert!(err.downcast_ref::<CorpusInconsistencyError>().is_none());
    }
}
