//! Result assembly: scored rows back to documents with resolvable image
//! references.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::corpus::Corpus;
use crate::document::PATTERN_IMAGE_INDEX;
use crate::index::SearchHit;
use crate::store::ObjectStore;

/// Default lifetime for the pattern download link.
pub const DEFAULT_SIGNED_TTL: Duration = Duration::from_secs(15 * 60);

/// One garment in a ranked response, with caller-facing image URLs.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedGarment {
    /// Document identifier.
    pub id: String,
    /// Squared L2 distance from the query; smaller ranks higher.
    pub distance: f32,
    /// Resolved image URLs in the document's significant order. The
    /// pattern slot carries a time-limited download link, every other
    /// slot a permanent public URL.
    pub images: Vec<String>,
}

/// Maps search hits back onto documents and rewrites their storage-native
/// image locators into caller-facing URLs.
pub struct ResultAssembler<'a> {
    store: &'a dyn ObjectStore,
    signed_ttl: Duration,
}

impl<'a> ResultAssembler<'a> {
    /// Builds an assembler issuing pattern links with the default TTL.
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        Self {
            store,
            signed_ttl: DEFAULT_SIGNED_TTL,
        }
    }

    /// Overrides the pattern-link lifetime.
    pub fn with_signed_ttl(mut self, ttl: Duration) -> Self {
        self.signed_ttl = ttl;
        self
    }

    /// Resolves hits in ranking order. Lookup is positional into the
    /// corpus document sequence; this method never reorders or rescores.
    pub fn assemble(&self, corpus: &Corpus, hits: &[SearchHit]) -> Result<Vec<RankedGarment>> {
        let mut out = Vec::with_capacity(hits.len());
        for hit in hits {
            let document = corpus
                .documents()
                .get(hit.row)
                .ok_or_else(|| anyhow!("hit row {} outside corpus of {}", hit.row, corpus.len()))?;
            let mut images = Vec::with_capacity(document.image_references.len());
            for (position, key) in document.image_references.iter().enumerate() {
                if position == PATTERN_IMAGE_INDEX {
                    let signed = self
                        .store
                        .signed_download_url(key, self.signed_ttl)
                        .with_context(|| {
                            format!("failed to sign pattern download for {}", document.id)
                        })?;
                    images.push(signed);
                } else {
                    images.push(self.store.public_url(key));
                }
            }
            out.push(RankedGarment {
                id: document.id.clone(),
                distance: hit.distance,
                images,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::VectorArray;
    use crate::document::GarmentDocument;
    use crate::store::MemoryObjectStore;
    use pretty_assertions::assert_eq;

    fn corpus_of(ids: &[&str]) -> Corpus {
        let documents: Vec<GarmentDocument> = ids
            .iter()
            .map(|id| GarmentDocument::new(*id, format!("garment {id}"), "raw/body/"))
            .collect();
        let vectors =
            VectorArray::from_rows(ids.iter().map(|_| vec![0.0, 0.0]).collect()).unwrap();
        Corpus::new(documents, vectors).unwrap()
    }

    #[test]
    fn pattern_slot_gets_signed_url_others_public() {
        let store = MemoryObjectStore::new();
        let corpus = corpus_of(&["rand_1"]);
        let assembler = ResultAssembler::new(&store).with_signed_ttl(Duration::from_secs(600));
        let results = assembler
            .assemble(&corpus, &[SearchHit { row: 0, distance: 0.25 }])
            .unwrap();

        assert_eq!(results.len(), 1);
        let images = &results[0].images;
        assert_eq!(images.len(), 4);
        for public in &images[..3] {
            assert!(public.starts_with("memory://public/"), "got {public}");
        }
        assert_eq!(
            images[3],
            "memory://signed/raw/body/rand_1_pattern.png?expires_in=600&disposition=attachment"
        );
    }

    #[test]
    fn ranking_order_is_preserved() {
        let store = MemoryObjectStore::new();
        let corpus = corpus_of(&["a", "b", "c"]);
        let hits = vec![
            SearchHit { row: 2, distance: 0.1 },
            SearchHit { row: 0, distance: 0.2 },
            SearchHit { row: 1, distance: 0.3 },
        ];
        let results = ResultAssembler::new(&store).assemble(&corpus, &hits).unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(results[0].distance, 0.1);
    }

    #[test]
    fn out_of_range_row_is_an_error() {
        let store = MemoryObjectStore::new();
        let corpus = corpus_of(&["only"]);
        let err = ResultAssembler::new(&store)
            .assemble(&corpus, &[SearchHit { row: 9, distance: 0.0 }])
            .unwrap_err();
        assert!(err.to_string().contains("outside corpus"));
    }
}
