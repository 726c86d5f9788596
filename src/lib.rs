#![warn(missing_docs)]
//! Core library entry points for the garmentsearch retrieval system.

pub mod assemble;
pub mod corpus;
pub mod description;
pub mod design;
pub mod document;
pub mod embedder;
pub mod index;
pub mod ingest;
pub mod publish;
pub mod specification;
pub mod store;

pub use assemble::{RankedGarment, ResultAssembler, DEFAULT_SIGNED_TTL};
pub use corpus::{Corpus, CorpusInconsistencyError, VectorArray};
pub use description::{
    compose_design_sentence, compose_structure_sentence, synthesize_description,
    MalformedFactError,
};
pub use design::{extract_meaningful_values, DesignNode, DesignRecord, LeafDescriptor};
pub use document::{GarmentDocument, IMAGE_REFERENCE_COUNT, PATTERN_IMAGE_INDEX};
pub use embedder::{Embedder, OpenAiEmbedder};
pub use index::{ExactL2Index, SearchError, SearchHit};
pub use ingest::{build_corpus, IngestConfig, IngestReport};
pub use publish::CorpusStore;
pub use specification::SpecificationRecord;
pub use store::{HttpObjectStore, MemoryObjectStore, ObjectStore};
