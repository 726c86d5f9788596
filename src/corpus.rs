//! The published corpus: index-paired documents and embedding vectors,
//! plus the binary codec for the vector artifact.

use std::fmt;

use crc32fast::Hasher as Crc32;

use crate::document::GarmentDocument;

/// Magic tag opening every vector artifact.
const VECTOR_MAGIC: &[u8; 8] = b"GRMVEC1\0";

/// Header bytes preceding the float payload: magic, row count, dimension,
/// payload checksum.
const VECTOR_HEADER_LEN: usize = VECTOR_MAGIC.len() + 4 + 4 + 4;

/// A corpus artifact pair disagreed with itself or with its partner.
/// Always fatal to the operation that observed it; a corpus is never
/// patched around corruption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorpusInconsistencyError {
    /// Document count and vector row count diverge.
    CountMismatch {
        /// Number of documents in the metadata artifact.
        documents: usize,
        /// Number of rows in the vector artifact.
        rows: usize,
    },
    /// A vector row does not match the array dimensionality.
    RaggedRow {
        /// Dimension established by the first row.
        expected: usize,
        /// Dimension of the offending row.
        got: usize,
    },
    /// The vector artifact is shorter than its header or declared payload.
    Truncated {
        /// Bytes required.
        expected: usize,
        /// Bytes present.
        got: usize,
    },
    /// The vector artifact does not open with the expected magic tag.
    BadMagic,
    /// The float payload does not match its recorded checksum.
    ChecksumMismatch,
    /// One artifact of the pair exists without the other.
    MissingArtifact {
        /// Key of the absent artifact.
        key: String,
    },
}

impl fmt::Display for CorpusInconsistencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CountMismatch { documents, rows } => write!(
                f,
                "corpus has {documents} documents but {rows} vector rows"
            ),
            Self::RaggedRow { expected, got } => write!(
                f,
                "vector row has dimension {got}, array expects {expected}"
            ),
            Self::Truncated { expected, got } => write!(
                f,
                "vector artifact truncated: need {expected} bytes, have {got}"
            ),
            Self::BadMagic => write!(f, "vector artifact magic tag not recognized"),
            Self::ChecksumMismatch => write!(f, "vector artifact payload failed checksum"),
            Self::MissingArtifact { key } => {
                write!(f, "corpus artifact {key} is missing while its partner exists")
            }
        }
    }
}

impl std::error::Error for CorpusInconsistencyError {}

/// Dense `[rows, dim]` array of f32 embeddings.
///
/// Row `i` is the embedding of document `i`; that positional pairing is
/// the only join key in the corpus.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorArray {
    dim: usize,
    data: Vec<f32>,
}

impl VectorArray {
    /// Builds an array from per-document rows, validating that every row
    /// shares one dimensionality.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self, CorpusInconsistencyError> {
        let mut array = Self::default();
        for row in rows {
            array.push_row(&row)?;
        }
        Ok(array)
    }

    /// Appends one row; the first row fixes the array dimension.
    pub fn push_row(&mut self, row: &[f32]) -> Result<(), CorpusInconsistencyError> {
        if self.data.is_empty() {
            self.dim = row.len();
        } else if row.len() != self.dim {
            return Err(CorpusInconsistencyError::RaggedRow {
                expected: self.dim,
                got: row.len(),
            });
        }
        self.data.extend_from_slice(row);
        Ok(())
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    /// Dimensionality shared by every row (zero for an empty array).
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Borrow of row `i`.
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    /// Serializes the array as the vector artifact: magic tag, row count,
    /// dimension, CRC32 of the payload, little-endian floats.
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.data.len() * 4);
        for value in &self.data {
            payload.extend_from_slice(&value.to_le_bytes());
        }
        let mut hasher = Crc32::new();
        hasher.update(&payload);
        let checksum = hasher.finalize();

        let mut out = Vec::with_capacity(VECTOR_HEADER_LEN + payload.len());
        out.extend_from_slice(VECTOR_MAGIC);
        out.extend_from_slice(&(self.rows() as u32).to_le_bytes());
        out.extend_from_slice(&(self.dim as u32).to_le_bytes());
        out.extend_from_slice(&checksum.to_le_bytes());
        out.extend_from_slice(&payload);
        out
    }

    /// Deserializes a vector artifact, verifying magic, size, and
    /// checksum.
    pub fn decode(bytes: &[u8]) -> Result<Self, CorpusInconsistencyError> {
        if bytes.len() < VECTOR_HEADER_LEN {
            return Err(CorpusInconsistencyError::Truncated {
                expected: VECTOR_HEADER_LEN,
                got: bytes.len(),
            });
        }
        if &bytes[..VECTOR_MAGIC.len()] != VECTOR_MAGIC {
            return Err(CorpusInconsistencyError::BadMagic);
        }
        let rows = read_u32(bytes, VECTOR_MAGIC.len()) as usize;
        let dim = read_u32(bytes, VECTOR_MAGIC.len() + 4) as usize;
        let checksum = read_u32(bytes, VECTOR_MAGIC.len() + 8);

        let payload = &bytes[VECTOR_HEADER_LEN..];
        let expected_len = rows * dim * 4;
        if payload.len() != expected_len {
            return Err(CorpusInconsistencyError::Truncated {
                expected: VECTOR_HEADER_LEN + expected_len,
                got: bytes.len(),
            });
        }
        let mut hasher = Crc32::new();
        hasher.update(payload);
        if hasher.finalize() != checksum {
            return Err(CorpusInconsistencyError::ChecksumMismatch);
        }

        let mut data = Vec::with_capacity(rows * dim);
        for chunk in payload.chunks_exact(4) {
            data.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
        Ok(Self {
            dim: if rows == 0 { 0 } else { dim },
            data,
        })
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// An immutable, index-paired set of documents and embedding vectors.
///
/// A corpus is built whole by ingestion, published whole, and replaced
/// whole on rebuild; it is never mutated in place after construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Corpus {
    documents: Vec<GarmentDocument>,
    vectors: VectorArray,
}

impl Corpus {
    /// Pairs documents with vectors, rejecting any count divergence.
    pub fn new(
        documents: Vec<GarmentDocument>,
        vectors: VectorArray,
    ) -> Result<Self, CorpusInconsistencyError> {
        if documents.len() != vectors.rows() {
            return Err(CorpusInconsistencyError::CountMismatch {
                documents: documents.len(),
                rows: vectors.rows(),
            });
        }
        Ok(Self { documents, vectors })
    }

    /// Number of documents (equal to the number of vector rows).
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// True when the corpus holds no documents.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// The ordered document sequence.
    pub fn documents(&self) -> &[GarmentDocument] {
        &self.documents
    }

    /// The paired vector rows.
    pub fn vectors(&self) -> &VectorArray {
        &self.vectors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn doc(id: &str) -> GarmentDocument {
        GarmentDocument::new(id, format!("garment {id}"), "garments/")
    }

    #[test]
    fn codec_round_trips() {
        let array =
            VectorArray::from_rows(vec![vec![1.0, 2.0, 3.0], vec![-0.5, 0.25, 4.5]]).unwrap();
        let decoded = VectorArray::decode(&array.encode()).unwrap();
        assert_eq!(decoded, array);
        assert_eq!(decoded.rows(), 2);
        assert_eq!(decoded.dim(), 3);
        assert_eq!(decoded.row(1), &[-0.5, 0.25, 4.5]);
    }

    #[test]
    fn empty_array_round_trips() {
        let array = VectorArray::default();
        let decoded = VectorArray::decode(&array.encode()).unwrap();
        assert_eq!(decoded.rows(), 0);
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let array = VectorArray::from_rows(vec![vec![1.0, 2.0]]).unwrap();
        let mut bytes = array.encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert_eq!(
            VectorArray::decode(&bytes),
            Err(CorpusInconsistencyError::ChecksumMismatch)
        );
    }

    #[test]
    fn truncated_artifact_is_rejected() {
        let array = VectorArray::from_rows(vec![vec![1.0, 2.0]]).unwrap();
        let bytes = array.encode();
        let err = VectorArray::decode(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, CorpusInconsistencyError::Truncated { .. }));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = VectorArray::from_rows(vec![vec![1.0]]).unwrap().encode();
        bytes[0] = b'X';
        assert_eq!(
            VectorArray::decode(&bytes),
            Err(CorpusInconsistencyError::BadMagic)
        );
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = VectorArray::from_rows(vec![vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert_eq!(
            err,
            CorpusInconsistencyError::RaggedRow {
                expected: 2,
                got: 1
            }
        );
    }

    #[test]
    fn corpus_rejects_count_mismatch() {
        let vectors = VectorArray::from_rows(vec![vec![0.0, 1.0]]).unwrap();
        let err = Corpus::new(vec![doc("a"), doc("b")], vectors).unwrap_err();
        assert_eq!(
            err,
            CorpusInconsistencyError::CountMismatch {
                documents: 2,
                rows: 1
            }
        );
    }

    #[test]
    fn corpus_pairs_by_index() {
        let vectors =
            VectorArray::from_rows(vec![vec![0.0, 1.0], vec![1.0, 0.0]]).unwrap();
        let corpus = Corpus::new(vec![doc("a"), doc("b")], vectors).unwrap();
        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus.documents()[1].id, "b");
        assert_eq!(corpus.vectors().row(1), &[1.0, 0.0]);
    }
}
