//! Exact nearest-neighbor search over the corpus vector array.

use std::cmp::Ordering;
use std::fmt;

use rayon::prelude::*;

use crate::corpus::VectorArray;

/// The query vector's dimensionality disagrees with the corpus rows.
/// A caller contract violation, surfaced immediately and never coerced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    /// Query dimension differs from the array dimension.
    DimensionMismatch {
        /// Dimension of the corpus rows.
        expected: usize,
        /// Dimension of the query vector.
        got: usize,
    },
}

impl fmt::Display for SearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DimensionMismatch { expected, got } => write!(
                f,
                "query vector has dimension {got}, corpus rows have {expected}"
            ),
        }
    }
}

impl std::error::Error for SearchError {}

/// One scored row: its position in the corpus and its squared L2 distance
/// to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    /// Row index into the corpus; the positional join key.
    pub row: usize,
    /// Squared Euclidean distance to the query vector.
    pub distance: f32,
}

/// Brute-force exact L2 index over a borrowed vector array.
///
/// There is no index structure to maintain: the "index" is the array
/// itself, scanned linearly. Rebuilding means pointing at a new array.
pub struct ExactL2Index<'a> {
    vectors: &'a VectorArray,
    parallel: bool,
}

impl<'a> ExactL2Index<'a> {
    /// Wraps a vector array for searching. The scan is sequential unless
    /// [`with_parallel_scan`](Self::with_parallel_scan) enables the rayon
    /// path.
    pub fn new(vectors: &'a VectorArray) -> Self {
        Self {
            vectors,
            parallel: false,
        }
    }

    /// Toggles the data-parallel row scan. Results are identical to the
    /// sequential scan, ties included.
    pub fn with_parallel_scan(mut self, enabled: bool) -> Self {
        self.parallel = enabled;
        self
    }

    /// Returns the `min(k, n)` nearest rows to `query`, ascending by
    /// squared L2 distance. Equal distances keep original row order.
    ///
    /// `k == 0` and an empty corpus both yield an empty result rather
    /// than an error; a dimension mismatch is an error.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, SearchError> {
        let rows = self.vectors.rows();
        if k == 0 || rows == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.vectors.dim() {
            return Err(SearchError::DimensionMismatch {
                expected: self.vectors.dim(),
                got: query.len(),
            });
        }

        let mut hits: Vec<SearchHit> = if self.parallel {
            (0..rows)
                .into_par_iter()
                .map(|row| SearchHit {
                    row,
                    distance: squared_l2(self.vectors.row(row), query),
                })
                .collect()
        } else {
            (0..rows)
                .map(|row| SearchHit {
                    row,
                    distance: squared_l2(self.vectors.row(row), query),
                })
                .collect()
        };

        // Row index breaks ties, so both scan paths merge identically.
        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
                .then(a.row.cmp(&b.row))
        });
        hits.truncate(k.min(rows));
        Ok(hits)
    }
}

/// Squared Euclidean distance, accumulated in f64 for stability.
fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut sum = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let d = (*x - *y) as f64;
        sum += d * d;
    }
    sum as f32
}
