//! Linear-scan baseline: the whole corpus, no index.
//!
//! Serves as the correctness oracle for the bucketed indexes and as the
//! performance baseline in the benches. Every query visits all `N` keys, so
//! `candidates` is always `N` and the match set is exact over the full
//! corpus regardless of any bucketing.

use crate::SearchResult;

/// Unindexed corpus answering queries by exhaustive scan.
#[derive(Clone, Debug, Default)]
pub struct LinearScan {
    keys: Vec<u64>,
}

impl LinearScan {
    /// Store the corpus verbatim.
    pub fn new(keys: &[u64]) -> Self {
        Self { keys: keys.to_vec() }
    }

    /// Every stored key within Hamming distance `errors` of `q`, with
    /// multiplicity, in storage order. O(N).
    pub fn search(&self, q: u64, errors: u8) -> SearchResult {
        let matches = self
            .keys
            .iter()
            .copied()
            .filter(|k| (k ^ q).count_ones() <= u32::from(errors))
            .collect();
        SearchResult {
            matches,
            candidates: self.keys.len() as u64,
        }
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.keys.len() as u64
    }

    /// Return true if the corpus is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
