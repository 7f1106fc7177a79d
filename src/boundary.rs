//! Succinct bucket boundaries with constant-time range lookup.
//!
//! # Intuition First
//!
//! A bucketed index needs to answer one question fast: *where does bucket i
//! start and end in the payload array?* Storing an offset per bucket costs
//! 64 bits each — for `2^16` buckets that is half a megabyte of pure
//! bookkeeping. Instead, write the bucket sizes in unary: for each bucket,
//! `counts[i]` zeros then a single 1. The result is a bitvector of length
//! `B + N` with exactly `B` ones, and the end of bucket i is the position of
//! its delimiter 1. A select-1 structure finds that position in $O(1)$ with
//! $o(B + N)$ extra bits.
//!
//! # Layout
//!
//! Each 512-bit block is stored as 10 x 64-bit words:
//! - Word 0: Absolute rank (number of 1s before this block)
//! - Word 1: Relative ranks (7 x 9-bit cumulative counts within the block)
//! - Word 2-9: Raw data (512 bits)
//!
//! Once a block header is in cache, everything needed to finish a select
//! inside that block is too. A coarse sample stores the block containing
//! every 512th one; a query binary-searches the absolute ranks between two
//! samples, walks the relative ranks, and finishes inside one word.

use crate::error::{Error, Result};
use std::ops::Range;

const BLOCK_WORDS: usize = 10;
const SELECT_SAMPLE: u64 = 512;

/// Bucket delimiter bitvector with select-1 based range lookup.
///
/// Immutable once built. For bucket sizes `counts[0..B)` over `N` payload
/// entries the vector is `counts[0]` zeros, a 1, `counts[1]` zeros, a 1, ...
/// so `bucket_range(i).len() == counts[i]` and the payload slices of
/// consecutive buckets tile `[0, N)` in order.
pub struct BucketBoundary {
    /// Interleaved blocks: [abs_rank, rel_ranks, data0, ..., data7, ...]
    storage: Vec<u64>,
    /// Block index of every 512th one-bit.
    select_samples: Vec<u32>,
    num_buckets: u64,
    len: usize,
}

impl std::fmt::Debug for BucketBoundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketBoundary")
            .field("len", &self.len)
            .field("num_buckets", &self.num_buckets)
            .finish()
    }
}

impl BucketBoundary {
    /// Build the delimiter vector from per-bucket entry counts.
    ///
    /// # Panics
    ///
    /// If `counts` is empty.
    pub fn from_counts(counts: &[u64]) -> Self {
        assert!(!counts.is_empty(), "at least one bucket required");
        let n: u64 = counts.iter().sum();
        let len = counts.len() + n as usize;
        let mut words = vec![0u64; len.div_ceil(64)];
        let mut pos = 0usize;
        for &c in counts {
            pos += c as usize;
            words[pos / 64] |= 1u64 << (pos % 64);
            pos += 1;
        }
        let boundary = Self::from_words(&words, len);
        debug_assert_eq!(boundary.num_buckets, counts.len() as u64);
        boundary
    }

    /// Build the rank/select scaffolding over raw delimiter words.
    fn from_words(words: &[u64], len: usize) -> Self {
        let num_blocks = len.div_ceil(512);
        let mut storage = vec![0u64; num_blocks * BLOCK_WORDS + BLOCK_WORDS];
        let mut select_samples = Vec::new();

        let mut total_rank = 0u64;
        let mut next_threshold = 0u64;

        for i in 0..num_blocks {
            let base = i * BLOCK_WORDS;
            storage[base] = total_rank;
            while total_rank >= next_threshold {
                select_samples.push(i as u32);
                next_threshold += SELECT_SAMPLE;
            }

            let mut relative_ranks = 0u64;
            let mut current_rel = 0u64;
            for j in 0..8 {
                let data_idx = i * 8 + j;
                let word = if data_idx < words.len() { words[data_idx] } else { 0 };
                storage[base + 2 + j] = word;
                if j > 0 {
                    relative_ranks |= current_rel << (9 * (j - 1));
                }
                current_rel += word.count_ones() as u64;
            }
            storage[base + 1] = relative_ranks;
            total_rank += current_rel;
        }

        // Sentinel block: final absolute rank, terminates the binary search.
        storage[num_blocks * BLOCK_WORDS] = total_rank;
        while total_rank >= next_threshold {
            select_samples.push(num_blocks as u32);
            next_threshold += SELECT_SAMPLE;
        }

        Self {
            storage,
            select_samples,
            num_buckets: total_rank,
            len,
        }
    }

    /// Number of buckets (ones in the delimiter vector).
    #[must_use]
    pub fn num_buckets(&self) -> u64 {
        self.num_buckets
    }

    /// Total length of the delimiter vector in bits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Return true if the vector has length 0 (never after a build).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Approximate heap memory usage in bytes.
    pub fn heap_bytes(&self) -> usize {
        self.storage.capacity() * 8 + self.select_samples.capacity() * 4
    }

    /// Half-open payload slice `[l, r)` of bucket `i`.
    ///
    /// # Panics
    ///
    /// If `i >= num_buckets()`.
    #[inline]
    pub fn bucket_range(&self, i: u64) -> Range<usize> {
        self.bucket_range_span(i, i)
    }

    /// Half-open payload slice covering buckets `lo ..= hi` (stored
    /// contiguously, so the union is a single slice).
    ///
    /// # Panics
    ///
    /// If `lo > hi` or `hi >= num_buckets()`.
    #[inline]
    pub fn bucket_range_span(&self, lo: u64, hi: u64) -> Range<usize> {
        assert!(lo <= hi && hi < self.num_buckets);
        // The delimiter of bucket i sits i positions past the end of its
        // payload, so subtracting the bucket index recovers payload offsets.
        let l = if lo == 0 {
            0
        } else {
            self.select1(lo - 1) + 1 - lo as usize
        };
        let r = self.select1(hi) - hi as usize;
        l..r
    }

    /// Position of the k-th one (0-indexed). Callers keep `k < num_buckets`.
    fn select1(&self, k: u64) -> usize {
        debug_assert!(k < self.num_buckets);
        let target = k + 1;
        let sample_idx = (k / SELECT_SAMPLE) as usize;
        let mut block_low = self.select_samples[sample_idx] as usize;
        let mut block_high = if sample_idx + 1 < self.select_samples.len() {
            self.select_samples[sample_idx + 1] as usize + 1
        } else {
            self.storage.len() / BLOCK_WORDS
        };

        // First block whose absolute rank reaches the target; the one lives
        // in the block before it.
        while block_low < block_high {
            let mid = block_low + (block_high - block_low) / 2;
            if self.storage[mid * BLOCK_WORDS] < target {
                block_low = mid + 1;
            } else {
                block_high = mid;
            }
        }
        let block_idx = block_low - 1;
        let base = block_idx * BLOCK_WORDS;
        let mut remaining = (target - self.storage[base]) as usize;

        let relative_ranks = self.storage[base + 1];
        let mut sub_block = 0;
        for j in 1..8 {
            let rel = ((relative_ranks >> (9 * (j - 1))) & 0x1FF) as usize;
            if rel < remaining {
                sub_block = j;
            } else {
                break;
            }
        }
        if sub_block > 0 {
            remaining -= ((relative_ranks >> (9 * (sub_block - 1))) & 0x1FF) as usize;
        }

        let word = self.storage[base + 2 + sub_block];
        block_idx * 512 + sub_block * 64 + select_in_word(word, remaining - 1)
    }

    /// Serialize to a stable little-endian encoding.
    ///
    /// Only the raw delimiter words are persisted; the select scaffolding is
    /// rebuilt on load. Format: magic `HBBOUND1`, num_buckets u64, len u64,
    /// raw words.
    pub fn to_bytes(&self) -> Vec<u8> {
        let num_words = self.len.div_ceil(64);
        let mut out = Vec::with_capacity(8 + 16 + num_words * 8);
        out.extend_from_slice(b"HBBOUND1");
        out.extend_from_slice(&self.num_buckets.to_le_bytes());
        out.extend_from_slice(&(self.len as u64).to_le_bytes());
        for wi in 0..num_words {
            let word = self.storage[(wi / 8) * BLOCK_WORDS + 2 + (wi % 8)];
            out.extend_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Deserialize from `to_bytes()` output, rebuilding the select support.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        const MAGIC: &[u8; 8] = b"HBBOUND1";
        let mut off = 0usize;

        let mut take = |n: usize| -> Result<&[u8]> {
            if off + n > bytes.len() {
                return Err(Error::InvalidEncoding(
                    "unexpected end of input".to_string(),
                ));
            }
            let slice = &bytes[off..off + n];
            off += n;
            Ok(slice)
        };

        let magic = take(8)?;
        if magic != MAGIC {
            return Err(Error::InvalidEncoding(
                "bad magic for BucketBoundary".to_string(),
            ));
        }
        let num_buckets = u64::from_le_bytes(take(8)?.try_into().unwrap());
        let len = u64::from_le_bytes(take(8)?.try_into().unwrap()) as usize;
        let num_words = len.div_ceil(64);
        if num_words.saturating_mul(8) > bytes.len() {
            return Err(Error::InvalidEncoding(format!(
                "BucketBoundary length ({len} bits) too large for input ({} bytes)",
                bytes.len()
            )));
        }
        if num_buckets > len as u64 {
            return Err(Error::InvalidEncoding(format!(
                "BucketBoundary claims {num_buckets} buckets in {len} bits"
            )));
        }

        let mut words = Vec::with_capacity(num_words);
        for _ in 0..num_words {
            words.push(u64::from_le_bytes(take(8)?.try_into().unwrap()));
        }
        if off != bytes.len() {
            return Err(Error::InvalidEncoding(
                "trailing bytes after BucketBoundary".to_string(),
            ));
        }

        let boundary = Self::from_words(&words, len);
        if boundary.num_buckets != num_buckets {
            return Err(Error::InvalidEncoding(format!(
                "BucketBoundary delimiter count {} does not match header ({num_buckets})",
                boundary.num_buckets
            )));
        }
        Ok(boundary)
    }
}

fn select_in_word(word: u64, k: usize) -> usize {
    #[cfg(all(target_arch = "x86_64", target_feature = "bmi2"))]
    {
        unsafe {
            let mask = 1u64 << k;
            let res = core::arch::x86_64::_pdep_u64(mask, word);
            return res.trailing_zeros() as usize;
        }
    }

    let mut count = 0;
    for i in 0..64 {
        if (word & (1 << i)) != 0 {
            if count == k {
                return i;
            }
            count += 1;
        }
    }
    63
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranges_match_counts() {
        let counts = vec![2, 0, 3, 1, 0, 7];
        let b = BucketBoundary::from_counts(&counts);
        assert_eq!(b.num_buckets(), 6);
        assert_eq!(b.len(), 6 + 13);

        let mut start = 0usize;
        for (i, &c) in counts.iter().enumerate() {
            let r = b.bucket_range(i as u64);
            assert_eq!(r.start, start);
            assert_eq!(r.len(), c as usize);
            start = r.end;
        }
        assert_eq!(start, 13);
    }

    #[test]
    fn test_span_covers_run() {
        let counts = vec![1, 2, 3, 4];
        let b = BucketBoundary::from_counts(&counts);
        assert_eq!(b.bucket_range_span(0, 3), 0..10);
        assert_eq!(b.bucket_range_span(1, 2), 1..6);
        assert_eq!(b.bucket_range_span(2, 2), b.bucket_range(2));
    }

    #[test]
    fn test_all_buckets_empty() {
        let counts = vec![0u64; 1 << 10];
        let b = BucketBoundary::from_counts(&counts);
        for i in 0..(1u64 << 10) {
            assert_eq!(b.bucket_range(i), 0..0);
        }
    }

    #[test]
    fn test_large_skewed_buckets() {
        // Delimiters spread across many 512-bit blocks exercise the sample
        // jump and the block binary search.
        let mut counts = vec![0u64; 4096];
        for (i, c) in counts.iter_mut().enumerate() {
            *c = (i % 17) as u64;
        }
        let b = BucketBoundary::from_counts(&counts);
        let mut start = 0usize;
        for (i, &c) in counts.iter().enumerate() {
            let r = b.bucket_range(i as u64);
            assert_eq!((r.start, r.len()), (start, c as usize), "bucket {i}");
            start = r.end;
        }
    }

    #[test]
    fn test_roundtrip() {
        let counts = vec![3, 0, 0, 5, 1, 0, 2, 9];
        let b = BucketBoundary::from_counts(&counts);
        let bytes = b.to_bytes();
        let b2 = BucketBoundary::from_bytes(&bytes).unwrap();
        assert_eq!(b2.num_buckets(), b.num_buckets());
        assert_eq!(b2.len(), b.len());
        for i in 0..counts.len() as u64 {
            assert_eq!(b2.bucket_range(i), b.bucket_range(i));
        }
    }

    #[test]
    fn test_rejects_corrupted_bucket_count() {
        let b = BucketBoundary::from_counts(&[1, 2, 3]);
        let mut bytes = b.to_bytes();
        // Corrupt the num_buckets field (offset 8..16).
        bytes[8..16].copy_from_slice(&77u64.to_le_bytes());
        assert!(BucketBoundary::from_bytes(&bytes).is_err());
    }
}
