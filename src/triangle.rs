//! Triangle-inequality k-mismatch index with a SIMD candidate filter.
//!
//! # Intuition First
//!
//! Fix the reference key `R = 0`. For any stored key A and query Q the
//! triangle inequality gives `|H(A, 0) - H(Q, 0)| <= H(A, Q)`, and `H(x, 0)`
//! is just `popcount(x)`. So a key within distance `e` of the query must
//! have popcount inside `[popcount(q) - e, popcount(q) + e]` — and since bit
//! permutations preserve popcount, that band can be baked into the bucket
//! id. Entries are grouped by splitter prefix AND popcount; a query scans
//! only the popcount band of its prefix bucket, stored as one contiguous
//! slice.
//!
//! # The split payload
//!
//! The payload is cut into three bit-planes of the permuted key: a 32-bit
//! *low* column, a `mid` column of the bits between low and prefix, and the
//! prefix itself (implied by the bucket). The low column stores
//! `low XOR mid`, not `low`: Hamming distance over `low XOR mid` never
//! exceeds the distance over low and mid together, so a 32-bit filter on the
//! XOR plane admits every true match at 4-lane SIMD throughput and the
//! survivors are re-checked against the full 64-bit permuted key.

use crate::boundary::BucketBoundary;
use crate::error::{Error, Result};
use crate::packed::PackedVec;
use crate::perm::BlockPerm;
use crate::SearchResult;
use std::io::{Read, Write};
use std::ops::Range;

/// Width of the cardinality field inside the composite bucket id.
const DISTANCE_BITS: u32 = 6;
/// Largest value the cardinality field can hold. `popcount(x) = 64` is
/// clamped here; sound because the all-ones key is the only such key and the
/// query band clamps identically (the confirm step settles the rest).
const CARDINALITY_MAX: u64 = 63;
/// Width of the SIMD-scanned low column. Keep word-aligned.
const LOW_BITS: u32 = 32;
const LOW_MASK: u64 = (1u64 << LOW_BITS) - 1;
const MID_SHIFT: u32 = LOW_BITS;

/// Popcount-stratified index over 64-bit keys. Immutable once built.
#[derive(Debug)]
pub struct TriangleIndex {
    perm: BlockPerm,
    n: u64,
    /// Effective prefix width `s - 6`; the remaining splitter bits hold the
    /// cardinality field.
    prefix_bits: u32,
    mid_mask: u64,
    low_entries: Vec<u32>,
    mid_entries: PackedVec,
    boundary: BucketBoundary,
}

impl TriangleIndex {
    /// Build the index from a corpus of keys.
    ///
    /// Input order is irrelevant; duplicates are preserved. Build allocates
    /// one counter per `(prefix, cardinality)` composite bucket.
    ///
    /// # Panics
    ///
    /// If the family's splitter is not in `7..=37` bits: the cardinality
    /// field needs 6 of them and the mid column must keep at least one.
    pub fn build(perm: BlockPerm, keys: &[u64]) -> Self {
        let s = perm.splitter_bits() as u32;
        assert!(s > DISTANCE_BITS, "splitter must be wider than the cardinality field");
        let prefix_bits = s - DISTANCE_BITS;
        assert!(prefix_bits < LOW_BITS, "mid column must be non-empty");
        let mid_bits = (64 - LOW_BITS - prefix_bits) as u8;
        let mid_mask = (1u64 << mid_bits) - 1;
        let num_buckets = 1usize << s;

        let mut counts = vec![0u64; num_buckets];
        for &x in keys {
            counts[bucket_id(&perm, prefix_bits, x) as usize] += 1;
        }
        let boundary = BucketBoundary::from_counts(&counts);

        let mut cursors = counts;
        let mut acc = 0u64;
        for c in cursors.iter_mut() {
            let bucket_count = *c;
            *c = acc;
            acc += bucket_count;
        }

        let mut low_entries = vec![0u32; keys.len()];
        let mut mid_entries = PackedVec::new(keys.len(), mid_bits);
        for &x in keys {
            let bucket = bucket_id(&perm, prefix_bits, x) as usize;
            let p = perm.permute(x);
            let low = p & LOW_MASK;
            let mid = (p >> MID_SHIFT) & mid_mask;
            let pos = cursors[bucket] as usize;
            cursors[bucket] += 1;
            low_entries[pos] = (low ^ mid) as u32;
            mid_entries.set(pos, mid);
        }

        Self {
            perm,
            n: keys.len() as u64,
            prefix_bits,
            mid_mask,
            low_entries,
            mid_entries,
            boundary,
        }
    }

    /// Return every stored key within Hamming distance `errors` of `q`,
    /// with multiplicity, in scan order, together with the number of
    /// payload entries in the scanned popcount band.
    ///
    /// # Panics
    ///
    /// If `errors` exceeds the family's error budget.
    pub fn search(&self, q: u64, errors: u8) -> SearchResult {
        assert!(errors <= self.perm.max_errors());
        let range = self.scan_range(q, errors);
        let candidates = range.len() as u64;
        let mut matches = Vec::new();
        if candidates == 0 {
            return SearchResult { matches, candidates };
        }
        if errors >= 6 {
            matches.reserve(128);
        }

        let q_perm = self.perm.permute(q);
        let high_shift = 64 - self.prefix_bits;
        let q_high = (q_perm >> high_shift) << high_shift;
        let q_mid = (q_perm >> MID_SHIFT) & self.mid_mask;
        let q_xor = (q_perm & LOW_MASK) as u32 ^ q_mid as u32;

        self.scan(range, q_xor, q_high, q_perm, errors, &mut matches);
        SearchResult { matches, candidates }
    }

    /// Number of entries a `search(q, errors)` scan would visit, without
    /// scanning.
    ///
    /// # Panics
    ///
    /// If `errors` exceeds the family's error budget.
    pub fn count_candidates(&self, q: u64, errors: u8) -> u64 {
        assert!(errors <= self.perm.max_errors());
        self.scan_range(q, errors).len() as u64
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.n
    }

    /// Return true if the index holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// The permutation this index buckets with.
    #[must_use]
    pub fn perm(&self) -> &BlockPerm {
        &self.perm
    }

    /// Approximate heap memory usage in bytes.
    pub fn heap_bytes(&self) -> usize {
        self.low_entries.capacity() * 4
            + self.mid_entries.heap_bytes()
            + self.boundary.heap_bytes()
    }

    /// Contiguous payload slice of the query's popcount band.
    fn scan_range(&self, q: u64, errors: u8) -> Range<usize> {
        let prefix = self.perm.permute(q) >> (64 - self.prefix_bits);
        let c = u64::from(q.count_ones());
        let lo = c.saturating_sub(u64::from(errors)).min(CARDINALITY_MAX);
        let hi = (c + u64::from(errors)).min(CARDINALITY_MAX);
        self.boundary
            .bucket_range_span((prefix << DISTANCE_BITS) | lo, (prefix << DISTANCE_BITS) | hi)
    }

    /// Scan the low column over `range`, confirming filter survivors.
    fn scan(
        &self,
        range: Range<usize>,
        q_xor: u32,
        q_high: u64,
        q_perm: u64,
        errors: u8,
        out: &mut Vec<u64>,
    ) {
        let r = range.end;
        let mut j = range.start;

        #[cfg(all(target_arch = "x86_64", target_feature = "sse2"))]
        {
            unsafe {
                use core::arch::x86_64::*;
                let base = self.low_entries.as_ptr();
                // Scalar head until the load address crosses a 16-byte
                // boundary; u32 elements land there within three steps.
                while j < r && (base.add(j) as usize) % 16 != 0 {
                    self.probe(q_xor, q_high, q_perm, errors, j, out);
                    j += 1;
                }

                let query = _mm_set1_epi32(q_xor as i32);
                let threshold = _mm_set1_epi32(i32::from(errors) + 1);
                while j + 4 <= r {
                    _mm_prefetch::<_MM_HINT_T0>(base.add(j + 4) as *const i8);
                    let lanes = _mm_load_si128(base.add(j) as *const __m128i);
                    let diff = _mm_xor_si128(lanes, query);
                    let pops = popcount_epi32(diff);
                    let mut mask =
                        (_mm_movemask_epi8(_mm_cmpgt_epi32(threshold, pops)) as u32) & 0x1111;
                    while mask != 0 {
                        let lane = mask.trailing_zeros() as usize / 4;
                        mask &= mask - 1;
                        self.confirm(q_high, q_perm, errors, j + lane, out);
                    }
                    j += 4;
                }
            }
        }

        // Scalar tail, and the whole scan on targets without the vector path.
        while j < r {
            self.probe(q_xor, q_high, q_perm, errors, j, out);
            j += 1;
        }
    }

    /// 32-bit filter on the XOR plane, then confirm.
    #[inline]
    fn probe(&self, q_xor: u32, q_high: u64, q_perm: u64, errors: u8, j: usize, out: &mut Vec<u64>) {
        if (q_xor ^ self.low_entries[j]).count_ones() <= u32::from(errors) {
            self.confirm(q_high, q_perm, errors, j, out);
        }
    }

    /// Reconstruct the full permuted key at `j` and apply the 64-bit check.
    #[inline]
    fn confirm(&self, q_high: u64, q_perm: u64, errors: u8, j: usize, out: &mut Vec<u64>) {
        let mid = self.mid_entries.get(j);
        let low = u64::from(self.low_entries[j]) ^ mid;
        let curr = q_high | (mid << MID_SHIFT) | low;
        if (q_perm ^ curr).count_ones() <= u32::from(errors) {
            out.push(self.perm.inverse_permute(curr));
        }
    }

    /// Serialize to a stable little-endian encoding.
    ///
    /// Format: magic `HBTRIAN1`, blocks/max_errors/id u8, n u64, the low
    /// column (count-prefixed u32 words), then the length-prefixed mid
    /// column and boundary encodings.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mid = self.mid_entries.to_bytes();
        let boundary = self.boundary.to_bytes();
        let mut out =
            Vec::with_capacity(8 + 3 + 16 + self.low_entries.len() * 4 + 16 + mid.len() + boundary.len());
        out.extend_from_slice(b"HBTRIAN1");
        out.push(self.perm.blocks());
        out.push(self.perm.max_errors());
        out.push(self.perm.id());
        out.extend_from_slice(&self.n.to_le_bytes());
        out.extend_from_slice(&(self.low_entries.len() as u64).to_le_bytes());
        for &v in &self.low_entries {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&(mid.len() as u64).to_le_bytes());
        out.extend_from_slice(&mid);
        out.extend_from_slice(&(boundary.len() as u64).to_le_bytes());
        out.extend_from_slice(&boundary);
        out
    }

    /// Deserialize from `to_bytes()` output.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        const MAGIC: &[u8; 8] = b"HBTRIAN1";
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
                "bad magic for TriangleIndex".to_string(),
            ));
        }
        let blocks = take(1)?[0];
        let max_errors = take(1)?[0];
        let id = take(1)?[0];
        if !(2..=8).contains(&blocks) || max_errors == 0 || max_errors >= blocks || id >= blocks {
            return Err(Error::InvalidEncoding(format!(
                "bad permutation parameters (b={blocks}, k={max_errors}, id={id})"
            )));
        }
        let perm = BlockPerm::new(blocks, max_errors, id);
        let s = perm.splitter_bits() as u32;
        if s <= DISTANCE_BITS || s - DISTANCE_BITS >= LOW_BITS {
            return Err(Error::InvalidEncoding(format!(
                "splitter width {s} unusable for a triangle index"
            )));
        }
        let prefix_bits = s - DISTANCE_BITS;
        let n = u64::from_le_bytes(take(8)?.try_into().unwrap());

        let low_len = u64::from_le_bytes(take(8)?.try_into().unwrap()) as usize;
        if low_len as u64 != n {
            return Err(Error::InvalidEncoding(format!(
                "low column holds {low_len} entries, header claims {n}"
            )));
        }
        if low_len.saturating_mul(4) > bytes.len() {
            return Err(Error::InvalidEncoding(format!(
                "low column length ({low_len}) too large for input ({} bytes)",
                bytes.len()
            )));
        }
        let mut low_entries = Vec::with_capacity(low_len);
        for _ in 0..low_len {
            low_entries.push(u32::from_le_bytes(take(4)?.try_into().unwrap()));
        }

        let mid_len = u64::from_le_bytes(take(8)?.try_into().unwrap()) as usize;
        let mid_entries = PackedVec::from_bytes(take(mid_len)?)?;
        let boundary_len = u64::from_le_bytes(take(8)?.try_into().unwrap()) as usize;
        let boundary = BucketBoundary::from_bytes(take(boundary_len)?)?;

        if off != bytes.len() {
            return Err(Error::InvalidEncoding(
                "trailing bytes after TriangleIndex".to_string(),
            ));
        }

        if mid_entries.len() as u64 != n {
            return Err(Error::InvalidEncoding(format!(
                "mid column holds {} entries, header claims {n}",
                mid_entries.len()
            )));
        }
        if u32::from(mid_entries.width()) != 64 - LOW_BITS - prefix_bits {
            return Err(Error::InvalidEncoding(format!(
                "mid width {} does not match splitter width {s}",
                mid_entries.width()
            )));
        }
        if boundary.num_buckets() != 1u64 << s || boundary.len() as u64 != (1u64 << s) + n {
            return Err(Error::InvalidEncoding(
                "boundary shape does not match the permutation parameters".to_string(),
            ));
        }

        Ok(Self {
            perm,
            n,
            prefix_bits,
            mid_mask: (1u64 << (64 - LOW_BITS - prefix_bits)) - 1,
            low_entries,
            mid_entries,
            boundary,
        })
    }

    /// Write the `to_bytes()` encoding to a stream.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }

    /// Read an index previously written with [`TriangleIndex::write_to`].
    /// Consumes the stream to its end.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Self::from_bytes(&buf)
    }
}

/// Composite bucket id: effective prefix, then the clamped cardinality.
#[inline]
fn bucket_id(perm: &BlockPerm, prefix_bits: u32, x: u64) -> u64 {
    let cardinality = u64::from(x.count_ones()).min(CARDINALITY_MAX);
    ((perm.permute(x) >> (64 - prefix_bits)) << DISTANCE_BITS) | cardinality
}

#[cfg(all(target_arch = "x86_64", target_feature = "sse2"))]
#[inline]
unsafe fn popcount_epi32(v: core::arch::x86_64::__m128i) -> core::arch::x86_64::__m128i {
    use core::arch::x86_64::*;
    // SWAR popcount in each 32-bit lane; SSE2 has no vector popcount and
    // the last fold uses shifts because lane-wise 32-bit multiply does not
    // exist either.
    let m1 = _mm_set1_epi32(0x5555_5555);
    let m2 = _mm_set1_epi32(0x3333_3333);
    let m4 = _mm_set1_epi32(0x0F0F_0F0F);
    let v = _mm_sub_epi32(v, _mm_and_si128(_mm_srli_epi32::<1>(v), m1));
    let v = _mm_add_epi32(_mm_and_si128(v, m2), _mm_and_si128(_mm_srli_epi32::<2>(v), m2));
    let v = _mm_and_si128(_mm_add_epi32(v, _mm_srli_epi32::<4>(v)), m4);
    let v = _mm_add_epi32(v, _mm_srli_epi32::<8>(v));
    let v = _mm_add_epi32(v, _mm_srli_epi32::<16>(v));
    _mm_and_si128(v, _mm_set1_epi32(0x3F))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut v: Vec<u64>) -> Vec<u64> {
        v.sort_unstable();
        v
    }

    /// Deterministic keys with `ones` bits set among the low `span` bits.
    fn keys_with_popcount(count: usize, ones: u32, span: u32, seed: u64) -> Vec<u64> {
        let mut state = seed;
        let mut next = move || {
            state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
            let mut z = state;
            z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            z ^ (z >> 31)
        };
        let mut out = Vec::with_capacity(count);
        while out.len() < count {
            let mut key = 0u64;
            while key.count_ones() < ones {
                key |= 1u64 << (next() % u64::from(span));
            }
            if key.count_ones() == ones && !out.contains(&key) {
                out.push(key);
            }
        }
        out
    }

    #[test]
    fn test_empty_corpus() {
        let idx = TriangleIndex::build(BlockPerm::new(4, 3, 0), &[]);
        assert!(idx.is_empty());
        let res = idx.search(0, 0);
        assert!(res.matches.is_empty());
        assert_eq!(res.candidates, 0);
    }

    #[test]
    fn test_singleton_identity() {
        let key = 0xDEAD_BEEF_CAFE_BABE;
        let idx = TriangleIndex::build(BlockPerm::new(4, 3, 0), &[key]);
        let res = idx.search(key, 0);
        assert_eq!(res.matches, vec![key]);
        assert_eq!(res.candidates, 1);
    }

    #[test]
    fn test_single_bit_flips() {
        let idx = TriangleIndex::build(BlockPerm::new(4, 3, 2), &[0x0, 0x1, 0x3]);
        assert_eq!(sorted(idx.search(0x0, 1).matches), vec![0x0, 0x1]);
        assert_eq!(sorted(idx.search(0x0, 2).matches), vec![0x0, 0x1, 0x3]);
    }

    #[test]
    fn test_duplicates_preserved() {
        let a = 0x1234_5678_9ABC_DEF0;
        let idx = TriangleIndex::build(BlockPerm::new(4, 3, 1), &[a, a, a]);
        let res = idx.search(a, 0);
        assert_eq!(res.matches, vec![a, a, a]);
        assert_eq!(res.candidates, 3);
    }

    #[test]
    fn test_popcount_band_excludes_outliers() {
        // Same effective prefix for everything (top bits zero), so the band
        // is the only thing separating the outlier from the scan.
        let mut keys = keys_with_popcount(300, 10, 48, 7);
        let outlier = (1u64 << 30) - 1; // popcount 30, prefix 0
        keys.push(outlier);
        let idx = TriangleIndex::build(BlockPerm::new(4, 3, 0), &keys);

        let q = keys[0];
        let res = idx.search(q, 3);
        // Band [7, 13] cannot reach popcount 30: the outlier is not even a
        // candidate, let alone a match.
        assert_eq!(res.candidates, 300);
        assert!(!res.matches.contains(&outlier));
        for m in &res.matches {
            let d = (m.count_ones() as i32 - q.count_ones() as i32).unsigned_abs();
            assert!(d <= 3);
        }
    }

    #[test]
    fn test_all_ones_key_clamped_band() {
        let keys = [u64::MAX, 0u64, u64::MAX >> 1];
        let idx = TriangleIndex::build(BlockPerm::new(4, 3, 0), &keys);
        assert_eq!(idx.search(u64::MAX, 0).matches, vec![u64::MAX]);
        // One flip away from all ones; band [62, 63] must still cover the
        // clamped cardinality of the all-ones key.
        let q = u64::MAX ^ (1 << 7);
        assert_eq!(idx.search(q, 1).matches, vec![u64::MAX]);
    }

    #[test]
    fn test_long_bucket_exercises_vector_body() {
        // Hundreds of same-prefix same-popcount keys make one long slice so
        // the scan runs head, 4-lane body, and tail.
        let keys = keys_with_popcount(500, 12, 48, 99);
        let idx = TriangleIndex::build(BlockPerm::new(4, 3, 0), &keys);
        for q in keys.iter().step_by(37) {
            for e in 0..=3u8 {
                let got = sorted(idx.search(*q, e).matches);
                let want = sorted(
                    keys.iter()
                        .copied()
                        .filter(|k| (k ^ q).count_ones() <= u32::from(e))
                        .collect(),
                );
                assert_eq!(got, want);
            }
        }
    }

    #[test]
    fn test_count_only_matches_scan() {
        let keys = keys_with_popcount(64, 20, 64, 3);
        let idx = TriangleIndex::build(BlockPerm::new(8, 6, 5), &keys);
        for q in keys.iter().take(8) {
            for e in [0u8, 2, 6] {
                let res = idx.search(*q, e);
                assert_eq!(idx.count_candidates(*q, e), res.candidates);
                assert!(res.candidates >= res.matches.len() as u64);
            }
        }
    }

    #[test]
    fn test_roundtrip() {
        let keys: Vec<u64> = (0..800u64).map(|i| i.wrapping_mul(0x2545_F491_4F6C_DD1D)).collect();
        let idx = TriangleIndex::build(BlockPerm::new(4, 3, 3), &keys);
        let idx2 = TriangleIndex::from_bytes(&idx.to_bytes()).unwrap();
        assert_eq!(idx2.len(), idx.len());
        for q in keys.iter().take(40) {
            for e in 0..=3 {
                let a = idx.search(*q, e);
                let b = idx2.search(*q, e);
                assert_eq!(a.matches, b.matches);
                assert_eq!(a.candidates, b.candidates);
            }
        }
    }

    #[test]
    fn test_rejects_truncated_input() {
        let idx = TriangleIndex::build(BlockPerm::new(4, 3, 0), &[1, 2, 3]);
        let bytes = idx.to_bytes();
        assert!(TriangleIndex::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }
}
