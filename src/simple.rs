//! Prefix-bucketed k-mismatch index.
//!
//! Keys are permuted, grouped by the `s` most significant (splitter) bits of
//! the permuted word, and only the remaining `64 - s` payload bits are
//! stored — the splitter is implied by the bucket. A query scans exactly one
//! bucket: every stored key there shares the query's splitter, so the full
//! Hamming distance equals the payload Hamming distance.

use crate::boundary::BucketBoundary;
use crate::error::{Error, Result};
use crate::packed::PackedVec;
use crate::perm::BlockPerm;
use crate::SearchResult;
use std::io::{Read, Write};

/// Prefix-bucketed index over 64-bit keys. Immutable once built.
#[derive(Debug)]
pub struct SimpleIndex {
    perm: BlockPerm,
    n: u64,
    entries: PackedVec,
    boundary: BucketBoundary,
}

impl SimpleIndex {
    /// Build the index from a corpus of keys.
    ///
    /// Input order is irrelevant; duplicates are preserved and each
    /// occurrence matches independently. Build allocates one counter per
    /// bucket, so it is intended for splitter widths where `2^s` counters
    /// fit comfortably in memory.
    pub fn build(perm: BlockPerm, keys: &[u64]) -> Self {
        let s = perm.splitter_bits() as u32;
        let num_buckets = 1usize << s;

        let mut counts = vec![0u64; num_buckets];
        for &x in keys {
            counts[(perm.permute(x) >> (64 - s)) as usize] += 1;
        }
        let boundary = BucketBoundary::from_counts(&counts);

        // Reuse the counting array as per-bucket write cursors.
        let mut cursors = counts;
        let mut acc = 0u64;
        for c in cursors.iter_mut() {
            let bucket_count = *c;
            *c = acc;
            acc += bucket_count;
        }

        let payload_mask = u64::MAX >> s;
        let mut entries = PackedVec::new(keys.len(), (64 - s) as u8);
        for &x in keys {
            let p = perm.permute(x);
            let bucket = (p >> (64 - s)) as usize;
            entries.set(cursors[bucket] as usize, p & payload_mask);
            cursors[bucket] += 1;
        }

        Self {
            perm,
            n: keys.len() as u64,
            entries,
            boundary,
        }
    }

    /// Return every stored key within Hamming distance `errors` of `q`,
    /// with multiplicity, in scan order, together with the number of
    /// payload entries the scan visited.
    ///
    /// # Panics
    ///
    /// If `errors` exceeds the family's error budget.
    pub fn search(&self, q: u64, errors: u8) -> SearchResult {
        assert!(errors <= self.perm.max_errors());
        let s = self.perm.splitter_bits() as u32;
        let q_perm = self.perm.permute(q);
        let bucket = q_perm >> (64 - s);
        let range = self.boundary.bucket_range(bucket);
        let candidates = range.len() as u64;

        let p_low = q_perm & (u64::MAX >> s);
        let prefix = bucket << (64 - s);
        let mut matches = Vec::new();
        for j in range {
            let entry = self.entries.get(j);
            if (p_low ^ entry).count_ones() <= errors as u32 {
                matches.push(self.perm.inverse_permute(prefix | entry));
            }
        }
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
        let s = self.perm.splitter_bits() as u32;
        let bucket = self.perm.permute(q) >> (64 - s);
        self.boundary.bucket_range(bucket).len() as u64
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
        self.entries.heap_bytes() + self.boundary.heap_bytes()
    }

    /// Serialize to a stable little-endian encoding.
    ///
    /// Format: magic `HBSIMPL1`, blocks/max_errors/id u8, n u64, then the
    /// length-prefixed payload column and boundary encodings.
    pub fn to_bytes(&self) -> Vec<u8> {
        let entries = self.entries.to_bytes();
        let boundary = self.boundary.to_bytes();
        let mut out = Vec::with_capacity(8 + 3 + 8 + 16 + entries.len() + boundary.len());
        out.extend_from_slice(b"HBSIMPL1");
        out.push(self.perm.blocks());
        out.push(self.perm.max_errors());
        out.push(self.perm.id());
        out.extend_from_slice(&self.n.to_le_bytes());
        out.extend_from_slice(&(entries.len() as u64).to_le_bytes());
        out.extend_from_slice(&entries);
        out.extend_from_slice(&(boundary.len() as u64).to_le_bytes());
        out.extend_from_slice(&boundary);
        out
    }

    /// Deserialize from `to_bytes()` output.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        const MAGIC: &[u8; 8] = b"HBSIMPL1";
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
                "bad magic for SimpleIndex".to_string(),
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
        let n = u64::from_le_bytes(take(8)?.try_into().unwrap());

        let entries_len = u64::from_le_bytes(take(8)?.try_into().unwrap()) as usize;
        let entries = PackedVec::from_bytes(take(entries_len)?)?;
        let boundary_len = u64::from_le_bytes(take(8)?.try_into().unwrap()) as usize;
        let boundary = BucketBoundary::from_bytes(take(boundary_len)?)?;

        if off != bytes.len() {
            return Err(Error::InvalidEncoding(
                "trailing bytes after SimpleIndex".to_string(),
            ));
        }

        let s = perm.splitter_bits() as u32;
        if entries.len() as u64 != n {
            return Err(Error::InvalidEncoding(format!(
                "payload column holds {} entries, header claims {n}",
                entries.len()
            )));
        }
        if entries.width() as u32 != 64 - s {
            return Err(Error::InvalidEncoding(format!(
                "payload width {} does not match splitter width {s}",
                entries.width()
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
            entries,
            boundary,
        })
    }

    /// Write the `to_bytes()` encoding to a stream.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }

    /// Read an index previously written with [`SimpleIndex::write_to`].
    /// Consumes the stream to its end.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Self::from_bytes(&buf)
    }
}
