//! # Succinct k-Mismatch Indexes
//!
//! *All keys within Hamming distance k, without touching most of the corpus.*
//!
//! ## Intuition First
//!
//! Imagine a warehouse of a million 64-bit serial numbers and a smudged
//! label: you can read the number, but up to k digits may be wrong. Checking
//! every stored number works, but almost all of that work is wasted on
//! numbers that are not even close.
//!
//! Cut every number into `b` blocks. With at most `k` wrong bits, at least
//! `b - k` blocks are still perfectly correct — that is the pigeonhole
//! principle. So file the numbers in drawers labeled by a few chosen blocks
//! (the *splitter*), and a lookup only opens the one drawer whose label
//! matches the query's splitter exactly. A family of `b` such filings, each
//! choosing different blocks, guarantees some filing put an undamaged label
//! in front.
//!
//! This crate is one such filing: a per-permutation k-mismatch index. An
//! outer driver instantiates one index per family member and unions the
//! results.
//!
//! ## The Problem
//!
//! The drawer lookup must be cheap in both time and space:
//! - **Offsets**: one pointer per drawer is $O(2^s \log N)$ wasted bits.
//! - **Scanning**: a drawer can still hold thousands of near-misses.
//!
//! The first is solved succinctly: drawer sizes are written in unary into a
//! bitvector of length $2^s + N$ and located with constant-time select-1.
//! The second has two answers, and the crate ships both:
//! - [`SimpleIndex`]: scan the drawer linearly over bit-packed payloads.
//! - [`TriangleIndex`]: subdivide each drawer by popcount (the triangle
//!   inequality against the all-zeros reference bounds how far a match's
//!   popcount can stray), then filter candidates four at a time with SIMD
//!   over a 32-bit XOR-compressed column.
//!
//! ## Historical Context
//!
//! ```text
//! 1969  Minsky-Papert  Posed the approximate-dictionary problem
//! 1992  Manber-Wu      Pigeonhole block filtering for approximate search
//! 1994  Greene et al.  Multi-piece indexing with provable coverage
//! 2012  Norouzi et al. Multi-index hashing for binary codes in Hamming space
//! 2016  Gog et al.     Succinct bucket boundaries + SIMD candidate filters
//! ```
//!
//! ## Complexity Analysis
//!
//! - **Space**: $N (64 - s)$ payload bits, $2^s + N + o(2^s + N)$ boundary
//!   bits, no per-bucket pointers.
//! - **Query**: one select-1 pair plus a scan of a single bucket (simple) or
//!   a popcount band of it (triangle); the scan is the hot loop and runs on
//!   packed columns in registers.
//! - **Build**: one counting sort, $O(N + 2^s)$.
//!
//! ## What Could Go Wrong
//!
//! 1. **Static only**: the indexes are immutable after build; updates mean
//!    rebuilding the payload columns and the boundary.
//! 2. **Per-permutation recall**: one index only finds matches whose errors
//!    miss its splitter. Whole-space recall is the job of the family, not of
//!    any single member.
//!
//! ## References
//!
//! - Norouzi, M., Punjani, A., & Fleet, D. J. (2012). "Fast search in
//!   Hamming space with multi-index hashing."
//! - Manber, U., & Wu, S. (1992). "An algorithm for approximate membership
//!   checking with application to password security."
//! - Jacobson, G. (1989). "Succinct Static Data Structures."

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod boundary;
pub mod error;
pub mod linear;
pub mod packed;
pub mod perm;
pub mod simple;
pub mod triangle;

pub use boundary::BucketBoundary;
pub use error::Error;
pub use linear::LinearScan;
pub use packed::PackedVec;
pub use perm::BlockPerm;
pub use simple::SimpleIndex;
pub use triangle::TriangleIndex;

/// The outcome of a search: matching keys and the size of the scanned slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    /// Stored keys within the error bound, with multiplicity, in scan order.
    pub matches: Vec<u64>,
    /// Number of payload entries the scan visited (or would visit).
    pub candidates: u64,
}
