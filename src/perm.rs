//! Block-rotation bit permutations.
//!
//! A k-mismatch index only sees the bits it buckets on: the `s` most
//! significant bits of the *permuted* key. To cover all error patterns, an
//! outer driver instantiates one index per member of a permutation family,
//! each member moving a different set of meta-blocks into the prefix. By the
//! pigeonhole principle, a key within distance `k` of the query has at least
//! `b - k` meta-blocks without any flipped bit, so some family member puts an
//! error-free prefix in front.
//!
//! This module provides the rotation family: the key is cut into `b`
//! near-even meta-blocks and member `id` rotates the block order by `id`
//! positions. Rotations are bijective block shuffles, so both directions are
//! true bit permutations and preserve popcount — the triangle index depends
//! on that invariant.

const MAX_BLOCKS: usize = 8;

/// One member of a block-rotation permutation family over `(b, k)`.
///
/// Immutable parameter record; all shifts and widths are precomputed at
/// construction so `permute`/`inverse_permute` are straight-line mask/shift
/// loops over at most `b` blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPerm {
    blocks: u8,
    max_errors: u8,
    id: u8,
    splitter_bits: u8,
    /// Output meta-block widths, most-significant block first.
    widths: [u8; MAX_BLOCKS],
    /// Shift of each output block's source bits in the input word.
    src_shift: [u8; MAX_BLOCKS],
    /// Shift of each output block in the permuted word.
    dst_shift: [u8; MAX_BLOCKS],
}

impl BlockPerm {
    /// Create family member `id` for a key cut into `blocks` meta-blocks
    /// with an error budget of `max_errors`.
    ///
    /// Widths are 64/b with the remainder spread over the leading input
    /// blocks. The `b - k` most significant output blocks form the splitter.
    ///
    /// # Panics
    ///
    /// If `blocks` is outside `2..=8`, `max_errors` is outside
    /// `1..blocks`, or `id >= blocks`.
    pub fn new(blocks: u8, max_errors: u8, id: u8) -> Self {
        assert!((2..=MAX_BLOCKS as u8).contains(&blocks), "blocks must be in 2..=8");
        assert!(max_errors >= 1 && max_errors < blocks, "max_errors must be in 1..blocks");
        assert!(id < blocks, "permutation id must be < blocks");

        let b = blocks as usize;
        let mut in_widths = [0u8; MAX_BLOCKS];
        for (j, w) in in_widths.iter_mut().take(b).enumerate() {
            *w = (64 / blocks) + u8::from(j < (64 % blocks as usize));
        }
        // LSB shift of each input block, MSB block first.
        let mut in_shift = [0u8; MAX_BLOCKS];
        let mut top = 64u8;
        for j in 0..b {
            top -= in_widths[j];
            in_shift[j] = top;
        }

        let mut widths = [0u8; MAX_BLOCKS];
        let mut src_shift = [0u8; MAX_BLOCKS];
        let mut dst_shift = [0u8; MAX_BLOCKS];
        let mut out_top = 64u8;
        for j in 0..b {
            let src = (j + id as usize) % b;
            widths[j] = in_widths[src];
            src_shift[j] = in_shift[src];
            out_top -= in_widths[src];
            dst_shift[j] = out_top;
        }

        let match_len = (blocks - max_errors) as usize;
        let splitter_bits: u8 = widths[..match_len].iter().sum();

        let perm = Self {
            blocks,
            max_errors,
            id,
            splitter_bits,
            widths,
            src_shift,
            dst_shift,
        };
        #[cfg(debug_assertions)]
        for probe in [0u64, u64::MAX, 0xDEAD_BEEF_CAFE_BABE, 0x0123_4567_89AB_CDEF] {
            debug_assert_eq!(perm.inverse_permute(perm.permute(probe)), probe);
            debug_assert_eq!(perm.permute(probe).count_ones(), probe.count_ones());
        }
        perm
    }

    /// All `b` rotations of the `(blocks, max_errors)` family.
    pub fn family(blocks: u8, max_errors: u8) -> Vec<BlockPerm> {
        (0..blocks).map(|id| Self::new(blocks, max_errors, id)).collect()
    }

    /// Apply the permutation.
    #[inline]
    pub fn permute(&self, x: u64) -> u64 {
        let mut y = 0u64;
        for j in 0..self.blocks as usize {
            let mask = (1u64 << self.widths[j]) - 1;
            y |= ((x >> self.src_shift[j]) & mask) << self.dst_shift[j];
        }
        y
    }

    /// Apply the inverse permutation: `inverse_permute(permute(x)) == x`.
    #[inline]
    pub fn inverse_permute(&self, y: u64) -> u64 {
        let mut x = 0u64;
        for j in 0..self.blocks as usize {
            let mask = (1u64 << self.widths[j]) - 1;
            x |= ((y >> self.dst_shift[j]) & mask) << self.src_shift[j];
        }
        x
    }

    /// Number of meta-blocks `b`.
    #[must_use]
    pub fn blocks(&self) -> u8 {
        self.blocks
    }

    /// Largest Hamming error budget `k` this family member supports.
    #[must_use]
    pub fn max_errors(&self) -> u8 {
        self.max_errors
    }

    /// Number of leading meta-blocks forming the splitter prefix.
    #[must_use]
    pub fn match_len(&self) -> u8 {
        self.blocks - self.max_errors
    }

    /// Width of the bucketing prefix in bits.
    #[must_use]
    pub fn splitter_bits(&self) -> u8 {
        self.splitter_bits
    }

    /// This member's id within the family.
    #[must_use]
    pub fn id(&self) -> u8 {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_member() {
        let p = BlockPerm::new(4, 3, 0);
        assert_eq!(p.permute(0x0123_4567_89AB_CDEF), 0x0123_4567_89AB_CDEF);
        assert_eq!(p.splitter_bits(), 16);
        assert_eq!(p.match_len(), 1);
    }

    #[test]
    fn test_rotation_moves_blocks() {
        // b=4, even 16-bit blocks: member 1 rotates block order by one.
        let p = BlockPerm::new(4, 3, 1);
        assert_eq!(p.permute(0xAAAA_BBBB_CCCC_DDDD), 0xBBBB_CCCC_DDDD_AAAA);
        assert_eq!(p.inverse_permute(0xBBBB_CCCC_DDDD_AAAA), 0xAAAA_BBBB_CCCC_DDDD);
    }

    #[test]
    fn test_round_trip_and_popcount_all_members() {
        for (b, k) in [(4u8, 3u8), (4, 2), (8, 6), (5, 2), (3, 1)] {
            for p in BlockPerm::family(b, k) {
                for x in [0u64, u64::MAX, 1, 1 << 63, 0x5555_5555_5555_5555, 0x8000_0000_0000_0001] {
                    assert_eq!(p.inverse_permute(p.permute(x)), x);
                    assert_eq!(p.permute(x).count_ones(), x.count_ones());
                }
            }
        }
    }

    #[test]
    fn test_uneven_widths_sum_to_64() {
        // b=5 -> widths 13,13,13,13,12 rotated.
        for p in BlockPerm::family(5, 2) {
            let total: u8 = p.widths[..5].iter().sum();
            assert_eq!(total, 64);
            // match_len = 3 leading blocks.
            assert_eq!(
                p.splitter_bits(),
                p.widths[0] + p.widths[1] + p.widths[2]
            );
        }
    }

    #[test]
    #[should_panic]
    fn test_rejects_zero_errors() {
        let _ = BlockPerm::new(4, 0, 0);
    }
}
