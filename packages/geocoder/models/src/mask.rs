//! Token-position bitmasks.
//!
//! Bit `i` of a [`TokenMask`] is set when query token `i` is covered. Masks
//! are `u32`, so a query can address at most
//! [`MAX_MASK_TOKENS`](crate::constants::MAX_MASK_TOKENS) positions.

use crate::constants::MAX_MASK_TOKENS;

/// A set of query token positions.
pub type TokenMask = u32;

/// Mask with only position `pos` set. Positions past the mask width yield 0.
#[must_use]
pub const fn bit(pos: usize) -> TokenMask {
    if pos >= MAX_MASK_TOKENS { 0 } else { 1 << pos }
}

/// Mask covering `len` positions starting at `start`.
#[must_use]
pub const fn range(start: usize, len: usize) -> TokenMask {
    let mut mask = 0;
    let mut i = 0;
    while i < len {
        mask |= bit(start + i);
        i += 1;
    }
    mask
}

/// Mask covering every position of a query of `len` tokens.
#[must_use]
pub const fn full(len: usize) -> TokenMask {
    range(0, len)
}

/// Whether two masks claim any common position.
#[must_use]
pub const fn overlaps(a: TokenMask, b: TokenMask) -> bool {
    a & b != 0
}

/// Whether `mask` covers every position in `start..start + len`.
#[must_use]
pub const fn covers_range(mask: TokenMask, start: usize, len: usize) -> bool {
    let wanted = range(start, len);
    mask & wanted == wanted
}

/// Number of covered positions.
#[must_use]
pub const fn count(mask: TokenMask) -> u32 {
    mask.count_ones()
}

/// Lowest covered position, if any.
#[must_use]
pub const fn first(mask: TokenMask) -> Option<usize> {
    if mask == 0 {
        None
    } else {
        Some(mask.trailing_zeros() as usize)
    }
}

/// Number of uncovered positions strictly between the two masks.
///
/// Returns 0 when the masks overlap or either is empty.
#[must_use]
pub const fn gap_between(a: TokenMask, b: TokenMask) -> u32 {
    if a == 0 || b == 0 || overlaps(a, b) {
        return 0;
    }
    let (low, high) = if a < b { (a, b) } else { (b, a) };
    let low_end = MAX_MASK_TOKENS as u32 - low.leading_zeros();
    let high_start = high.trailing_zeros();
    high_start.saturating_sub(low_end)
}

/// Whether `mask` is one contiguous run of positions.
#[must_use]
pub const fn is_contiguous(mask: TokenMask) -> bool {
    if mask == 0 {
        return false;
    }
    let shifted = mask >> mask.trailing_zeros();
    shifted & (shifted + 1) == 0
}
