//! Alignment and power-of-two arithmetic.

/// Align a size up to the given power-of-two alignment.
#[inline]
pub const fn align_up(size: u64, align: u64) -> u64 {
    (size + align - 1) & !(align - 1)
}

/// [`align_up`] that returns `None` instead of overflowing.
#[inline]
pub fn checked_align_up(size: u64, align: u64) -> Option<u64> {
    size.checked_add(align - 1).map(|end| end & !(align - 1))
}

/// Check whether `value` is a multiple of the power-of-two `align`.
#[inline]
pub const fn is_aligned(value: u64, align: u64) -> bool {
    value & (align - 1) == 0
}

/// `ceil(log2(n))` for `n >= 1`.
#[inline]
pub const fn ceil_log2(n: u64) -> u32 {
    if n <= 1 {
        0
    } else {
        64 - (n - 1).leading_zeros()
    }
}
