//! An integer guaranteed to be a power of 2, used for block granularity and arena alignment.

use core::{cmp, mem, num, ops};

/// A non-zero power of 2.
///
/// Rounding to a multiple of a power of 2 is a matter of masking, hence the dedicated type.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PowerOf2(num::NonZeroUsize);

impl PowerOf2 {
    /// Returns `value` as a PowerOf2, if it is one.
    pub fn new(value: usize) -> Option<PowerOf2> {
        //  Safety:
        //  -   Checked just before.
        value.is_power_of_two().then(|| unsafe { PowerOf2::new_unchecked(value) })
    }

    /// Returns `value` as a PowerOf2, unchecked.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `value` is a power of 2.
    pub const unsafe fn new_unchecked(value: usize) -> PowerOf2 { PowerOf2(num::NonZeroUsize::new_unchecked(value)) }

    /// Returns the alignment of `T`.
    pub const fn align_of<T>() -> PowerOf2 {
        //  Safety:
        //  -   Alignments are powers of 2.
        unsafe { PowerOf2::new_unchecked(mem::align_of::<T>()) }
    }

    /// Returns the value.
    pub const fn value(&self) -> usize { self.0.get() }

    /// Returns the larger of the two.
    pub fn max(self, other: PowerOf2) -> PowerOf2 { cmp::max(self, other) }

    /// Returns the smallest multiple of `self` no less than `n`, or None if it does not fit in a `usize`.
    pub const fn checked_round_up(&self, n: usize) -> Option<usize> {
        match n.checked_add(self.mask()) {
            Some(sum) => Some(sum & !self.mask()),
            None => None,
        }
    }

    /// Returns the smallest multiple of `self` no less than `n`.
    ///
    /// `n` is expected to be far from `usize::MAX`; see `checked_round_up` otherwise.
    pub const fn round_up(&self, n: usize) -> usize { (n + self.mask()) & !self.mask() }

    /// Returns the largest multiple of `self` no greater than `n`.
    pub const fn round_down(&self, n: usize) -> usize { n & !self.mask() }

    //  The bits below the power.
    const fn mask(&self) -> usize { self.value() - 1 }
}

impl ops::Rem<PowerOf2> for usize {
    type Output = usize;

    #[allow(clippy::suspicious_arithmetic_impl)]
    fn rem(self, divisor: PowerOf2) -> usize { self & divisor.mask() }
}

// mod tests
