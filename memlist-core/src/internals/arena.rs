//! The Arena: the single contiguous range of bytes claimed from the Platform.

use core::{alloc::Layout, ptr::NonNull};

use crate::{Platform, PowerOf2};
use crate::utils;

/// Arena
///
/// Owns the raw storage between `claim` and `release`; never resized.
pub(crate) struct Arena {
    base: NonNull<u8>,
    layout: Layout,
}

impl Arena {
    /// Claims `size` bytes aligned on `alignment` from the `platform`.
    ///
    /// Returns None if the platform cannot provide them.
    pub(crate) fn claim<P>(platform: &P, size: usize, alignment: PowerOf2) -> Option<Arena>
        where
            P: Platform,
    {
        debug_assert!(size > 0);
        debug_assert!(size % alignment == 0, "{} % {} != 0", size, alignment.value());

        let layout = Layout::from_size_align(size, alignment.value()).ok()?;

        //  Safety:
        //  -   `layout.size()` is non-zero, and a multiple of `layout.align()`.
        let base = unsafe { platform.allocate(layout) }?;

        debug_assert!(utils::is_aligned_on(base, alignment),
            "{:x} not {:x}-aligned!", base.as_ptr() as usize, alignment.value());

        Some(Arena { base, layout })
    }

    /// Returns the storage to the `platform`.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `platform` is the platform this arena was claimed from.
    /// -   Assumes that no pointer into the arena is used afterwards.
    pub(crate) unsafe fn release<P>(self, platform: &P)
        where
            P: Platform,
    {
        platform.deallocate(self.base, self.layout);
    }

    /// Returns the size of the arena, in bytes.
    pub(crate) fn size(&self) -> usize { self.layout.size() }

    /// Returns the address of the first byte of the arena.
    pub(crate) fn address(&self) -> usize { self.base.as_ptr() as usize }

    /// Returns the offset of `pointer` within the arena, if it points within.
    pub(crate) fn offset_of(&self, pointer: NonNull<u8>) -> Option<usize> {
        (pointer.as_ptr() as usize)
            .checked_sub(self.address())
            .filter(|offset| *offset < self.size())
    }

    /// Returns a pointer to the byte at `offset`.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `offset` is strictly less than `self.size()`.
    pub(crate) unsafe fn at(&self, offset: usize) -> NonNull<u8> {
        debug_assert!(offset < self.size(), "{} >= {}", offset, self.size());

        NonNull::new_unchecked(self.base.as_ptr().add(offset))
    }
}

//  Safety:
//  -   The arena is plain storage; access to it is synchronized by its owner.
unsafe impl Send for Arena {}

#[cfg(test)]
mod tests {

use super::*;
use super::super::test::TestPlatform;

const ALIGNMENT: PowerOf2 = unsafe { PowerOf2::new_unchecked(16) };

#[test]
fn arena_claim_release() {
    let platform = TestPlatform::new();

    let arena = Arena::claim(&platform, 1024, ALIGNMENT).expect("Claimed");

    assert_eq!(1024, arena.size());
    assert_eq!(platform.address(), arena.address());
    assert_eq!(1, platform.claims());

    unsafe { arena.release(&platform) };

    assert_eq!(1, platform.releases());
}

#[test]
fn arena_claim_exhausted() {
    let platform = TestPlatform::exhausted();

    assert!(Arena::claim(&platform, 1024, ALIGNMENT).is_none());
    assert_eq!(0, platform.claims());
}

#[test]
fn arena_offset_of() {
    let platform = TestPlatform::new();
    let arena = Arena::claim(&platform, 1024, ALIGNMENT).expect("Claimed");

    let offset_of = |address: usize| arena.offset_of(NonNull::new(address as *mut u8).unwrap());

    let base = arena.address();

    assert_eq!(Some(0), offset_of(base));
    assert_eq!(Some(48), offset_of(base + 48));
    assert_eq!(Some(1023), offset_of(base + 1023));
    assert_eq!(None, offset_of(base + 1024));
    assert_eq!(None, offset_of(base - 1));

    unsafe { arena.release(&platform) };
}

#[test]
fn arena_at() {
    let platform = TestPlatform::new();
    let arena = Arena::claim(&platform, 1024, ALIGNMENT).expect("Claimed");

    let pointer = unsafe { arena.at(64) };

    assert_eq!(arena.address() + 64, pointer.as_ptr() as usize);
    assert_eq!(Some(64), arena.offset_of(pointer));

    unsafe { arena.release(&platform) };
}

} // mod tests
