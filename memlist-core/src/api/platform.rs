//! Platform
//!
//! The Platform trait is used to obtain the arena from the environment. By abstracting the underlying mechanism, the
//! same allocator runs over an anonymous mapping, the process heap, or a static array.

use core::{
    alloc::Layout,
    ptr::NonNull,
};

/// Abstraction of the backing store from which the single arena is claimed.
pub trait Platform {
    /// Claims a zeroed region of memory fitting `layout`, or returns None.
    ///
    /// #   Safety
    ///
    /// The caller guarantees that `layout.size()` is a non-zero multiple of `layout.align()`.
    ///
    /// On success, the implementation guarantees that the region spans at least `layout.size()` bytes, starts on a
    /// `layout.align()` boundary, and reads as zeroes.
    unsafe fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Gives back a region previously claimed by `allocate`.
    ///
    /// #   Safety
    ///
    /// The caller guarantees that `pointer` and `layout` are exactly those of a prior successful `allocate` on this
    /// instance, and that nothing refers to the region any longer.
    unsafe fn deallocate(&self, pointer: NonNull<u8>, layout: Layout);
}

impl<P> Platform for &P
    where
        P: Platform + ?Sized,
{
    unsafe fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> { (**self).allocate(layout) }

    unsafe fn deallocate(&self, pointer: NonNull<u8>, layout: Layout) { (**self).deallocate(pointer, layout) }
}
