//! Allocation token.

use core::{fmt, marker, ptr::NonNull, slice};

/// A block handed out by an `Allocator`.
///
/// The token is the unique owner of its block: it cannot be cloned, and `Allocator::release` and
/// `Allocator::resize` consume it by value, so a block cannot be released twice through safe code.
///
/// The token borrows the allocator it comes from, hence the allocator cannot be deinitialized while it lives.
///
/// Dropping the token without releasing it leaks the block until the allocator is deinitialized.
#[must_use = "dropping an Allocation leaks its block"]
pub struct Allocation<'a> {
    pointer: NonNull<u8>,
    size: usize,
    _allocator: marker::PhantomData<&'a ()>,
}

impl<'a> Allocation<'a> {
    /// Creates an instance.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `pointer` is the start of the usable region of an allocated block, of `size` usable bytes.
    /// -   Assumes that no other token for this block exists.
    pub(crate) unsafe fn from_raw_parts(pointer: NonNull<u8>, size: usize) -> Self {
        Self { pointer, size, _allocator: marker::PhantomData }
    }

    /// Returns a pointer to the usable region.
    pub fn as_ptr(&self) -> NonNull<u8> { self.pointer }

    /// Returns the number of usable bytes, which is at least the requested size.
    pub fn size(&self) -> usize { self.size }

    /// Returns the usable region.
    pub fn as_slice(&self) -> &[u8] {
        //  Safety:
        //  -   The region is `size` initialized bytes, exclusively owned by `self`, and outlives `'a`.
        unsafe { slice::from_raw_parts(self.pointer.as_ptr(), self.size) }
    }

    /// Returns the usable region, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        //  Safety:
        //  -   The region is `size` initialized bytes, exclusively owned by `self`, and outlives `'a`.
        unsafe { slice::from_raw_parts_mut(self.pointer.as_ptr(), self.size) }
    }

    /// Gives up the token, returning the pointer to the usable region.
    ///
    /// The block remains allocated; `Allocator::from_raw` recovers the token.
    pub fn into_raw(self) -> NonNull<u8> { self.pointer }
}

impl fmt::Debug for Allocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocation")
            .field("pointer", &self.pointer)
            .field("size", &self.size)
            .finish()
    }
}

//  Safety:
//  -   The token is the unique owner of its block, and only hands out borrows tied to itself.
unsafe impl Send for Allocation<'_> {}
unsafe impl Sync for Allocation<'_> {}
