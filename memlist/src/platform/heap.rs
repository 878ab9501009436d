//! Implementation of the Platform trait over the global allocator.

use std::{alloc::{self, Layout}, ptr::NonNull};

use memlist_core::Platform;

/// Implementation of the Platform trait over the process heap, as served by the global allocator.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeapPlatform;

impl HeapPlatform {
    /// Creates an instance.
    pub const fn new() -> Self { Self }
}

impl Platform for HeapPlatform {
    unsafe fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        debug_assert!(layout.size() > 0);

        //  Safety:
        //  -   `layout.size()` is non-zero.
        NonNull::new(alloc::alloc_zeroed(layout))
    }

    unsafe fn deallocate(&self, pointer: NonNull<u8>, layout: Layout) {
        alloc::dealloc(pointer.as_ptr(), layout);
    }
}

// mod tests
