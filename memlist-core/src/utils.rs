//! Small helpers shared by the allocator and the list.

use core::ptr::NonNull;

mod power_of_2;

pub use power_of_2::PowerOf2;

/// Returns whether `pointer` lies on an `alignment` boundary.
pub(crate) fn is_aligned_on<T>(pointer: NonNull<T>, alignment: PowerOf2) -> bool {
    (pointer.as_ptr() as usize) % alignment == 0
}

// mod tests
