//! Implementation of Linux specific calls.

use core::{alloc::Layout, ptr::{self, NonNull}};

use memlist_core::{Platform, PowerOf2};
use tracing::error;

/// Implementation of the Platform trait, for Linux.
///
/// The arena is an anonymous, private, mapping: zeroed, and aligned on a page boundary.
#[derive(Clone, Copy, Debug, Default)]
pub struct MmapPlatform;

impl MmapPlatform {
    /// Creates an instance.
    pub const fn new() -> Self { Self }
}

impl Platform for MmapPlatform {
    unsafe fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        let page = page_size();

        if layout.align() > page.value() {
            return None;
        }

        mmap_allocate(page.checked_round_up(layout.size())?)
    }

    unsafe fn deallocate(&self, pointer: NonNull<u8>, layout: Layout) {
        //  Safety:
        //  -   `allocate` mapped exactly this many bytes.
        munmap_deallocate(pointer.as_ptr(), page_size().round_up(layout.size()));
    }
}

//  Returns the size of a page.
fn page_size() -> PowerOf2 {
    const FALLBACK: PowerOf2 = unsafe { PowerOf2::new_unchecked(4096) };

    //  Safety:
    //  -   `_SC_PAGESIZE` is a valid name.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

    usize::try_from(size).ok().and_then(PowerOf2::new).unwrap_or(FALLBACK)
}

//  Maps `size` bytes of private, anonymous, memory: zeroed and page-aligned.
fn mmap_allocate(size: usize) -> Option<NonNull<u8>> {
    let protection = libc::PROT_READ | libc::PROT_WRITE;
    let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

    //  Safety:
    //  -   Anonymous mappings take no hint, no file descriptor (-1), and no offset (0).
    let mapped = unsafe { libc::mmap(ptr::null_mut(), size, protection, flags, -1, 0) };

    if mapped == libc::MAP_FAILED {
        return None;
    }

    NonNull::new(mapped.cast())
}

//  Unmaps `[address, address + size)`.
//
//  #   Safety
//
//  -   Assumes that the range was mapped by `mmap_allocate`, and is no longer in use.
unsafe fn munmap_deallocate(address: *mut u8, size: usize) {
    if libc::munmap(address.cast(), size) != 0 {
        error!(address = address as usize, size, errno = %std::io::Error::last_os_error(), "munmap failed");
    }
}

#[cfg(test)]
mod tests {

use super::*;

#[test]
fn mmap_platform_page_size() {
    assert!(page_size().value() >= 4096);
}

#[test]
fn mmap_platform_allocate_deallocate() {
    let platform = MmapPlatform::new();
    let layout = Layout::from_size_align(10_000, 16).unwrap();

    let pointer = unsafe { platform.allocate(layout) }.expect("Mapped");

    assert_eq!(0, pointer.as_ptr() as usize % page_size().value());

    let bytes = unsafe { core::slice::from_raw_parts_mut(pointer.as_ptr(), layout.size()) };

    assert!(bytes.iter().all(|byte| *byte == 0));

    bytes.iter_mut().for_each(|byte| *byte = 0xA5);

    unsafe { platform.deallocate(pointer, layout) };
}

#[test]
fn mmap_platform_overaligned() {
    let platform = MmapPlatform::new();
    let layout = Layout::from_size_align(1 << 30, 1 << 30).unwrap();

    assert_eq!(None, unsafe { platform.allocate(layout) });
}

} // mod tests
