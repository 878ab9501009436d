#![deny(missing_docs)]

//! Exposition of the MemoryManager API via a C ABI.
//!
//! A single, process-wide, MemoryManager backs all calls.

use std::ptr::{self, NonNull};

use memlist::{DefaultPlatform, ErrorKind, MemoryManager};
use tracing::{error, warn};

/// Claims an arena of `capacity` bytes for the process-wide manager.
///
/// Returns 0 on success, and -1 if the manager is already initialized or `capacity` is too small.
///
/// Aborts the process if the backing store cannot provide the arena.
#[cold]
#[no_mangle]
pub extern "C" fn mem_init(capacity: usize) -> i32 {
    match MANAGER.init(capacity) {
        Ok(()) => 0,
        Err(error) if error.kind() == ErrorKind::BackingStoreExhausted => {
            error!(%error, "cannot obtain the arena, aborting");
            std::process::abort()
        },
        Err(error) => {
            warn!(%error, "mem_init failed");
            -1
        },
    }
}

/// Allocates at least `size` bytes of memory, aligned on 16 bytes.
///
/// Returns NULL if `size` is 0, if the manager is not initialized, or if no free block is large enough.
#[no_mangle]
pub extern "C" fn mem_alloc(size: usize) -> *mut u8 {
    match MANAGER.acquire(size) {
        Ok(allocation) => allocation.into_raw().as_ptr(),
        Err(_) => ptr::null_mut(),
    }
}

/// Resizes the memory located at `pointer` to at least `size` bytes, preserving its contents.
///
/// -   If `pointer` is NULL, behaves as `mem_alloc(size)`.
/// -   If `size` is 0, behaves as `mem_free(pointer)`, and returns NULL.
///
/// Returns NULL on failure, in which case the memory located at `pointer` is left untouched, and remains valid.
///
/// #   Safety
///
/// -   Assumes that `pointer` is NULL, or the unique live handle to its block.
#[no_mangle]
pub unsafe extern "C" fn mem_resize(pointer: *mut u8, size: usize) -> *mut u8 {
    let allocation = match NonNull::new(pointer) {
        None => None,
        Some(pointer) => match MANAGER.from_raw(pointer) {
            Ok(allocation) => Some(allocation),
            Err(error) => {
                warn!(%error, "mem_resize of an unknown pointer");
                return ptr::null_mut();
            },
        },
    };

    match MANAGER.resize(allocation, size) {
        Ok(Some(allocation)) => allocation.into_raw().as_ptr(),
        Ok(None) => ptr::null_mut(),
        Err(error) => {
            warn!(%error, "mem_resize failed");

            //  The caller keeps `pointer`: forget the token without releasing its block.
            if let Some(allocation) = error.into_allocation() {
                allocation.into_raw();
            }

            ptr::null_mut()
        },
    }
}

/// Deallocates the memory located at `pointer`.
///
/// A no-op if `pointer` is NULL. Pointers which were not handed out by this manager, or which were already freed, are
/// detected and ignored.
///
/// #   Safety
///
/// -   Assumes that `pointer` is NULL, or the unique live handle to its block.
/// -   Assumes that the memory pointed by `pointer` is no longer in use.
#[no_mangle]
pub unsafe extern "C" fn mem_free(pointer: *mut u8) {
    let pointer = match NonNull::new(pointer) {
        Some(pointer) => pointer,
        None => return,
    };

    let result = MANAGER.from_raw(pointer).and_then(|allocation| MANAGER.release(allocation));

    if let Err(error) = result {
        warn!(%error, "mem_free rejected");
    }
}

/// Returns the arena to the operating system.
///
/// A no-op if the manager is not initialized.
///
/// #   Safety
///
/// -   Assumes that no pointer handed out by this manager is used afterwards.
#[cold]
#[no_mangle]
pub unsafe extern "C" fn mem_deinit() { MANAGER.deinit_unchecked() }

/// Returns the number of bytes of the arena, or 0 if the manager is not initialized.
#[no_mangle]
pub extern "C" fn mem_capacity() -> usize { MANAGER.capacity() }

/// Returns the number of blocks handed out, or -1 if the manager is not initialized.
#[no_mangle]
pub extern "C" fn mem_allocated_blocks() -> isize {
    match MANAGER.usage() {
        Ok(usage) => usage.allocated_blocks as isize,
        Err(_) => -1,
    }
}

//
//  Implementation
//

static MANAGER: MemoryManager = MemoryManager::new(DefaultPlatform::new());

// mod tests
