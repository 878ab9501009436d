//! Nodes of the ConcurrentList.
//!
//! Each Link pairs a lock with the pointer to the next node; the pointer is only read or written while the lock is
//! held, or with exclusive access to the whole list. The head of the list is a Link of its own, so that the first
//! node is no different from any other.

use core::{
    cell::Cell,
    mem,
    ptr::NonNull,
};

use parking_lot::{lock_api::RawMutex as _, RawMutex};

use crate::Allocation;

/// Link
///
/// A lock, and the pointer it protects.
pub(crate) struct Link {
    lock: RawMutex,
    next: Cell<Option<NonNull<Node>>>,
}

impl Link {
    /// Creates an unlocked link to nothing.
    pub(crate) const fn new() -> Self { Self { lock: RawMutex::INIT, next: Cell::new(None) } }

    /// Unlinks the successor, returning it.
    ///
    /// Only to be used with exclusive access to the list.
    pub(crate) fn take(&mut self) -> Option<NonNull<Node>> { self.next.take() }
}

/// Node
///
/// Lives in the usable region of a block of the Allocator.
#[repr(C)]
pub(crate) struct Node {
    //  First, so that a pointer to the node is a pointer to its link.
    link: Link,
    //  Usable size of the block, to rebuild the Allocation.
    size: usize,
    //  Unique across nodes, even those placed in a reused block.
    stamp: u64,
    value: i32,
}

impl Node {
    /// Writes a fresh node holding `value` in `allocation`, returning a pointer to it.
    ///
    /// The block is now owned by the node; see `into_allocation`.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `allocation` is suitably aligned for a Node.
    pub(crate) unsafe fn initialize(allocation: Allocation<'_>, stamp: u64, value: i32) -> NonNull<Node> {
        debug_assert!(allocation.size() >= mem::size_of::<Node>(), "{} too small", allocation.size());
        debug_assert!(allocation.as_ptr().as_ptr() as usize % mem::align_of::<Node>() == 0);

        let size = allocation.size();
        let node = allocation.into_raw().cast::<Node>();

        node.as_ptr().write(Node { link: Link::new(), size, stamp, value });

        node
    }

    /// Recovers the Allocation of the block holding `node`.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `node` was created by `initialize`, and is no longer reachable from the list.
    /// -   Assumes that `node` is not locked.
    pub(crate) unsafe fn into_allocation<'a>(node: NonNull<Node>) -> Allocation<'a> {
        let size = node.as_ref().size;

        Allocation::from_raw_parts(node.cast(), size)
    }

    /// Returns the value stored.
    pub(crate) fn value(&self) -> i32 { self.value }

    /// Returns the stamp given at initialization.
    pub(crate) fn stamp(&self) -> u64 { self.stamp }

    /// Returns the link of the node.
    pub(crate) fn link_mut(&mut self) -> &mut Link { &mut self.link }
}

/// Locked
///
/// A Link locked for the lifetime of the guard.
pub(crate) struct Locked<'g> {
    link: &'g Link,
}

impl<'g> Locked<'g> {
    /// Locks `link`.
    pub(crate) fn lock(link: &'g Link) -> Self {
        link.lock.lock();

        Self { link }
    }

    /// Locks the link of `node`.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `node` is live for `'g`.
    pub(crate) unsafe fn lock_node(node: NonNull<Node>) -> Self { Self::lock(&(*node.as_ptr()).link) }

    /// Returns the successor.
    pub(crate) fn next(&self) -> Option<NonNull<Node>> { self.link.next.get() }

    /// Sets the successor.
    pub(crate) fn set_next(&self, next: Option<NonNull<Node>>) { self.link.next.set(next) }
}

impl Drop for Locked<'_> {
    fn drop(&mut self) {
        //  Safety:
        //  -   The lock was acquired in `lock`, and is held by `self`.
        unsafe { self.link.lock.unlock() };
    }
}

// mod tests
