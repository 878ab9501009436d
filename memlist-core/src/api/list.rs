//! ConcurrentList
//!
//! A singly-linked list of `i32`, whose nodes are carved out of an Allocator, protected by one lock per node.
//!
//! Traversals use lock coupling (hand-over-hand locking): the lock of a node is acquired before the lock of its
//! predecessor is released, and locks are always acquired in list order, starting from the head. Two threads can thus
//! operate on disjoint parts of the list concurrently, and never deadlock.
//!
//! Nodes are allocated before any lock is taken and released after all locks are dropped, so that the mutex of the
//! Allocator is never acquired while holding a node lock.

use core::{
    fmt,
    marker,
    mem,
    ptr::NonNull,
    sync::atomic::{AtomicU64, Ordering},
};

use tracing::{debug, error, warn};

use crate::internals::node::{Link, Locked, Node};

use super::{Allocator, Configuration, ListError, Platform};

/// ConcurrentList
///
/// A list of `i32`, safe for concurrent use through a shared reference.
pub struct ConcurrentList<'a, C: Configuration, P: Platform> {
    allocator: &'a Allocator<C, P>,
    //  The virtual head node: holds no value, only the link to the first node.
    head: Link,
}

/// NodeRef
///
/// A reference to a node, as returned by `search` or an insertion.
///
/// The reference is only used as a position: operations taking a NodeRef look the node up by identity, under lock,
/// and report `NotFound` if it is no longer part of the list. The identity of a node is its address along with a
/// stamp unique to it, so a reference to a deleted node never designates a new node placed in the same block.
#[derive(Clone, Copy)]
pub struct NodeRef<'l> {
    node: NonNull<Node>,
    stamp: u64,
    value: i32,
    _list: marker::PhantomData<&'l ()>,
}

impl<'l> NodeRef<'l> {
    fn new(node: NonNull<Node>, stamp: u64, value: i32) -> Self {
        Self { node, stamp, value, _list: marker::PhantomData }
    }

    /// Returns the value of the node, as observed when the reference was created.
    pub fn value(&self) -> i32 { self.value }

    fn is(&self, node: NonNull<Node>, stamp: u64) -> bool { self.node == node && self.stamp == stamp }
}

impl fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("node", &self.node)
            .field("stamp", &self.stamp)
            .field("value", &self.value)
            .finish()
    }
}

impl PartialEq for NodeRef<'_> {
    fn eq(&self, other: &Self) -> bool { self.is(other.node, other.stamp) }
}

impl Eq for NodeRef<'_> {}

//  Safety:
//  -   A NodeRef is never dereferenced, only compared.
unsafe impl Send for NodeRef<'_> {}
unsafe impl Sync for NodeRef<'_> {}

//  A node found by a traversal, with its predecessor: both locked.
struct Found<'g> {
    predecessor: Locked<'g>,
    target: Locked<'g>,
    node: NonNull<Node>,
    stamp: u64,
}

//  Shared by all lists, so that a reference never matches a node of another list either.
static STAMPS: AtomicU64 = AtomicU64::new(0);

impl<'a, C, P> ConcurrentList<'a, C, P>
    where
        C: Configuration,
        P: Platform,
{
    /// Creates an empty list, whose nodes are acquired from `allocator`.
    pub fn new(allocator: &'a Allocator<C, P>) -> Self { Self { allocator, head: Link::new() } }

    /// Returns the allocator backing the nodes.
    pub fn allocator(&self) -> &'a Allocator<C, P> { self.allocator }

    /// Returns whether the list is empty.
    pub fn is_empty(&self) -> bool { Locked::lock(&self.head).next().is_none() }

    /// Inserts `value` at the front of the list.
    pub fn insert_front(&self, value: i32) -> Result<NodeRef<'_>, ListError> {
        let created = self.create(value)?;
        let node = created.node;

        //  Safety:
        //  -   `node` is live, and unpublished.
        let fresh = unsafe { Locked::lock_node(node) };

        let head = Locked::lock(&self.head);

        //  Wait for any traversal standing on the current first node to move on.
        //
        //  Safety:
        //  -   The first node cannot be unlinked while `head` is locked.
        let first = head.next().map(|first| unsafe { Locked::lock_node(first) });

        fresh.set_next(head.next());
        head.set_next(Some(node));

        drop(first);
        drop(head);
        drop(fresh);

        Ok(created)
    }

    /// Inserts `value` right after the node `previous`.
    ///
    /// Fails with `InvalidArgument` if `previous` is None, and with `NotFound` if it is no longer in the list; the
    /// list is left unchanged in either case.
    pub fn insert_after(&self, previous: Option<NodeRef<'_>>, value: i32) -> Result<NodeRef<'_>, ListError> {
        let previous = previous.ok_or_else(|| {
            warn!(value, "insert_after without a previous node");
            ListError::InvalidArgument("previous node is none")
        })?;

        let created = self.create(value)?;
        let node = created.node;

        //  Safety:
        //  -   `node` is live, and unpublished.
        let fresh = unsafe { Locked::lock_node(node) };

        let found = match self.find(|candidate, stamp, _| previous.is(candidate, stamp)) {
            Some(found) => found,
            None => {
                drop(fresh);
                self.destroy(node);

                debug!(value, previous = previous.value(), "previous node not found");
                return Err(ListError::NotFound);
            },
        };

        let Found { predecessor, target, .. } = found;

        //  Holding `target` suffices: nobody can unlink it, nor change its successor.
        drop(predecessor);

        fresh.set_next(target.next());
        target.set_next(Some(node));

        drop(target);
        drop(fresh);

        Ok(created)
    }

    /// Inserts `value` right before the node `next`.
    ///
    /// Fails with `InvalidArgument` if `next` is None, and with `NotFound` if it is no longer in the list; the list is
    /// left unchanged in either case.
    pub fn insert_before(&self, next: Option<NodeRef<'_>>, value: i32) -> Result<NodeRef<'_>, ListError> {
        let next = next.ok_or_else(|| {
            warn!(value, "insert_before without a next node");
            ListError::InvalidArgument("next node is none")
        })?;

        let created = self.create(value)?;
        let node = created.node;

        //  Safety:
        //  -   `node` is live, and unpublished.
        let fresh = unsafe { Locked::lock_node(node) };

        let found = match self.find(|candidate, stamp, _| next.is(candidate, stamp)) {
            Some(found) => found,
            None => {
                drop(fresh);
                self.destroy(node);

                debug!(value, next = next.value(), "next node not found");
                return Err(ListError::NotFound);
            },
        };

        let Found { predecessor, target, node: successor, .. } = found;

        fresh.set_next(Some(successor));
        predecessor.set_next(Some(node));

        drop(target);
        drop(predecessor);
        drop(fresh);

        Ok(created)
    }

    /// Removes the first node holding `value`, and releases its storage.
    pub fn delete(&self, value: i32) -> Result<(), ListError> {
        let found = match self.find(|_, _, candidate| candidate == value) {
            Some(found) => found,
            None => {
                debug!(value, "value not found");
                return Err(ListError::NotFound);
            },
        };

        let Found { predecessor, target, node, .. } = found;

        predecessor.set_next(target.next());

        drop(target);
        drop(predecessor);

        self.destroy(node);

        Ok(())
    }

    /// Returns a reference to the first node holding `value`, if any.
    pub fn search(&self, value: i32) -> Option<NodeRef<'_>> {
        self.find(|_, _, candidate| candidate == value).map(|found| NodeRef::new(found.node, found.stamp, value))
    }

    /// Returns the number of nodes, as observed by a single traversal.
    pub fn count_nodes(&self) -> usize {
        let mut count = 0;

        let found = self.find(|_, _, _| { count += 1; false });
        debug_assert!(found.is_none());

        count
    }

    /// Returns the values of the list, in order, as observed by a single traversal.
    pub fn values(&self) -> Vec<i32> { self.range(None, None) }

    /// Returns the values from `start` to `end`, both inclusive, as observed by a single traversal.
    ///
    /// A None `start` designates the first node, a None `end` the last. The result is empty if `start` is not in the
    /// list, and runs to the end of the list if `end` is not met.
    pub fn range(&self, start: Option<NodeRef<'_>>, end: Option<NodeRef<'_>>) -> Vec<i32> {
        let mut values = Vec::new();
        let mut started = start.is_none();

        let _ = self.find(|candidate, stamp, value| {
            started = started || start.map_or(false, |start| start.is(candidate, stamp));

            if !started {
                return false;
            }

            values.push(value);

            end.map_or(false, |end| end.is(candidate, stamp))
        });

        values
    }

    /// Formats the values from `start` to `end`, both inclusive, as `[1, 2, 3]`.
    ///
    /// See `range` for the meaning of `start` and `end`.
    pub fn display_range(&self, start: Option<NodeRef<'_>>, end: Option<NodeRef<'_>>) -> String {
        let mut result = String::new();

        //  Writing to a String cannot fail.
        let _ = write_values(&mut result, &self.range(start, end));

        result
    }

    /// Removes all nodes, releasing their storage.
    pub fn cleanup(&mut self) {
        let mut cursor = self.head.take();
        let mut released = 0usize;

        while let Some(mut node) = cursor {
            //  Safety:
            //  -   `&mut self` guarantees no concurrent traversal, and `node` was linked, hence live.
            cursor = unsafe { node.as_mut() }.link_mut().take();

            self.destroy(node);
            released += 1;
        }

        if released > 0 {
            debug!(released, "list cleaned up");
        }
    }

    //  Traverses the list with lock coupling, stopping at the first node for which `matches` returns true.
    //
    //  Returns the node found, locked along with its predecessor.
    fn find<F>(&self, mut matches: F) -> Option<Found<'_>>
        where
            F: FnMut(NonNull<Node>, u64, i32) -> bool,
    {
        let mut predecessor = Locked::lock(&self.head);

        loop {
            let node = predecessor.next()?;

            //  Safety:
            //  -   `node` cannot be unlinked, hence released, while `predecessor` is locked.
            let target = unsafe { Locked::lock_node(node) };

            //  Safety:
            //  -   `node` is locked.
            let current = unsafe { node.as_ref() };
            let (stamp, value) = (current.stamp(), current.value());

            if matches(node, stamp, value) {
                return Some(Found { predecessor, target, node, stamp });
            }

            predecessor = target;
        }
    }

    //  Allocates an unpublished node, returning the reference to it.
    fn create(&self, value: i32) -> Result<NodeRef<'_>, ListError> {
        let allocation = self.allocator.acquire(mem::size_of::<Node>()).map_err(|error| {
            warn!(value, %error, "cannot allocate node");
            error
        })?;

        let stamp = STAMPS.fetch_add(1, Ordering::Relaxed);

        //  Safety:
        //  -   The usable region is aligned to the granularity, at least the alignment of a pointer.
        let node = unsafe { Node::initialize(allocation, stamp, value) };

        Ok(NodeRef::new(node, stamp, value))
    }

    fn destroy(&self, node: NonNull<Node>) {
        //  Safety:
        //  -   `node` is unlinked and unlocked: no other thread can reach it.
        let allocation = unsafe { Node::into_allocation(node) };

        if let Err(error) = self.allocator.release(allocation) {
            error!(%error, "cannot release node");
        }
    }
}

impl<C, P> Drop for ConcurrentList<'_, C, P>
    where
        C: Configuration,
        P: Platform,
{
    fn drop(&mut self) { self.cleanup(); }
}

impl<C, P> fmt::Display for ConcurrentList<'_, C, P>
    where
        C: Configuration,
        P: Platform,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write_values(f, &self.values()) }
}

impl<C, P> fmt::Debug for ConcurrentList<'_, C, P>
    where
        C: Configuration,
        P: Platform,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.debug_list().entries(self.values()).finish() }
}

//  Safety:
//  -   Links are only read or written with their lock held, or with exclusive access to the list.
//  -   Nodes are only allocated and released through the Allocator, which must be Sync.
unsafe impl<C, P> Send for ConcurrentList<'_, C, P>
    where
        C: Configuration,
        P: Platform,
        Allocator<C, P>: Sync,
{}

unsafe impl<C, P> Sync for ConcurrentList<'_, C, P>
    where
        C: Configuration,
        P: Platform,
        Allocator<C, P>: Sync,
{}

fn write_values<W: fmt::Write>(writer: &mut W, values: &[i32]) -> fmt::Result {
    writer.write_char('[')?;

    for (index, value) in values.iter().enumerate() {
        if index > 0 {
            writer.write_str(", ")?;
        }

        write!(writer, "{}", value)?;
    }

    writer.write_char(']')
}

#[cfg(test)]
mod tests {

use super::*;
use super::super::{AllocError, DefaultConfiguration, ErrorKind};

use crate::internals::test::{self, TestAllocator, TestPlatform};

type TestList<'a> = ConcurrentList<'a, DefaultConfiguration, TestPlatform>;

#[test]
fn list_scenario() {
    let allocator = test::initialized(4096);
    let list = TestList::new(&allocator);

    list.insert_front(5).unwrap();
    list.insert_front(3).unwrap();

    assert_eq!("[3, 5]", list.to_string());

    list.delete(5).unwrap();

    assert_eq!("[3]", list.to_string());
    assert_eq!(None, list.search(9));
}

#[test]
fn list_empty() {
    let allocator = test::initialized(4096);
    let list = TestList::new(&allocator);

    assert!(list.is_empty());
    assert_eq!(0, list.count_nodes());
    assert_eq!("[]", list.to_string());
    assert_eq!(None, list.search(1));

    let error = list.delete(1).unwrap_err();

    assert_eq!(ListError::NotFound, error);
    assert_eq!(ErrorKind::NotFound, error.kind());
}

#[test]
fn list_search_first_match() {
    let allocator = test::initialized(4096);
    let list = TestList::new(&allocator);

    let last = list.insert_front(7).unwrap();
    let first = list.insert_front(7).unwrap();

    assert_ne!(first, last);
    assert_eq!(Some(first), list.search(7));
    assert_eq!(7, list.search(7).unwrap().value());
}

#[test]
fn list_delete_first_match() {
    let allocator = test::initialized(4096);
    let list = TestList::new(&allocator);

    for value in [2, 1, 2].iter().rev() {
        list.insert_front(*value).unwrap();
    }

    list.delete(2).unwrap();

    assert_eq!(vec![1, 2], list.values());
    assert_eq!(2, list.count_nodes());
}

#[test]
fn list_insert_after() {
    let allocator = test::initialized(4096);
    let list = TestList::new(&allocator);

    list.insert_front(3).unwrap();
    list.insert_front(1).unwrap();

    list.insert_after(list.search(1), 2).unwrap();
    assert_eq!("[1, 2, 3]", list.to_string());

    list.insert_after(list.search(3), 4).unwrap();
    assert_eq!("[1, 2, 3, 4]", list.to_string());
}

#[test]
fn list_insert_after_none() {
    let allocator = test::initialized(4096);
    let list = TestList::new(&allocator);

    list.insert_front(1).unwrap();

    let before = allocator.usage().unwrap();
    let error = list.insert_after(list.search(9), 2).unwrap_err();

    assert_eq!(ErrorKind::InvalidArgument, error.kind());
    assert_eq!(vec![1], list.values());
    assert_eq!(before, allocator.usage().unwrap());
}

#[test]
fn list_insert_after_stale() {
    let allocator = test::initialized(4096);
    let list = TestList::new(&allocator);

    list.insert_front(2).unwrap();
    let stale = list.insert_front(1).unwrap();

    list.delete(1).unwrap();

    let before = allocator.usage().unwrap();

    assert_eq!(Err(ListError::NotFound), list.insert_after(Some(stale), 5).map(|_| ()));
    assert_eq!(vec![2], list.values());
    assert_eq!(before, allocator.usage().unwrap());
}

#[test]
fn list_insert_after_reused() {
    let allocator = test::initialized(4096);
    let list = TestList::new(&allocator);

    list.insert_front(1).unwrap();
    let stale = list.insert_front(2).unwrap();

    list.delete(2).unwrap();

    //  First-fit: the new node lands in the block of the deleted one.
    let reused = list.insert_front(99).unwrap();

    assert_eq!(stale.node, reused.node);
    assert_ne!(stale, reused);

    assert_eq!(Err(ListError::NotFound), list.insert_after(Some(stale), 7).map(|_| ()));
    assert_eq!(vec![99, 1], list.values());
    assert_eq!(2, allocator.usage().unwrap().allocated_blocks);
}

#[test]
fn list_insert_before() {
    let allocator = test::initialized(4096);
    let list = TestList::new(&allocator);

    let three = list.insert_front(3).unwrap();
    let one = list.insert_front(1).unwrap();

    list.insert_before(Some(three), 2).unwrap();
    assert_eq!("[1, 2, 3]", list.to_string());

    //  Before the first node: becomes the new first node.
    list.insert_before(Some(one), 0).unwrap();
    assert_eq!("[0, 1, 2, 3]", list.to_string());

    let error = list.insert_before(None, 9).unwrap_err();
    assert_eq!(ListError::InvalidArgument("next node is none"), error);
    assert_eq!(4, list.count_nodes());
}

#[test]
fn list_insert_before_stale() {
    let allocator = test::initialized(4096);
    let list = TestList::new(&allocator);

    let stale = list.insert_front(1).unwrap();
    list.delete(1).unwrap();

    assert_eq!(Err(ListError::NotFound), list.insert_before(Some(stale), 5).map(|_| ()));
    assert!(list.is_empty());
}

#[test]
fn list_insert_before_reused() {
    let allocator = test::initialized(4096);
    let list = TestList::new(&allocator);

    list.insert_front(1).unwrap();
    let stale = list.insert_front(2).unwrap();

    list.delete(2).unwrap();

    let reused = list.insert_front(99).unwrap();

    assert_eq!(stale.node, reused.node);

    assert_eq!(Err(ListError::NotFound), list.insert_before(Some(stale), 7).map(|_| ()));
    assert_eq!(vec![99, 1], list.values());

    //  Nor does it delimit a range.
    assert_eq!("[]", list.display_range(Some(stale), None));
    assert_eq!("[99, 1]", list.display_range(None, Some(stale)));

    //  While the fresh reference works.
    list.insert_before(Some(reused), 7).unwrap();
    assert_eq!(vec![7, 99, 1], list.values());
}

#[test]
fn list_allocation_exhausted() {
    let allocator = TestAllocator::new(TestPlatform::new());
    allocator.init(512).unwrap();

    let list = TestList::new(&allocator);

    let mut inserted = 0;

    let error = loop {
        match list.insert_front(inserted) {
            Ok(_) => inserted += 1,
            Err(error) => break error,
        }
    };

    assert!(inserted > 0);
    assert_eq!(ErrorKind::AllocationExhausted, error.kind());
    assert!(matches!(error, ListError::AllocationExhausted(AllocError::Exhausted { .. })));
    assert_eq!(inserted as usize, list.count_nodes());

    let first = list.search(inserted - 1);
    assert!(list.insert_after(first, -1).is_err());
    assert_eq!(inserted as usize, list.count_nodes());
}

#[test]
fn list_range() {
    let allocator = test::initialized(4096);
    let list = TestList::new(&allocator);

    for value in (1..=4).rev() {
        list.insert_front(value).unwrap();
    }

    assert_eq!("[2, 3]", list.display_range(list.search(2), list.search(3)));
    assert_eq!("[1, 2, 3, 4]", list.display_range(None, None));
    assert_eq!("[3, 4]", list.display_range(list.search(3), None));
    assert_eq!("[1, 2]", list.display_range(None, list.search(2)));
    assert_eq!("[4]", list.display_range(list.search(4), list.search(4)));

    //  `end` before `start`: runs to the end.
    assert_eq!(vec![3, 4], list.range(list.search(3), list.search(1)));

    let stale = list.insert_front(0).unwrap();
    list.delete(0).unwrap();

    assert_eq!("[]", list.display_range(Some(stale), None));
}

#[test]
fn list_cleanup() {
    let allocator = test::initialized(4096);
    let empty = allocator.usage().unwrap();

    let mut list = TestList::new(&allocator);

    for value in 0..10 {
        list.insert_front(value).unwrap();
    }

    assert_eq!(10, allocator.usage().unwrap().allocated_blocks);

    list.cleanup();

    assert!(list.is_empty());
    assert_eq!(empty, allocator.usage().unwrap());

    //  Usable again.
    list.insert_front(1).unwrap();
    drop(list);

    assert_eq!(empty, allocator.usage().unwrap());
}

#[test]
fn list_concurrent_disjoint() {
    const THREADS: i32 = 4;
    const VALUES: i32 = 50;

    let allocator = test::initialized(32 * 1024);
    let list = TestList::new(&allocator);

    std::thread::scope(|scope| {
        for thread in 0..THREADS {
            let list = &list;

            scope.spawn(move || {
                for value in 0..VALUES {
                    list.insert_front(thread * VALUES + value).unwrap();
                }

                for value in 0..VALUES {
                    assert!(list.search(thread * VALUES + value).is_some());
                }

                for value in (0..VALUES).step_by(2) {
                    list.delete(thread * VALUES + value).unwrap();
                }
            });
        }
    });

    assert_eq!((THREADS * VALUES / 2) as usize, list.count_nodes());

    let mut values = list.values();
    values.sort();

    let expected: Vec<_> = (0..THREADS * VALUES).filter(|value| value % 2 == 1).collect();
    assert_eq!(expected, values);
}

} // mod tests
