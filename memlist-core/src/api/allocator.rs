//! Allocator
//!
//! The Allocator claims a single arena from its Platform, and carves blocks out of it with a first-fit policy over an
//! address-ordered free list. All operations are serialized by a single mutex.

use core::{cmp, ptr::{self, NonNull}};

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::internals::{arena::Arena, free_list::FreeList};

use super::{AllocError, Allocation, Configuration, Platform, Properties, ResizeError};

/// Allocator
///
/// A thread-safe, fixed-capacity allocator over a single arena.
///
/// The lifecycle is explicit: `new` is `const` and claims nothing, `init` claims the arena, and `deinit` (or dropping
/// the allocator) returns it to the Platform.
pub struct Allocator<C, P: Platform> {
    platform: P,
    state: Mutex<Option<FreeList<C>>>,
}

/// A snapshot of the occupation of the arena.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Usage {
    /// Size of the arena.
    pub capacity: usize,
    /// Number of blocks handed out.
    pub allocated_blocks: usize,
    /// Usable bytes of the blocks handed out.
    pub allocated_bytes: usize,
    /// Number of free blocks.
    pub free_blocks: usize,
    /// Usable bytes of the free blocks.
    pub free_bytes: usize,
    /// Usable bytes of the largest free block.
    pub largest_free: usize,
    /// Bytes taken by block headers.
    pub overhead: usize,
}

impl Usage {
    /// Returns the number of bytes accounted for, which always equals `capacity`.
    pub fn accounted(&self) -> usize { self.allocated_bytes + self.free_bytes + self.overhead }
}

impl<C, P: Platform> Allocator<C, P> {
    /// Creates an uninitialized instance.
    pub const fn new(platform: P) -> Self { Self { platform, state: Mutex::new(None) } }

    /// Returns a reference to the Platform.
    pub fn platform(&self) -> &P { &self.platform }

    /// Returns whether an arena is currently managed.
    pub fn is_initialized(&self) -> bool { self.state.lock().is_some() }

    /// Returns the size of the arena, or 0 if uninitialized.
    pub fn capacity(&self) -> usize { self.state.lock().as_ref().map_or(0, |list| list.capacity()) }

    /// Returns the arena to the Platform.
    ///
    /// Outstanding allocations borrow the allocator, hence none can survive this call. A no-op if uninitialized.
    pub fn deinit(&mut self) {
        let list = self.state.get_mut().take();

        //  Safety:
        //  -   `&mut self` guarantees no Allocation is alive.
        unsafe { self.release_arena(list) };
    }

    /// Returns the arena to the Platform, without the borrow-checker's help.
    ///
    /// A no-op if uninitialized.
    ///
    /// #   Safety
    ///
    /// -   Assumes that no pointer into the arena, whether an Allocation or a raw pointer, is used afterwards.
    pub unsafe fn deinit_unchecked(&self) {
        let list = self.state.lock().take();

        self.release_arena(list);
    }

    unsafe fn release_arena(&self, list: Option<FreeList<C>>) {
        match list.map(FreeList::into_arena) {
            Some(arena) => {
                let capacity = arena.size();
                arena.release(&self.platform);
                debug!(capacity, "arena released");
            },
            None => debug!("deinit of an uninitialized allocator"),
        }
    }
}

impl<C, P> Allocator<C, P>
    where
        C: Configuration,
        P: Platform,
{
    /// Claims an arena of `capacity` bytes, rounded down to the granularity, from the Platform.
    ///
    /// Fails, without side-effect, if already initialized, if `capacity` cannot hold a single block, or if the
    /// Platform cannot provide the arena.
    pub fn init(&self, capacity: usize) -> Result<(), AllocError> {
        let mut state = self.state.lock();

        if state.is_some() {
            warn!(capacity, "rejected initialization of an initialized allocator");
            return Err(AllocError::AlreadyInitialized);
        }

        let minimum = Properties::<C>::minimum_capacity();
        let size = Properties::<C>::arena_size(capacity);

        if size < minimum {
            return Err(AllocError::InvalidCapacity { capacity, minimum });
        }

        let arena = Arena::claim(&self.platform, size, Properties::<C>::granularity()).ok_or_else(|| {
            error!(capacity, "backing store cannot provide the arena");
            AllocError::BackingStoreExhausted { capacity }
        })?;

        *state = Some(FreeList::new(arena));

        debug!(capacity = size, "arena initialized");
        Ok(())
    }

    /// Acquires a block of at least `size` usable bytes.
    ///
    /// The usable region is aligned to the granularity, hence suitably aligned for any type whose alignment does not
    /// exceed it.
    pub fn acquire(&self, size: usize) -> Result<Allocation<'_>, AllocError> {
        let mut state = self.state.lock();
        let list = state.as_mut().ok_or(AllocError::Uninitialized)?;

        let aligned = Properties::<C>::aligned_size(size, list.capacity())?;

        let offset = list.allocate(aligned).ok_or_else(|| {
            debug!(size, "no free block large enough");
            AllocError::Exhausted { requested: size }
        })?;

        trace!(size, offset, "acquired");

        //  Safety:
        //  -   The block at `offset` was just allocated, and this is its only token.
        Ok(unsafe { Allocation::from_raw_parts(list.region(offset), list.block(offset).size()) })
    }

    /// Releases a block, merging it with its free neighbours.
    ///
    /// Fails, without side-effect, if `allocation` does not come from this allocator.
    pub fn release(&self, allocation: Allocation<'_>) -> Result<(), AllocError> {
        let mut state = self.state.lock();
        let list = state.as_mut().ok_or(AllocError::Uninitialized)?;

        let offset = list.header_of(allocation.as_ptr()).map_err(|error| {
            warn!(%error, "rejected release");
            error
        })?;

        list.deallocate(offset);

        trace!(offset, "released");
        Ok(())
    }

    /// Resizes a block, preserving its contents up to the smaller of the old and new sizes.
    ///
    /// -   With no `allocation`, behaves as `acquire`.
    /// -   With a `size` of 0, releases `allocation` and returns None.
    /// -   If the block already holds `size` bytes, returns it unchanged.
    /// -   Otherwise grows the block in place if the following block is free and large enough, or moves it.
    ///
    /// On failure, the original allocation is handed back, intact, within the error.
    pub fn resize<'a>(&'a self, allocation: Option<Allocation<'a>>, size: usize)
        -> Result<Option<Allocation<'a>>, ResizeError<'a>>
    {
        let allocation = match allocation {
            Some(allocation) => allocation,
            None => return self.acquire(size).map(Some).map_err(|error| ResizeError::new(error, None)),
        };

        if size == 0 {
            return match self.release(allocation) {
                Ok(()) => Ok(None),
                Err(error) => Err(ResizeError::new(error, None)),
            };
        }

        let mut state = self.state.lock();

        let list = match state.as_mut() {
            Some(list) => list,
            None => return Err(ResizeError::new(AllocError::Uninitialized, Some(allocation))),
        };

        let located = list.header_of(allocation.as_ptr())
            .and_then(|offset| Properties::<C>::aligned_size(size, list.capacity()).map(|aligned| (offset, aligned)));

        let (offset, aligned) = match located {
            Ok(located) => located,
            Err(error) => {
                warn!(%error, size, "rejected resize");
                return Err(ResizeError::new(error, Some(allocation)));
            },
        };

        if let Some(usable) = list.grow(offset, aligned) {
            trace!(offset, usable, "resized in place");

            //  Safety:
            //  -   Same block, the previous token is consumed.
            return Ok(Some(unsafe { Allocation::from_raw_parts(allocation.into_raw(), usable) }));
        }

        let target = match list.allocate(aligned) {
            Some(target) => target,
            None => {
                debug!(size, "no free block large enough");
                return Err(ResizeError::new(AllocError::Exhausted { requested: size }, Some(allocation)));
            },
        };

        let destination = list.region(target);
        let copied = cmp::min(allocation.size(), size);

        //  Safety:
        //  -   Source and destination are distinct blocks of the arena.
        //  -   `copied` fits in either usable region.
        unsafe { ptr::copy_nonoverlapping(allocation.as_ptr().as_ptr(), destination.as_ptr(), copied) };

        list.deallocate(offset);

        trace!(from = offset, to = target, copied, "resized by moving");

        //  Safety:
        //  -   The block at `target` was just allocated, and this is its only token.
        Ok(Some(unsafe { Allocation::from_raw_parts(destination, list.block(target).size()) }))
    }

    /// Recovers the token of a block from a pointer obtained by `Allocation::into_raw`.
    ///
    /// The pointer is validated by walking the blocks of the arena: pointers which are not the start of a usable
    /// region are rejected, as are pointers to free blocks.
    ///
    /// #   Safety
    ///
    /// -   Assumes that no other token for this block exists.
    pub unsafe fn from_raw(&self, pointer: NonNull<u8>) -> Result<Allocation<'_>, AllocError> {
        let state = self.state.lock();
        let list = state.as_ref().ok_or(AllocError::Uninitialized)?;

        let offset = list.locate(pointer)?;

        Ok(Allocation::from_raw_parts(pointer, list.block(offset).size()))
    }

    /// Returns a snapshot of the occupation of the arena.
    pub fn usage(&self) -> Result<Usage, AllocError> {
        let state = self.state.lock();
        let list = state.as_ref().ok_or(AllocError::Uninitialized)?;

        let header = Properties::<C>::header_size();
        let mut usage = Usage { capacity: list.capacity(), ..Usage::default() };

        for (_, block) in list.blocks() {
            usage.overhead += header;

            if block.is_free() {
                usage.free_blocks += 1;
                usage.free_bytes += block.size();
                usage.largest_free = cmp::max(usage.largest_free, block.size());
            } else {
                usage.allocated_blocks += 1;
                usage.allocated_bytes += block.size();
            }
        }

        debug_assert_eq!(usage.free_blocks, list.free_blocks().count());
        debug_assert_eq!(usage.capacity, usage.accounted());

        Ok(usage)
    }
}

impl<C, P: Platform> Drop for Allocator<C, P> {
    fn drop(&mut self) { self.deinit(); }
}

#[cfg(test)]
mod tests {

use super::*;
use super::super::{DefaultConfiguration, ErrorKind};

use crate::internals::test::{self, TestAllocator, TestPlatform};

fn header() -> usize { Properties::<DefaultConfiguration>::header_size() }

fn fill(allocation: &mut Allocation<'_>, seed: u8) {
    for (index, byte) in allocation.as_mut_slice().iter_mut().enumerate() {
        *byte = seed.wrapping_add(index as u8);
    }
}

fn check(allocation: &Allocation<'_>, seed: u8, length: usize) {
    for (index, byte) in allocation.as_slice()[..length].iter().enumerate() {
        assert_eq!(seed.wrapping_add(index as u8), *byte, "index {}", index);
    }
}

#[test]
fn allocator_scenario() {
    let allocator = test::initialized(1024);

    let first = allocator.acquire(100).unwrap();
    let address = first.as_ptr();

    assert!(first.size() >= 100);
    assert_eq!(0, address.as_ptr() as usize % 16);

    assert_eq!(Err(AllocError::TooLarge { requested: 2000, capacity: 1024 }), allocator.acquire(2000).map(|_| ()));

    allocator.release(first).unwrap();

    let second = allocator.acquire(100).unwrap();
    assert_eq!(address, second.as_ptr());

    allocator.release(second).unwrap();
}

#[test]
fn allocator_zero_size() {
    let allocator = test::initialized(1024);

    let error = allocator.acquire(0).unwrap_err();

    assert_eq!(AllocError::ZeroSize, error);
    assert_eq!(ErrorKind::InvalidArgument, error.kind());
}

#[test]
fn allocator_uninitialized() {
    let allocator = TestAllocator::new(TestPlatform::new());

    assert!(!allocator.is_initialized());
    assert_eq!(0, allocator.capacity());
    assert_eq!(Err(AllocError::Uninitialized), allocator.acquire(8).map(|_| ()));
    assert_eq!(Err(AllocError::Uninitialized), allocator.usage());
    assert_eq!(0, allocator.platform().claims());
}

#[test]
fn allocator_init_rounds_down() {
    let allocator = test::initialized(1039);

    assert_eq!(1024, allocator.capacity());
    assert_eq!(1024, allocator.usage().unwrap().capacity);
}

#[test]
fn allocator_init_invalid_capacity() {
    let allocator = TestAllocator::new(TestPlatform::new());
    let minimum = Properties::<DefaultConfiguration>::minimum_capacity();

    assert_eq!(Err(AllocError::InvalidCapacity { capacity: 16, minimum }), allocator.init(16));
    assert_eq!(Err(AllocError::InvalidCapacity { capacity: 0, minimum }), allocator.init(0));
    assert!(!allocator.is_initialized());

    assert_eq!(Ok(()), allocator.init(minimum));
    assert_eq!(minimum, allocator.capacity());
}

#[test]
fn allocator_init_backing_store_exhausted() {
    let allocator = TestAllocator::new(TestPlatform::exhausted());

    let error = allocator.init(1024).unwrap_err();

    assert_eq!(AllocError::BackingStoreExhausted { capacity: 1024 }, error);
    assert_eq!(ErrorKind::BackingStoreExhausted, error.kind());
    assert!(!allocator.is_initialized());
}

#[test]
fn allocator_init_twice() {
    let allocator = test::initialized(1024);

    let mut allocation = allocator.acquire(64).unwrap();
    fill(&mut allocation, 7);

    let before = allocator.usage().unwrap();

    assert_eq!(Err(AllocError::AlreadyInitialized), allocator.init(2048));

    assert_eq!(1, allocator.platform().claims());
    assert_eq!(1024, allocator.capacity());
    assert_eq!(before, allocator.usage().unwrap());
    check(&allocation, 7, 64);

    allocator.release(allocation).unwrap();
}

#[test]
fn allocator_deinit_reinit() {
    let mut allocator = test::initialized(1024);

    let allocation = allocator.acquire(64).unwrap();
    allocator.release(allocation).unwrap();

    allocator.deinit();

    assert!(!allocator.is_initialized());
    assert_eq!(1, allocator.platform().releases());
    assert_eq!(Err(AllocError::Uninitialized), allocator.acquire(8).map(|_| ()));

    //  Idempotent.
    allocator.deinit();
    assert_eq!(1, allocator.platform().releases());

    allocator.init(2048).unwrap();

    assert_eq!(2048, allocator.capacity());
    assert_eq!(2, allocator.platform().claims());
}

#[test]
fn allocator_deinit_unchecked() {
    let allocator = test::initialized(1024);

    let pointer = allocator.acquire(64).unwrap().into_raw();

    unsafe { allocator.deinit_unchecked() };

    assert_eq!(1, allocator.platform().releases());
    assert_eq!(Err(AllocError::Uninitialized), unsafe { allocator.from_raw(pointer) }.map(|_| ()));
}

#[test]
fn allocator_drop_releases() {
    let platform = TestPlatform::new();

    {
        let allocator = Allocator::<DefaultConfiguration, _>::new(&platform);
        allocator.init(1024).unwrap();

        let _leaked = allocator.acquire(64).unwrap().into_raw();

        assert_eq!(0, platform.releases());
    }

    assert_eq!(1, platform.claims());
    assert_eq!(1, platform.releases());
}

#[test]
fn allocator_exhaustion_disjoint() {
    let allocator = test::initialized(4096);

    let mut allocations = Vec::new();

    loop {
        match allocator.acquire(48 + (allocations.len() % 5) * 16) {
            Ok(allocation) => allocations.push(allocation),
            Err(error) => {
                assert_eq!(ErrorKind::AllocationExhausted, error.kind());
                break;
            },
        }
    }

    assert!(allocations.len() > 10, "{}", allocations.len());

    let mut ranges: Vec<_> = allocations.iter()
        .map(|a| (a.as_ptr().as_ptr() as usize, a.as_ptr().as_ptr() as usize + a.size()))
        .collect();
    ranges.sort();

    for window in ranges.windows(2) {
        assert!(window[0].1 + header() <= window[1].0, "{:?}", window);
    }

    let usage = allocator.usage().unwrap();

    assert_eq!(allocations.len(), usage.allocated_blocks);
    assert_eq!(4096, usage.accounted());

    for allocation in allocations {
        allocator.release(allocation).unwrap();
    }

    assert_eq!(1, allocator.usage().unwrap().free_blocks);
}

#[test]
fn allocator_coalesce_any_order() {
    let allocator = test::initialized(4096);

    let mut allocations: Vec<_> = (0..24).map(|i| Some(allocator.acquire(16 + (i % 7) * 24).unwrap())).collect();

    //  7 is co-prime with 24: visits every index once.
    for step in 0..allocations.len() {
        let index = (step * 7) % allocations.len();
        let allocation = allocations[index].take().expect("Not yet released");
        allocator.release(allocation).unwrap();
    }

    let usage = allocator.usage().unwrap();

    assert_eq!(1, usage.free_blocks);
    assert_eq!(0, usage.allocated_blocks);
    assert_eq!(4096 - header(), usage.largest_free);
}

#[test]
fn allocator_release_foreign() {
    let one = test::initialized(1024);
    let two = test::initialized(1024);

    let allocation = one.acquire(64).unwrap();
    let pointer = allocation.as_ptr();

    let error = two.release(allocation).unwrap_err();

    assert_eq!(AllocError::ForeignPointer { address: pointer.as_ptr() as usize }, error);
    assert_eq!(ErrorKind::ContractViolation, error.kind());

    let allocation = unsafe { one.from_raw(pointer) }.unwrap();
    one.release(allocation).unwrap();
}

#[test]
fn allocator_from_raw() {
    let allocator = test::initialized(1024);

    let allocation = allocator.acquire(100).unwrap();
    let size = allocation.size();
    let pointer = allocation.into_raw();

    let allocation = unsafe { allocator.from_raw(pointer) }.unwrap();

    assert_eq!(pointer, allocation.as_ptr());
    assert_eq!(size, allocation.size());

    allocator.release(allocation).unwrap();

    let address = pointer.as_ptr() as usize;

    assert_eq!(Err(AllocError::DoubleFree { address }), unsafe { allocator.from_raw(pointer) }.map(|_| ()));

    let interior = NonNull::new((address + 8) as *mut u8).unwrap();

    assert_eq!(Err(AllocError::ForeignPointer { address: address + 8 }),
        unsafe { allocator.from_raw(interior) }.map(|_| ()));
}

#[test]
fn allocator_resize_none_acquires() {
    let allocator = test::initialized(1024);

    let allocation = allocator.resize(None, 100).unwrap().expect("Acquired");
    assert!(allocation.size() >= 100);

    allocator.release(allocation).unwrap();

    let error = allocator.resize(None, 0).unwrap_err();
    assert_eq!(AllocError::ZeroSize, error.error());
    assert!(error.into_allocation().is_none());
}

#[test]
fn allocator_resize_zero_releases() {
    let allocator = test::initialized(1024);

    let allocation = allocator.acquire(100).unwrap();

    assert!(allocator.resize(Some(allocation), 0).unwrap().is_none());
    assert_eq!(0, allocator.usage().unwrap().allocated_blocks);
}

#[test]
fn allocator_resize_fits() {
    let allocator = test::initialized(1024);

    let allocation = allocator.acquire(100).unwrap();
    let (pointer, size) = (allocation.as_ptr(), allocation.size());

    let allocation = allocator.resize(Some(allocation), 50).unwrap().unwrap();

    assert_eq!(pointer, allocation.as_ptr());
    assert_eq!(size, allocation.size());

    allocator.release(allocation).unwrap();
}

#[test]
fn allocator_resize_in_place() {
    let allocator = test::initialized(1024);

    let mut allocation = allocator.acquire(64).unwrap();
    fill(&mut allocation, 3);

    let pointer = allocation.as_ptr();

    let allocation = allocator.resize(Some(allocation), 300).unwrap().unwrap();

    assert_eq!(pointer, allocation.as_ptr());
    assert!(allocation.size() >= 300);
    check(&allocation, 3, 64);

    allocator.release(allocation).unwrap();

    assert_eq!(1, allocator.usage().unwrap().free_blocks);
}

#[test]
fn allocator_resize_move() {
    let allocator = test::initialized(1024);

    let mut allocation = allocator.acquire(64).unwrap();
    let blocker = allocator.acquire(16).unwrap();

    fill(&mut allocation, 11);

    let pointer = allocation.as_ptr();

    let allocation = allocator.resize(Some(allocation), 200).unwrap().unwrap();

    assert_ne!(pointer, allocation.as_ptr());
    assert!(allocation.size() >= 200);
    check(&allocation, 11, 64);

    let usage = allocator.usage().unwrap();
    assert_eq!(2, usage.allocated_blocks);

    allocator.release(allocation).unwrap();
    allocator.release(blocker).unwrap();
}

#[test]
fn allocator_resize_shrink_preserves_prefix() {
    let allocator = test::initialized(1024);

    let mut allocation = allocator.acquire(256).unwrap();
    fill(&mut allocation, 5);

    let allocation = allocator.resize(Some(allocation), 32).unwrap().unwrap();

    check(&allocation, 5, 32);

    allocator.release(allocation).unwrap();
}

#[test]
fn allocator_resize_failure_keeps_original() {
    let allocator = test::initialized(1024);

    let mut allocation = allocator.acquire(64).unwrap();
    let blocker = allocator.acquire(16).unwrap();

    fill(&mut allocation, 17);

    let pointer = allocation.as_ptr();

    let error = allocator.resize(Some(allocation), 1000).unwrap_err();

    assert_eq!(AllocError::Exhausted { requested: 1000 }, error.error());
    assert_eq!(ErrorKind::AllocationExhausted, error.kind());

    let allocation = error.into_allocation().expect("Original");

    assert_eq!(pointer, allocation.as_ptr());
    check(&allocation, 17, 64);

    let error = allocator.resize(Some(allocation), 2000).unwrap_err();
    assert_eq!(AllocError::TooLarge { requested: 2000, capacity: 1024 }, error.error());

    let allocation = error.into_allocation().expect("Original");

    allocator.release(allocation).unwrap();
    allocator.release(blocker).unwrap();
}

#[test]
fn allocator_concurrent() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 200;

    let allocator = test::initialized(16 * 1024);

    std::thread::scope(|scope| {
        for thread in 0..THREADS {
            let allocator = &allocator;

            scope.spawn(move || {
                for round in 0..ROUNDS {
                    let seed = (thread * ROUNDS + round) as u8;

                    let mut allocation = match allocator.acquire(32 + (round % 4) * 32) {
                        Ok(allocation) => allocation,
                        Err(_) => continue,
                    };

                    fill(&mut allocation, seed);
                    std::thread::yield_now();
                    check(&allocation, seed, allocation.size());

                    allocator.release(allocation).unwrap();
                }
            });
        }
    });

    let usage = allocator.usage().unwrap();

    assert_eq!(0, usage.allocated_blocks);
    assert_eq!(1, usage.free_blocks);
}

} // mod tests
