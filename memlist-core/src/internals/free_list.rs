//! Free List
//!
//! The arena is tiled by blocks: every block starts with a `BlockHeader`, immediately followed by its usable region,
//! and the next block starts right after the usable region. The free blocks are further chained, by offset, in a
//! singly-linked list sorted by ascending offset.
//!
//! Invariants:
//!
//! -   Walking from offset 0 by `header + size` steps visits every block, and ends exactly at the end of the arena.
//! -   The free chain visits exactly the blocks tagged free, in ascending offset order.
//! -   No two free blocks are physically adjacent: releasing a block merges it with its free neighbours.

use core::{marker, ptr::NonNull};

use crate::{AllocError, Configuration, Properties};

use super::arena::Arena;

const FREE: usize = 0x_F4EE_B10C;
const ALLOCATED: usize = 0x_A110_CA7E;
const NIL: usize = usize::MAX;

/// BlockHeader
///
/// The in-band header preceding each block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(C)]
pub(crate) struct BlockHeader {
    //  Usable bytes following the header.
    size: usize,
    //  Offset of the next free block, or NIL; only meaningful for free blocks.
    next: usize,
    tag: usize,
}

impl BlockHeader {
    fn free(size: usize, next: Option<usize>) -> Self { Self { size, next: next.unwrap_or(NIL), tag: FREE } }

    fn allocated(size: usize) -> Self { Self { size, next: NIL, tag: ALLOCATED } }

    /// Returns the number of usable bytes of the block.
    pub(crate) fn size(&self) -> usize { self.size }

    /// Returns whether the block is on the free chain.
    pub(crate) fn is_free(&self) -> bool { self.tag == FREE }

    /// Returns whether the block is handed out.
    pub(crate) fn is_allocated(&self) -> bool { self.tag == ALLOCATED }

    fn next(&self) -> Option<usize> { if self.next == NIL { None } else { Some(self.next) } }
}

/// FreeList
///
/// The block structure of an arena. Offsets designate the header of a block.
pub(crate) struct FreeList<C> {
    arena: Arena,
    head: Option<usize>,
    _configuration: marker::PhantomData<fn() -> C>,
}

//  Free blocks around an allocated block, in chain order: `before < previous < offset < next`.
struct Neighbours {
    before: Option<usize>,
    previous: Option<usize>,
    next: Option<usize>,
}

impl<C> FreeList<C> {
    /// Returns the size of the arena.
    pub(crate) fn capacity(&self) -> usize { self.arena.size() }

    /// Gives back the arena, for release.
    pub(crate) fn into_arena(self) -> Arena { self.arena }
}

impl<C> FreeList<C>
    where
        C: Configuration
{
    /// Creates the block structure of a fresh arena: a single free block spanning it all.
    pub(crate) fn new(arena: Arena) -> Self {
        debug_assert!(arena.size() >= Properties::<C>::minimum_capacity());
        debug_assert!(arena.size() % Properties::<C>::granularity() == 0);

        let mut list = Self { arena, head: Some(0), _configuration: marker::PhantomData };

        let size = list.capacity() - Properties::<C>::header_size();
        list.write(0, BlockHeader::free(size, None));

        list
    }

    /// Returns the header of the block at `offset`.
    pub(crate) fn block(&self, offset: usize) -> BlockHeader { self.read(offset) }

    /// Returns a pointer to the usable region of the block at `offset`.
    pub(crate) fn region(&self, offset: usize) -> NonNull<u8> {
        //  Safety:
        //  -   A block header is always followed by at least a minimum block, within the arena.
        unsafe { self.arena.at(offset + Properties::<C>::header_size()) }
    }

    /// Returns an iterator over all blocks, in physical order.
    pub(crate) fn blocks(&self) -> Blocks<'_, C> { Blocks { list: self, cursor: 0 } }

    /// Returns an iterator over the offsets of the free blocks, in chain order.
    pub(crate) fn free_blocks(&self) -> FreeBlocks<'_, C> { FreeBlocks { list: self, cursor: self.head } }

    /// Allocates a block of at least `size` usable bytes, from the first free block large enough.
    ///
    /// `size` must be a non-zero multiple of the granularity.
    ///
    /// Returns the offset of the block, or None if no free block is large enough.
    pub(crate) fn allocate(&mut self, size: usize) -> Option<usize> {
        debug_assert!(size > 0);
        debug_assert!(size % Properties::<C>::granularity() == 0, "{} not granular", size);

        let mut previous = None;
        let mut cursor = self.head;

        while let Some(offset) = cursor {
            let block = self.read(offset);
            debug_assert!(block.is_free(), "{:x} on the free chain, but not free", offset);

            if block.size >= size {
                let replacement = self.carve(offset, block, size);
                self.relink(previous, replacement);
                return Some(offset);
            }

            previous = cursor;
            cursor = block.next();
        }

        None
    }

    /// Returns the allocated block at `offset` to the free chain, merging it with its free neighbours.
    pub(crate) fn deallocate(&mut self, offset: usize) {
        let header = Properties::<C>::header_size();

        let block = self.read(offset);
        debug_assert!(block.is_allocated(), "{:x} is not allocated", offset);

        let Neighbours { before, mut previous, mut next } = self.neighbours(offset);

        let mut start = offset;
        let mut size = block.size;

        if let Some(following) = next {
            if offset + header + size == following {
                size += header + self.read(following).size;
                next = self.read(following).next();
            }
        }

        if let Some(preceding) = previous {
            let merged = self.read(preceding);

            if preceding + header + merged.size == offset {
                start = preceding;
                size += header + merged.size;
                previous = before;
            }
        }

        self.write(start, BlockHeader::free(size, next));
        self.relink(previous, Some(start));
    }

    /// Attempts to grow, in place, the allocated block at `offset` to at least `size` usable bytes.
    ///
    /// Only the physically following block, if free, is absorbed; any surplus is split off again.
    ///
    /// Returns the new usable size, or None if the block cannot grow in place.
    pub(crate) fn grow(&mut self, offset: usize, size: usize) -> Option<usize> {
        let header = Properties::<C>::header_size();

        let block = self.read(offset);
        debug_assert!(block.is_allocated(), "{:x} is not allocated", offset);

        if block.size >= size {
            return Some(block.size);
        }

        let next = offset + header + block.size;

        if next >= self.capacity() {
            return None;
        }

        let following = self.read(next);

        if !following.is_free() || block.size + header + following.size < size {
            return None;
        }

        let neighbours = self.neighbours(offset);
        debug_assert_eq!(Some(next), neighbours.next, "{:x} is free, but not on the free chain", next);

        let previous = neighbours.previous;
        let combined = BlockHeader::free(block.size + header + following.size, following.next());

        let replacement = self.carve(offset, combined, size);
        self.relink(previous, replacement);

        Some(self.read(offset).size)
    }

    /// Returns the offset of the allocated block whose usable region starts at `pointer`, in O(1).
    ///
    /// Relies on the block tags, hence cannot tell a stray pointer into user data apart from a block if that data
    /// mimics a header; only use with pointers obtained from this list. Debug builds cross-check with `locate`.
    pub(crate) fn header_of(&self, pointer: NonNull<u8>) -> Result<usize, AllocError> {
        let address = pointer.as_ptr() as usize;
        let offset = self.candidate(pointer)?;
        let block = self.read(offset);

        if block.is_allocated() && offset + Properties::<C>::header_size() + block.size <= self.capacity() {
            debug_assert_eq!(Ok(offset), self.locate(pointer), "{:x} is not on the block chain", offset);
            Ok(offset)
        } else if block.is_free() {
            Err(AllocError::DoubleFree { address })
        } else {
            Err(AllocError::ForeignPointer { address })
        }
    }

    /// Returns the offset of the allocated block whose usable region starts at `pointer`, by walking the blocks.
    pub(crate) fn locate(&self, pointer: NonNull<u8>) -> Result<usize, AllocError> {
        let address = pointer.as_ptr() as usize;
        let offset = self.candidate(pointer)?;

        for (cursor, block) in self.blocks() {
            if cursor == offset {
                return if block.is_allocated() { Ok(offset) } else { Err(AllocError::DoubleFree { address }) };
            }

            if cursor > offset {
                break;
            }
        }

        Err(AllocError::ForeignPointer { address })
    }

    //  Returns the header offset `pointer` would have, if it pointed at a usable region.
    fn candidate(&self, pointer: NonNull<u8>) -> Result<usize, AllocError> {
        let header = Properties::<C>::header_size();
        let foreign = AllocError::ForeignPointer { address: pointer.as_ptr() as usize };

        let user = self.arena.offset_of(pointer).ok_or(foreign)?;

        if user < header || (user - header) % Properties::<C>::granularity() != 0 {
            return Err(foreign);
        }

        Ok(user - header)
    }

    //  Marks the free `block` at `offset` as allocated with `size` usable bytes, splitting off the surplus if large
    //  enough.
    //
    //  Returns what should replace `offset` in the free chain: the split-off suffix, or the block's successor.
    fn carve(&mut self, offset: usize, block: BlockHeader, size: usize) -> Option<usize> {
        let header = Properties::<C>::header_size();

        debug_assert!(block.size >= size);

        let surplus = block.size - size;

        if surplus >= Properties::<C>::split_threshold() {
            let suffix = offset + header + size;

            self.write(suffix, BlockHeader::free(surplus - header, block.next()));
            self.write(offset, BlockHeader::allocated(size));

            Some(suffix)
        } else {
            self.write(offset, BlockHeader::allocated(block.size));

            block.next()
        }
    }

    //  Points `previous`, or the head if None, to `next`.
    fn relink(&mut self, previous: Option<usize>, next: Option<usize>) {
        match previous {
            Some(previous) => {
                let mut block = self.read(previous);
                block.next = next.unwrap_or(NIL);
                self.write(previous, block);
            },
            None => self.head = next,
        }
    }

    //  Locates the insertion point of the allocated block at `offset` in a single walk of the free chain.
    fn neighbours(&self, offset: usize) -> Neighbours {
        let mut neighbours = Neighbours { before: None, previous: None, next: self.head };

        while let Some(cursor) = neighbours.next {
            if cursor > offset {
                break;
            }

            neighbours.before = neighbours.previous;
            neighbours.previous = Some(cursor);
            neighbours.next = self.read(cursor).next();
        }

        neighbours
    }

    fn read(&self, offset: usize) -> BlockHeader {
        debug_assert!(offset % Properties::<C>::granularity() == 0, "{:x} not granular", offset);

        //  Safety:
        //  -   `offset` is within the arena, and aligned for a header.
        //  -   The bytes of the arena are initialized.
        unsafe { self.arena.at(offset).cast::<BlockHeader>().as_ptr().read() }
    }

    fn write(&mut self, offset: usize, header: BlockHeader) {
        debug_assert!(offset % Properties::<C>::granularity() == 0, "{:x} not granular", offset);

        //  Safety:
        //  -   `offset` is within the arena, and aligned for a header.
        //  -   `&mut self` guarantees exclusive access to the block structure.
        unsafe { self.arena.at(offset).cast::<BlockHeader>().as_ptr().write(header) }
    }
}

/// Iterator over the blocks of the arena, in physical order: `(offset, header)`.
pub(crate) struct Blocks<'a, C> {
    list: &'a FreeList<C>,
    cursor: usize,
}

impl<'a, C> Iterator for Blocks<'a, C>
    where
        C: Configuration
{
    type Item = (usize, BlockHeader);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.list.capacity() {
            return None;
        }

        let offset = self.cursor;
        let block = self.list.read(offset);

        self.cursor = offset + Properties::<C>::header_size() + block.size;

        Some((offset, block))
    }
}

/// Iterator over the offsets of the free blocks, in chain order.
pub(crate) struct FreeBlocks<'a, C> {
    list: &'a FreeList<C>,
    cursor: Option<usize>,
}

impl<'a, C> Iterator for FreeBlocks<'a, C>
    where
        C: Configuration
{
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let offset = self.cursor?;
        self.cursor = self.list.read(offset).next();
        Some(offset)
    }
}

// mod tests
