//! The configuration of memlist-core.
//!
//! A Configuration fixes the geometry of the blocks carved out of the arena:
//!
//! -   The granularity: every block size, and therefore every block offset, is a multiple of it.
//! -   The minimum block size: a free block is only split if the remainder can hold a header and at least that many
//!     usable bytes, otherwise the whole block is handed out and the slack is accepted as internal fragmentation.

use core::mem;

use crate::internals::free_list::BlockHeader;

use super::{AllocError, PowerOf2};

/// Tunes the geometry of the blocks carved out of the arena.
pub trait Configuration {
    /// The granularity of block sizes.
    ///
    /// It is raised to the alignment of the block header, if lower.
    const GRANULARITY: PowerOf2;

    /// The minimum usable size of a block split off a larger one.
    const MINIMUM_BLOCK_SIZE: usize;
}

/// The default Configuration: 16 bytes granularity, 16 bytes minimum block.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultConfiguration;

impl Configuration for DefaultConfiguration {
    //  Safety:
    //  -   16 is a power of 2.
    const GRANULARITY: PowerOf2 = unsafe { PowerOf2::new_unchecked(16) };

    const MINIMUM_BLOCK_SIZE: usize = 16;
}

/// The block geometry derived from a Configuration.
///
/// Exposed as associated functions of a struct, so that implementors of Configuration cannot override them.
pub struct Properties<C>(C);

impl<C> Properties<C>
    where
        C: Configuration
{
    /// Returns the effective granularity, which is also the alignment of the arena and of every usable region.
    pub fn granularity() -> PowerOf2 { C::GRANULARITY.max(PowerOf2::align_of::<BlockHeader>()) }

    /// Returns the size of the header preceding every block, padded to the granularity.
    pub fn header_size() -> usize { Self::granularity().round_up(mem::size_of::<BlockHeader>()) }

    /// Returns the minimum usable size of a block, rounded to the granularity.
    pub fn minimum_block_size() -> usize { Self::granularity().round_up(C::MINIMUM_BLOCK_SIZE.max(1)) }

    /// Returns the minimum surplus a free block must have to be split.
    pub fn split_threshold() -> usize { Self::header_size() + Self::minimum_block_size() }

    /// Returns the minimum capacity of an arena: a single header and a single minimum block.
    pub fn minimum_capacity() -> usize { Self::split_threshold() }

    /// Returns the number of bytes of the arena actually claimed for a requested `capacity`.
    pub fn arena_size(capacity: usize) -> usize { Self::granularity().round_down(capacity) }

    /// Returns the size of a request once rounded up to the granularity.
    ///
    /// Fails if the request is empty, or exceeds the `capacity` of the arena.
    pub fn aligned_size(size: usize, capacity: usize) -> Result<usize, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }

        if size > capacity {
            return Err(AllocError::TooLarge { requested: size, capacity });
        }

        Self::granularity().checked_round_up(size).ok_or(AllocError::TooLarge { requested: size, capacity })
    }
}

// mod tests
