#![deny(missing_docs)]

//! Building blocks for a fixed-arena allocator and a lock-coupled list.
//!
//! memlist-core contains:
//! -   A platform trait, used to obtain the single raw arena to be carved up.
//! -   An `Allocator` serving first-fit, splitting and coalescing allocations out of that arena.
//! -   A `ConcurrentList` whose nodes live in the arena, protected by per-node locks and traversed hand-over-hand.

mod api;
mod internals;
mod utils;

pub use api::*;
