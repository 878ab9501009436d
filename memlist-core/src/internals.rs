//! The internals of memlist-core.
//!
//! The internals provide all the heavy-lifting.

pub(crate) mod arena;
pub(crate) mod free_list;
pub(crate) mod node;
