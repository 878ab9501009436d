#![deny(missing_docs)]

//! A fixed-arena memory manager, and a concurrent list whose nodes live in it.
//!
//! The type `MemoryManager` claims a single arena from the operating system, then serves variable-sized blocks out of
//! it, first-fit. The type `List` is a singly-linked list of `i32` allocated from a `MemoryManager`, safe to share
//! across threads.
//!
//! ```
//! use memlist::{DefaultPlatform, List, MemoryManager};
//!
//! static MANAGER: MemoryManager = MemoryManager::new(DefaultPlatform::new());
//!
//! MANAGER.init(64 * 1024).expect("Initialized");
//!
//! let list = List::new(&MANAGER);
//!
//! list.insert_front(5).expect("Inserted");
//! list.insert_front(3).expect("Inserted");
//!
//! assert_eq!("[3, 5]", list.to_string());
//! ```

mod platform;

pub use memlist_core::{
    AllocError, Allocation, Allocator, ConcurrentList, Configuration, DefaultConfiguration, ErrorKind, ListError,
    NodeRef, Platform, PowerOf2, Properties, ResizeError, Usage,
};

pub use platform::{DefaultPlatform, HeapPlatform};

#[cfg(target_os = "linux")]
pub use platform::MmapPlatform;

/// The memory manager, over the default platform.
pub type MemoryManager = Allocator<DefaultConfiguration, DefaultPlatform>;

/// The concurrent list, over a `MemoryManager`.
pub type List<'a> = ConcurrentList<'a, DefaultConfiguration, DefaultPlatform>;
