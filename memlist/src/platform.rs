//! Abstraction over OS differences.

mod heap;

pub use heap::HeapPlatform;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "linux")]
pub use linux::MmapPlatform;

/// The platform of `MemoryManager`: anonymous mappings on Linux, the process heap elsewhere.
#[cfg(target_os = "linux")]
pub type DefaultPlatform = MmapPlatform;

/// The platform of `MemoryManager`: anonymous mappings on Linux, the process heap elsewhere.
#[cfg(not(target_os = "linux"))]
pub type DefaultPlatform = HeapPlatform;
