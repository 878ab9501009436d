//! The API of memlist-core.

mod allocation;
mod allocator;
mod configuration;
mod error;
mod list;
mod platform;

pub use allocation::Allocation;
pub use allocator::{Allocator, Usage};
pub use configuration::{Configuration, DefaultConfiguration, Properties};
pub use error::{AllocError, ErrorKind, ListError, ResizeError};
pub use list::{ConcurrentList, NodeRef};
pub use platform::Platform;

pub use crate::utils::PowerOf2;
