//! Errors reported by the Allocator and the ConcurrentList.
//!
//! Every error maps onto a small taxonomy, `ErrorKind`, which tells the caller how to react:
//!
//! -   `BackingStoreExhausted`: the arena could not be obtained; fatal for a process relying on it.
//! -   `AllocationExhausted`: no block large enough; recoverable.
//! -   `InvalidArgument`: the call was rejected without any side-effect.
//! -   `NotFound`: a lookup missed; informational.
//! -   `ContractViolation`: the caller broke a precondition, detected before any state was touched.

use thiserror::Error;

use super::Allocation;

/// The category of an error.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    /// The backing store could not provide the arena.
    BackingStoreExhausted,
    /// The arena cannot satisfy the request.
    AllocationExhausted,
    /// An argument was rejected.
    InvalidArgument,
    /// A lookup found nothing.
    NotFound,
    /// A precondition of the API was violated.
    ContractViolation,
}

/// Errors of the Allocator.
#[derive(Clone, Copy, Debug, Eq, Error, Hash, PartialEq)]
pub enum AllocError {
    /// The platform could not provide an arena of `capacity` bytes.
    #[error("backing store cannot provide an arena of {capacity} bytes")]
    BackingStoreExhausted {
        /// Requested capacity.
        capacity: usize,
    },
    /// The requested capacity cannot hold a single block.
    #[error("capacity {capacity} is below the minimum of {minimum} bytes")]
    InvalidCapacity {
        /// Requested capacity.
        capacity: usize,
        /// Minimum capacity for the configuration.
        minimum: usize,
    },
    /// Zero-sized allocations are not served.
    #[error("zero-sized allocation")]
    ZeroSize,
    /// The request exceeds the capacity of the arena.
    #[error("request of {requested} bytes exceeds the arena capacity of {capacity} bytes")]
    TooLarge {
        /// Requested size.
        requested: usize,
        /// Capacity of the arena.
        capacity: usize,
    },
    /// No free block is large enough.
    #[error("no free block can hold {requested} bytes")]
    Exhausted {
        /// Requested size.
        requested: usize,
    },
    /// The allocator already manages an arena.
    #[error("allocator is already initialized")]
    AlreadyInitialized,
    /// The allocator manages no arena: it was never initialized, or was deinitialized.
    #[error("allocator is not initialized")]
    Uninitialized,
    /// The address does not designate the start of a block of this arena.
    #[error("address {address:#x} was not handed out by this allocator")]
    ForeignPointer {
        /// Offending address.
        address: usize,
    },
    /// The address designates a block which is already free.
    #[error("block at {address:#x} is already free")]
    DoubleFree {
        /// Offending address.
        address: usize,
    },
}

impl AllocError {
    /// Returns the category of the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AllocError::BackingStoreExhausted { .. } => ErrorKind::BackingStoreExhausted,
            AllocError::TooLarge { .. } | AllocError::Exhausted { .. } => ErrorKind::AllocationExhausted,
            AllocError::ZeroSize | AllocError::InvalidCapacity { .. } => ErrorKind::InvalidArgument,
            AllocError::AlreadyInitialized
                | AllocError::Uninitialized
                | AllocError::ForeignPointer { .. }
                | AllocError::DoubleFree { .. } => ErrorKind::ContractViolation,
        }
    }
}

/// Error of `Allocator::resize`.
///
/// Unless the block was being released, the original allocation is handed back intact and remains valid.
#[derive(Debug, Error)]
#[error("resize failed: {error}")]
pub struct ResizeError<'a> {
    #[source]
    error: AllocError,
    allocation: Option<Allocation<'a>>,
}

impl<'a> ResizeError<'a> {
    pub(crate) fn new(error: AllocError, allocation: Option<Allocation<'a>>) -> Self { Self { error, allocation } }

    /// Returns the underlying error.
    pub fn error(&self) -> AllocError { self.error }

    /// Returns the category of the underlying error.
    pub fn kind(&self) -> ErrorKind { self.error.kind() }

    /// Recovers the original allocation, if any.
    pub fn into_allocation(self) -> Option<Allocation<'a>> { self.allocation }
}

/// Errors of the ConcurrentList.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum ListError {
    /// A required node reference was missing.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// No node matched.
    #[error("node not found")]
    NotFound,
    /// The allocator could not provide storage for a new node.
    #[error("node allocation failed: {0}")]
    AllocationExhausted(#[from] AllocError),
}

impl ListError {
    /// Returns the category of the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ListError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ListError::NotFound => ErrorKind::NotFound,
            ListError::AllocationExhausted(_) => ErrorKind::AllocationExhausted,
        }
    }
}

// mod tests
