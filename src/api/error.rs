//! Allocation errors.

use std::fmt;

use crate::gpu::traits::{DescriptorKind, DeviceError};

/// Errors returned by every allocator in the crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// A single backing heap cannot satisfy the request.
    ///
    /// The multi-heap allocator recovers from this by creating another heap;
    /// callers of the lower-level [`BuddyAllocator`](crate::BuddyAllocator) see it directly.
    OutOfSpace {
        /// Bytes requested (before rounding)
        requested: u64,
        /// Capacity of the heap that refused it
        capacity: u64,
    },
    /// The device refused to create a heap or resource.
    DeviceOutOfMemory {
        /// Bytes the device was asked for
        requested: u64,
    },
    /// Any other backend failure.
    Backend(String),
    /// A fixed-capacity descriptor table is exhausted.
    TableFull {
        /// Which table
        kind: DescriptorKind,
        /// Its fixed capacity
        capacity: u32,
    },
    /// Deallocation of something this allocator does not currently own.
    InvalidFree(&'static str),
    /// Malformed request (zero size, bad alignment, wrong allocator for the resource).
    InvalidRequest(&'static str),
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::OutOfSpace { requested, capacity } => write!(
                f,
                "backing heap of {} bytes cannot fit {} bytes",
                capacity, requested
            ),
            AllocError::DeviceOutOfMemory { requested } => {
                write!(f, "device out of memory ({} bytes requested)", requested)
            }
            AllocError::Backend(msg) => write!(f, "Backend error: {}", msg),
            AllocError::TableFull { kind, capacity } => {
                write!(f, "{} descriptor table full ({} slots)", kind, capacity)
            }
            AllocError::InvalidFree(reason) => write!(f, "Invalid free: {}", reason),
            AllocError::InvalidRequest(reason) => write!(f, "Invalid request: {}", reason),
        }
    }
}

impl std::error::Error for AllocError {}

impl From<DeviceError> for AllocError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::OutOfMemory { requested } => AllocError::DeviceOutOfMemory { requested },
            DeviceError::Unsupported(msg) | DeviceError::Backend(msg) => AllocError::Backend(msg),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AllocError>;
