//! Resource locations handed out by the allocators.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::gpu::traits::{HeapId, ResourceId};

/// Process-unique identity of an allocator that hands out locations or slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocatorId(u32);

impl AllocatorId {
    pub(crate) fn next() -> Self {
        static NEXT_ID: AtomicU32 = AtomicU32::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw id (for debugging).
    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// How the memory behind a location was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationKind {
    /// Byte range inside a larger committed buffer
    SubAllocated,
    /// Resource placed in a shared heap
    Placed,
    /// Resource with its own implicit heap
    Committed,
}

/// Buddy bookkeeping carried by a location so it can be freed without
/// pointers into allocator internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockData {
    pub heap_index: u32,
    /// Offset in minimum-block units
    pub offset: u32,
    pub order: u32,
    pub serial: u64,
}

/// Where a logical allocation lives.
///
/// Owned exclusively by the caller that requested it. It refers back to its
/// allocator by id only, so it never keeps allocator internals alive. Freeing
/// goes through the owning allocator, which marks the location released.
#[derive(Debug)]
pub struct ResourceLocation {
    pub(crate) owner: AllocatorId,
    pub(crate) kind: LocationKind,
    pub(crate) block: Option<BlockData>,
    pub(crate) heap: Option<HeapId>,
    pub(crate) resource: Option<ResourceId>,
    pub(crate) offset_in_heap: u64,
    pub(crate) offset_from_resource: u64,
    pub(crate) size: u64,
    pub(crate) block_size: u64,
    pub(crate) gpu_address: u64,
    pub(crate) mapped: Option<NonNull<u8>>,
    pub(crate) released: bool,
}

// SAFETY: the mapped range belongs exclusively to this location until it is
// released; the pointer is never shared between locations.
unsafe impl Send for ResourceLocation {}

impl ResourceLocation {
    /// Allocator that owns this location.
    pub fn owner(&self) -> AllocatorId {
        self.owner
    }

    pub fn kind(&self) -> LocationKind {
        self.kind
    }

    /// Backing heap (absent for committed resources).
    pub fn heap(&self) -> Option<HeapId> {
        self.heap
    }

    /// Underlying device resource: the placed or committed resource itself, or
    /// the shared buffer a sub-allocation lives in.
    pub fn resource(&self) -> Option<ResourceId> {
        self.resource
    }

    /// Byte offset of the block inside its backing heap.
    pub fn offset_in_heap(&self) -> u64 {
        self.offset_in_heap
    }

    /// Byte offset inside [`resource`](Self::resource); non-zero only for sub-allocations.
    pub fn offset_from_resource(&self) -> u64 {
        self.offset_from_resource
    }

    /// Requested size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes actually reserved (power-of-two block, or the committed footprint).
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// GPU virtual address of the first byte (0 for textures).
    pub fn gpu_address(&self) -> u64 {
        self.gpu_address
    }

    /// CPU pointer to the first byte, for upload/readback memory.
    pub fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        self.mapped
    }

    /// Check if this location has already been freed.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Block order within the buddy hierarchy (sub-allocated and placed only).
    pub fn order(&self) -> Option<u32> {
        self.block.map(|b| b.order)
    }

    pub(crate) fn release(&mut self) {
        self.released = true;
        self.block = None;
        self.resource = None;
        self.mapped = None;
        self.gpu_address = 0;
    }
}

impl Drop for ResourceLocation {
    fn drop(&mut self) {
        if cfg!(debug_assertions) && !self.released {
            crate::diagnostics::emit_with_context(
                &crate::diagnostics::GH003,
                &format!("{:?} location of {} bytes, owner {}", self.kind, self.size, self.owner.raw()),
            );
        }
    }
}
