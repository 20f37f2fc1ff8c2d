//! Buddy allocator over a single backing heap.
//!
//! The heap is split into power-of-two blocks measured in units of the
//! configured minimum block size. Free blocks are kept per order in ordered
//! sets so the lowest offset is always handed out first. Freed blocks go through
//! a generation-tagged deferred queue and are only merged back into the free
//! sets once the GPU has retired the generation that freed them.

use std::collections::{BTreeSet, HashMap};
use std::ptr::NonNull;
use std::sync::Arc;

use crate::allocators::deferred::{DeferredQueue, Generation};
use crate::api::config::{AllocationStrategy, HeapConfig};
use crate::api::error::{AllocError, Result};
use crate::api::location::{AllocatorId, BlockData, LocationKind, ResourceLocation};
use crate::diagnostics;
use crate::gpu::traits::{
    GpuDevice, HeapDesc, HeapId, HeapKind, ResourceDesc, ResourceId, ResourceState,
};
use crate::util::layout::ceil_log2;
use crate::util::size::{format_bytes, kb};

/// Alignment requested for every backing heap.
const HEAP_ALIGNMENT: u64 = kb(64);

/// Order of the smallest block that fits `size` bytes at `alignment`.
///
/// Blocks of order `k` start at multiples of their own size, so covering the
/// alignment with the block size is enough to align the offset.
///
/// Fails with `InvalidRequest` when no backing heap could hold such a block.
pub(crate) fn block_order(size: u64, alignment: u64, min_block_size: u64) -> Result<u32> {
    let bytes = size.max(alignment).max(min_block_size);
    let units = bytes / min_block_size + u64::from(bytes % min_block_size != 0);
    let order = ceil_log2(units);
    if order >= u32::BITS || block_bytes(order, min_block_size).is_none() {
        return Err(AllocError::InvalidRequest("allocation exceeds the largest block a heap can hold"));
    }
    Ok(order)
}

/// Size in bytes of a block of `order`, if it fits in a `u64`.
pub(crate) fn block_bytes(order: u32, min_block_size: u64) -> Option<u64> {
    1u64.checked_shl(order)?.checked_mul(min_block_size)
}

/// Resolve a caller alignment: 0 selects the default, anything else must be a power of two.
pub(crate) fn resolve_alignment(alignment: u64, default_alignment: u64) -> Result<u64> {
    match alignment {
        0 => Ok(default_alignment),
        a if a.is_power_of_two() => Ok(a),
        _ => Err(AllocError::InvalidRequest("alignment must be a power of two")),
    }
}

fn initial_state(kind: HeapKind) -> ResourceState {
    match kind {
        HeapKind::Upload => ResourceState::GenericRead,
        HeapKind::Readback => ResourceState::CopyDest,
        HeapKind::Default => ResourceState::Common,
    }
}

/// A block currently handed out.
struct LiveBlock {
    order: u32,
    serial: u64,
    /// Placed resource created on top of the block
    resource: Option<ResourceId>,
}

/// A block waiting for its generation to retire.
struct DeferredBlock {
    offset: u32,
    order: u32,
    resource: Option<ResourceId>,
}

/// What the blocks are carved out of.
enum Backing {
    /// Device heap; allocations become placed resources
    Heap(HeapId),
    /// One committed buffer; allocations are byte ranges of it
    Buffer {
        resource: ResourceId,
        gpu_address: u64,
        mapped: Option<NonNull<u8>>,
    },
}

/// Buddy allocator managing exactly one backing heap.
pub struct BuddyAllocator {
    device: Arc<dyn GpuDevice>,
    config: HeapConfig,
    owner: AllocatorId,
    heap_index: u32,
    capacity: u64,
    max_order: u32,

    /// Free block offsets (in units) per order
    free_blocks: Vec<BTreeSet<u32>>,

    /// Live blocks by offset (in units)
    live: HashMap<u32, LiveBlock>,

    deferred: DeferredQueue<DeferredBlock>,
    next_serial: u64,

    /// Units handed out, including those pending release
    allocated_units: u64,
    pending_units: u64,

    backing: Backing,
}

// SAFETY: the mapped pointer refers to memory owned by the backing buffer,
// which this allocator owns exclusively and releases only on drop.
unsafe impl Send for BuddyAllocator {}

impl BuddyAllocator {
    /// Create the backing heap and a single free block spanning it.
    ///
    /// `capacity` must be a power-of-two multiple of the minimum block size.
    /// Fails with `DeviceOutOfMemory` if the device refuses the heap.
    pub fn new(
        device: Arc<dyn GpuDevice>,
        config: HeapConfig,
        capacity: u64,
        owner: AllocatorId,
        heap_index: u32,
    ) -> Result<Self> {
        config.validate()?;
        if !capacity.is_power_of_two() || capacity < config.min_block_size {
            return Err(AllocError::InvalidRequest(
                "backing heap capacity must be a power-of-two multiple of the min block size",
            ));
        }
        let max_order = ceil_log2(capacity / config.min_block_size);
        if max_order >= u32::BITS {
            return Err(AllocError::InvalidRequest("backing heap holds too many blocks"));
        }

        let backing = match config.strategy {
            AllocationStrategy::PlacedResource => Backing::Heap(device.create_heap(&HeapDesc {
                size: capacity,
                alignment: HEAP_ALIGNMENT,
                kind: config.kind,
                flags: config.heap_flags,
            })?),
            AllocationStrategy::ManualSubAllocation => {
                let desc = ResourceDesc::Buffer {
                    size: capacity,
                    flags: config.resource_flags,
                };
                let resource =
                    device.create_committed_resource(config.kind, &desc, initial_state(config.kind))?;
                let mapped = if config.kind.is_cpu_visible() {
                    match device.map(resource) {
                        Ok(ptr) => Some(ptr),
                        Err(err) => {
                            device.destroy_resource(resource);
                            return Err(err.into());
                        }
                    }
                } else {
                    None
                };
                Backing::Buffer {
                    resource,
                    gpu_address: device.gpu_virtual_address(resource),
                    mapped,
                }
            }
        };

        let mut free_blocks = vec![BTreeSet::new(); max_order as usize + 1];
        free_blocks[max_order as usize].insert(0);

        log::debug!(
            "created {:?} backing heap #{} for allocator {} ({}, {:?})",
            config.kind,
            heap_index,
            owner.raw(),
            format_bytes(capacity),
            config.strategy
        );

        Ok(Self {
            device,
            config,
            owner,
            heap_index,
            capacity,
            max_order,
            free_blocks,
            live: HashMap::new(),
            deferred: DeferredQueue::new(),
            next_serial: 0,
            allocated_units: 0,
            pending_units: 0,
            backing,
        })
    }

    /// Allocate a block of at least `size` bytes aligned to `alignment`.
    ///
    /// An `alignment` of 0 selects the configured default. Returns
    /// `OutOfSpace` when no block of the required order can be produced.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Result<ResourceLocation> {
        if size == 0 {
            return Err(AllocError::InvalidRequest("allocation size must be non-zero"));
        }
        let alignment = resolve_alignment(alignment, self.config.default_alignment)?;
        let order = block_order(size, alignment, self.config.min_block_size)?;

        let offset = self.allocate_block(order).ok_or(AllocError::OutOfSpace {
            requested: size,
            capacity: self.capacity,
        })?;
        Ok(self.commit_block(offset, order, size, None))
    }

    /// Allocate a block and create a resource placed at its offset.
    ///
    /// Only valid for the placed-resource strategy. The block size and
    /// alignment come from the device's footprint query for `desc`.
    pub fn allocate_placed(&mut self, desc: &ResourceDesc, state: ResourceState) -> Result<ResourceLocation> {
        let heap = match self.backing {
            Backing::Heap(heap) => heap,
            Backing::Buffer { .. } => {
                return Err(AllocError::InvalidRequest(
                    "placed resources need a placed-resource backing heap",
                ))
            }
        };

        let info = self.device.allocation_info(desc);
        let order = block_order(info.size, info.alignment, self.config.min_block_size)?;
        let offset = self.allocate_block(order).ok_or(AllocError::OutOfSpace {
            requested: info.size,
            capacity: self.capacity,
        })?;

        let offset_bytes = offset as u64 * self.config.min_block_size;
        match self.device.create_placed_resource(heap, offset_bytes, desc, state) {
            Ok(resource) => Ok(self.commit_block(offset, order, info.size, Some(resource))),
            Err(err) => {
                // Nothing on the GPU has seen the block yet.
                self.free_block(offset, order);
                Err(err.into())
            }
        }
    }

    /// Release a location. The block is queued until `generation` retires.
    ///
    /// Fails with `InvalidFree` for locations from other heaps, locations
    /// already freed, and blocks that are not currently live. A `generation`
    /// older than one already queued is treated as that newer generation.
    pub fn deallocate(&mut self, location: &mut ResourceLocation, generation: Generation) -> Result<()> {
        if location.released {
            diagnostics::emit(&diagnostics::GH002);
            return Err(AllocError::InvalidFree("location already released"));
        }
        let block = match location.block {
            Some(block) if location.owner == self.owner && block.heap_index == self.heap_index => block,
            _ => {
                diagnostics::emit(&diagnostics::GH001);
                return Err(AllocError::InvalidFree("location is not owned by this heap"));
            }
        };

        let live = match self.live.remove(&block.offset) {
            Some(live) if live.order == block.order && live.serial == block.serial => live,
            other => {
                if let Some(live) = other {
                    self.live.insert(block.offset, live);
                }
                diagnostics::emit(&diagnostics::GH002);
                return Err(AllocError::InvalidFree("block is not live"));
            }
        };

        self.pending_units += 1u64 << block.order;
        self.deferred.push(
            generation,
            DeferredBlock {
                offset: block.offset,
                order: block.order,
                resource: live.resource,
            },
        );
        location.release();
        Ok(())
    }

    /// Fold every block freed at or before `retired` back into the free sets.
    ///
    /// Returns the number of blocks reclaimed.
    pub fn flush_deferred(&mut self, retired: Generation) -> usize {
        let mut reclaimed = 0;
        while let Some(entry) = self.deferred.pop_retired(retired) {
            if let Some(resource) = entry.resource {
                self.device.destroy_resource(resource);
            }
            let units = 1u64 << entry.order;
            self.pending_units -= units;
            self.allocated_units -= units;
            self.free_block(entry.offset, entry.order);
            reclaimed += 1;
        }
        if reclaimed > 0 {
            log::trace!(
                "heap #{} of allocator {}: reclaimed {} blocks up to generation {}",
                self.heap_index,
                self.owner.raw(),
                reclaimed,
                retired
            );
        }
        reclaimed
    }

    /// Pop a free block of `order`, splitting larger blocks as needed.
    fn allocate_block(&mut self, order: u32) -> Option<u32> {
        if order > self.max_order {
            return None;
        }
        if let Some(offset) = self.free_blocks[order as usize].pop_first() {
            return Some(offset);
        }

        let left = self.allocate_block(order + 1)?;
        let right = left + (1u32 << order);
        self.free_blocks[order as usize].insert(right);
        log::trace!("split order {} block at unit {} (buddy at {})", order + 1, left, right);
        Some(left)
    }

    /// Return a block to the free sets, merging with free buddies upward.
    fn free_block(&mut self, offset: u32, order: u32) {
        let mut offset = offset;
        let mut order = order;
        while order < self.max_order {
            let buddy = offset ^ (1u32 << order);
            if !self.free_blocks[order as usize].remove(&buddy) {
                break;
            }
            log::trace!("merged order {} buddies at units {} and {}", order, offset, buddy);
            offset = offset.min(buddy);
            order += 1;
        }
        self.free_blocks[order as usize].insert(offset);
    }

    fn commit_block(&mut self, offset: u32, order: u32, size: u64, resource: Option<ResourceId>) -> ResourceLocation {
        let serial = self.next_serial;
        self.next_serial += 1;
        self.live.insert(offset, LiveBlock { order, serial, resource });
        self.allocated_units += 1u64 << order;

        let min_block = self.config.min_block_size;
        let offset_in_heap = offset as u64 * min_block;
        let block = BlockData {
            heap_index: self.heap_index,
            offset,
            order,
            serial,
        };

        let (kind, heap, resource, offset_from_resource, gpu_address, mapped) = match &self.backing {
            Backing::Heap(heap) => {
                let gpu_address = resource.map_or(0, |r| self.device.gpu_virtual_address(r));
                let mapped = match resource {
                    Some(r) if self.config.kind.is_cpu_visible() => self.device.map(r).ok(),
                    _ => None,
                };
                (LocationKind::Placed, Some(*heap), resource, 0, gpu_address, mapped)
            }
            Backing::Buffer { resource: buffer, gpu_address, mapped } => {
                // SAFETY: the block lies inside the mapped buffer of `capacity` bytes
                let mapped = mapped.and_then(|p| NonNull::new(unsafe { p.as_ptr().add(offset_in_heap as usize) }));
                (
                    LocationKind::SubAllocated,
                    None,
                    Some(*buffer),
                    offset_in_heap,
                    gpu_address + offset_in_heap,
                    mapped,
                )
            }
        };

        ResourceLocation {
            owner: self.owner,
            kind,
            block: Some(block),
            heap,
            resource,
            offset_in_heap,
            offset_from_resource,
            size,
            block_size: min_block << order,
            gpu_address,
            mapped,
            released: false,
        }
    }

    /// Fixed capacity of the backing heap in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Highest block order (the whole heap).
    pub fn max_order(&self) -> u32 {
        self.max_order
    }

    /// Position of this heap inside its multi-heap allocator.
    pub fn heap_index(&self) -> u32 {
        self.heap_index
    }

    pub fn strategy(&self) -> AllocationStrategy {
        self.config.strategy
    }

    /// Backing device heap (placed-resource strategy).
    pub fn backing_heap(&self) -> Option<HeapId> {
        match self.backing {
            Backing::Heap(heap) => Some(heap),
            Backing::Buffer { .. } => None,
        }
    }

    /// Backing committed buffer (manual-suballocation strategy).
    pub fn backing_resource(&self) -> Option<ResourceId> {
        match self.backing {
            Backing::Heap(_) => None,
            Backing::Buffer { resource, .. } => Some(resource),
        }
    }

    /// Bytes handed out, including blocks still waiting for release.
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_units * self.config.min_block_size
    }

    /// Bytes freed but not yet retired by the GPU.
    pub fn pending_release_bytes(&self) -> u64 {
        self.pending_units * self.config.min_block_size
    }

    /// Bytes in the free sets.
    pub fn free_bytes(&self) -> u64 {
        self.free_units() * self.config.min_block_size
    }

    fn free_units(&self) -> u64 {
        self.free_blocks
            .iter()
            .enumerate()
            .map(|(order, set)| (set.len() as u64) << order)
            .sum()
    }

    /// Number of live allocations.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Number of blocks waiting for their generation to retire.
    pub fn pending_count(&self) -> usize {
        self.deferred.len()
    }

    /// No live or pending blocks.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty() && self.deferred.is_empty()
    }

    /// Byte offsets of the free blocks of `order`, lowest first.
    pub fn free_offsets(&self, order: u32) -> Vec<u64> {
        self.free_blocks
            .get(order as usize)
            .map(|set| set.iter().map(|&o| o as u64 * self.config.min_block_size).collect())
            .unwrap_or_default()
    }

    /// Check the bookkeeping invariants.
    ///
    /// Free, live and pending blocks must tile the heap exactly, and no order
    /// may hold two free buddies.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let capacity_units = self.capacity / self.config.min_block_size;
        let free_units = self.free_units();
        if self.allocated_units + free_units != capacity_units {
            return Err(format!(
                "allocated {} + free {} units != capacity {} units",
                self.allocated_units, free_units, capacity_units
            ));
        }

        let mut spans: Vec<(u64, u64)> = Vec::new();
        for (order, set) in self.free_blocks.iter().enumerate() {
            for &offset in set {
                if order < self.max_order as usize && set.contains(&(offset ^ (1u32 << order))) {
                    return Err(format!("unmerged free buddies at order {} offset {}", order, offset));
                }
                spans.push((offset as u64, 1u64 << order));
            }
        }
        let live_units: u64 = self.live.values().map(|b| 1u64 << b.order).sum();
        let pending_units: u64 = self.deferred.iter().map(|b| 1u64 << b.order).sum();
        if live_units + pending_units != self.allocated_units || pending_units != self.pending_units {
            return Err(format!(
                "live {} + pending {} units disagree with allocated {} units",
                live_units, pending_units, self.allocated_units
            ));
        }
        spans.extend(self.live.iter().map(|(&o, b)| (o as u64, 1u64 << b.order)));
        spans.extend(self.deferred.iter().map(|b| (b.offset as u64, 1u64 << b.order)));

        spans.sort_unstable();
        let mut cursor = 0u64;
        for (offset, len) in spans {
            if offset != cursor {
                return Err(format!("blocks overlap or leave a gap at unit {}", cursor));
            }
            cursor += len;
        }
        if cursor != capacity_units {
            return Err(format!("blocks end at unit {} of {}", cursor, capacity_units));
        }
        Ok(())
    }
}

impl Drop for BuddyAllocator {
    fn drop(&mut self) {
        for entry in self.deferred.drain_all() {
            if let Some(resource) = entry.resource {
                self.device.destroy_resource(resource);
            }
        }
        for block in self.live.values() {
            if let Some(resource) = block.resource {
                self.device.destroy_resource(resource);
            }
        }
        match self.backing {
            Backing::Heap(heap) => self.device.destroy_heap(heap),
            Backing::Buffer { resource, .. } => self.device.destroy_resource(resource),
        }
        log::debug!(
            "released backing heap #{} of allocator {} ({})",
            self.heap_index,
            self.owner.raw(),
            format_bytes(self.capacity)
        );
    }
}
