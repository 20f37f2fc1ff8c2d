//! Pool of buddy allocators sharing one configuration.
//!
//! Requests try each backing heap in creation order. When every heap is
//! exhausted a new one is created: of the configured size, or sized exactly to
//! the rounded block for requests that would never fit a regular heap.

use std::sync::Arc;

use crate::allocators::buddy::{block_bytes, block_order, resolve_alignment, BuddyAllocator};
use crate::allocators::deferred::Generation;
use crate::api::config::HeapConfig;
use crate::api::error::{AllocError, Result};
use crate::api::location::{AllocatorId, ResourceLocation};
use crate::api::stats::PoolStats;
use crate::diagnostics;
use crate::gpu::traits::{GpuDevice, ResourceDesc, ResourceState};
use crate::util::size::format_bytes;

/// Growable collection of [`BuddyAllocator`]s of one configuration.
pub struct MultiBuddyAllocator {
    device: Arc<dyn GpuDevice>,
    config: HeapConfig,
    id: AllocatorId,
    allocators: Vec<BuddyAllocator>,
}

impl MultiBuddyAllocator {
    /// Create an empty pool. No device memory is reserved until the first request.
    pub fn new(device: Arc<dyn GpuDevice>, config: HeapConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            device,
            config,
            id: AllocatorId::next(),
            allocators: Vec::new(),
        })
    }

    /// Identity stamped into every location this pool hands out.
    pub fn id(&self) -> AllocatorId {
        self.id
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Whether `location` was produced by this pool.
    pub fn owns(&self, location: &ResourceLocation) -> bool {
        location.owner() == self.id
    }

    /// Allocate `size` bytes at `alignment` (0 selects the configured default).
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Result<ResourceLocation> {
        if size == 0 {
            return Err(AllocError::InvalidRequest("allocation size must be non-zero"));
        }
        let alignment = resolve_alignment(alignment, self.config.default_alignment)?;
        let block_bytes = self.block_bytes(size, alignment)?;

        for allocator in &mut self.allocators {
            match allocator.allocate(size, alignment) {
                Err(AllocError::OutOfSpace { .. }) => continue,
                result => return result,
            }
        }

        self.grow(block_bytes)?.allocate(size, alignment)
    }

    /// Allocate a block and place a resource described by `desc` in it.
    pub fn allocate_placed(&mut self, desc: &ResourceDesc, state: ResourceState) -> Result<ResourceLocation> {
        let info = self.device.allocation_info(desc);
        let block_bytes = self.block_bytes(info.size, info.alignment)?;

        for allocator in &mut self.allocators {
            match allocator.allocate_placed(desc, state) {
                Err(AllocError::OutOfSpace { .. }) => continue,
                result => return result,
            }
        }

        self.grow(block_bytes)?.allocate_placed(desc, state)
    }

    /// Queue `location` for release once `generation` retires.
    pub fn deallocate(&mut self, location: &mut ResourceLocation, generation: Generation) -> Result<()> {
        if location.is_released() {
            diagnostics::emit(&diagnostics::GH002);
            return Err(AllocError::InvalidFree("location already released"));
        }
        let heap_index = match location.block {
            Some(block) if self.owns(location) => block.heap_index as usize,
            _ => {
                diagnostics::emit(&diagnostics::GH001);
                return Err(AllocError::InvalidFree("location is not owned by this allocator"));
            }
        };
        match self.allocators.get_mut(heap_index) {
            Some(allocator) => allocator.deallocate(location, generation),
            None => {
                diagnostics::emit(&diagnostics::GH001);
                Err(AllocError::InvalidFree("location refers to an unknown backing heap"))
            }
        }
    }

    /// Flush every heap's deferred queue up to `retired`. Returns blocks reclaimed.
    pub fn cleanup(&mut self, retired: Generation) -> usize {
        self.allocators
            .iter_mut()
            .map(|allocator| allocator.flush_deferred(retired))
            .sum()
    }

    /// Backing heaps in creation order.
    pub fn heaps(&self) -> &[BuddyAllocator] {
        &self.allocators
    }

    pub fn heap_count(&self) -> usize {
        self.allocators.len()
    }

    /// Usage summed over every backing heap.
    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats::default();
        for allocator in &self.allocators {
            stats += PoolStats {
                heap_count: 1,
                reserved_bytes: allocator.capacity(),
                allocated_bytes: allocator.allocated_bytes(),
                pending_release_bytes: allocator.pending_release_bytes(),
                live_allocations: allocator.live_count(),
            };
        }
        stats
    }

    /// Check the bookkeeping invariants of every heap.
    pub fn validate(&self) -> std::result::Result<(), String> {
        for allocator in &self.allocators {
            allocator
                .validate()
                .map_err(|err| format!("heap #{}: {}", allocator.heap_index(), err))?;
        }
        Ok(())
    }

    /// Rounded block size for a request; rejected before any heap is touched.
    fn block_bytes(&self, size: u64, alignment: u64) -> Result<u64> {
        let order = block_order(size, alignment, self.config.min_block_size)?;
        block_bytes(order, self.config.min_block_size)
            .ok_or(AllocError::InvalidRequest("allocation exceeds the largest block a heap can hold"))
    }

    /// Create a backing heap able to hold a block of `block_bytes`.
    fn grow(&mut self, block_bytes: u64) -> Result<&mut BuddyAllocator> {
        let capacity = if block_bytes > self.config.heap_size {
            diagnostics::emit_with_context(
                &diagnostics::GH004,
                &format!(
                    "{} requested, default heap is {}",
                    format_bytes(block_bytes),
                    format_bytes(self.config.heap_size)
                ),
            );
            block_bytes
        } else {
            self.config.heap_size
        };

        let index = self.allocators.len();
        let allocator = BuddyAllocator::new(
            Arc::clone(&self.device),
            self.config,
            capacity,
            self.id,
            index as u32,
        )
        .map_err(|err| {
            if matches!(err, AllocError::DeviceOutOfMemory { .. }) {
                diagnostics::emit_with_context(
                    &diagnostics::GH901,
                    &format!("{:?} heap of {}", self.config.kind, format_bytes(capacity)),
                );
            }
            err
        })?;

        self.allocators.push(allocator);
        Ok(&mut self.allocators[index])
    }
}
