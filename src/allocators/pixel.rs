//! Render-target and depth-stencil textures.
//!
//! These are always committed resources: each gets its own implicit heap.
//! Release still waits for the freeing generation to retire.

use std::collections::HashMap;
use std::sync::Arc;

use crate::allocators::deferred::{DeferredQueue, Generation};
use crate::api::error::{AllocError, Result};
use crate::api::location::{AllocatorId, LocationKind, ResourceLocation};
use crate::api::stats::PoolStats;
use crate::diagnostics;
use crate::gpu::traits::{GpuDevice, HeapKind, ResourceDesc, ResourceId, ResourceState};
use crate::util::size::format_bytes;

/// Committed texture allocator for render and depth targets.
pub struct PixelResourceAllocator {
    device: Arc<dyn GpuDevice>,
    id: AllocatorId,
    /// Live resources and their footprint
    live: HashMap<ResourceId, u64>,
    deferred: DeferredQueue<(ResourceId, u64)>,
    allocated_bytes: u64,
    pending_bytes: u64,
}

impl PixelResourceAllocator {
    pub fn new(device: Arc<dyn GpuDevice>) -> Self {
        Self {
            device,
            id: AllocatorId::next(),
            live: HashMap::new(),
            deferred: DeferredQueue::new(),
            allocated_bytes: 0,
            pending_bytes: 0,
        }
    }

    pub fn id(&self) -> AllocatorId {
        self.id
    }

    /// Create a committed texture described by `desc` in `state`.
    pub fn alloc_pixel(&mut self, desc: &ResourceDesc, state: ResourceState) -> Result<ResourceLocation> {
        if desc.is_buffer() {
            return Err(AllocError::InvalidRequest("pixel allocator only serves textures"));
        }

        let footprint = self.device.allocation_info(desc).size;
        let resource = self
            .device
            .create_committed_resource(HeapKind::Default, desc, state)
            .map_err(|err| {
                let err = AllocError::from(err);
                if matches!(err, AllocError::DeviceOutOfMemory { .. }) {
                    diagnostics::emit_with_context(
                        &diagnostics::GH901,
                        &format!("committed texture of {}", format_bytes(footprint)),
                    );
                }
                err
            })?;

        self.live.insert(resource, footprint);
        self.allocated_bytes += footprint;
        log::debug!("created committed texture {:?} ({})", resource, format_bytes(footprint));

        Ok(ResourceLocation {
            owner: self.id,
            kind: LocationKind::Committed,
            block: None,
            heap: None,
            resource: Some(resource),
            offset_in_heap: 0,
            offset_from_resource: 0,
            size: footprint,
            block_size: footprint,
            gpu_address: self.device.gpu_virtual_address(resource),
            mapped: None,
            released: false,
        })
    }

    /// Release `location`; the resource is destroyed once `generation` retires.
    pub fn free(&mut self, location: &mut ResourceLocation, generation: Generation) -> Result<()> {
        if location.is_released() {
            diagnostics::emit(&diagnostics::GH002);
            return Err(AllocError::InvalidFree("location already released"));
        }
        if !self.owns(location) {
            diagnostics::emit(&diagnostics::GH001);
            return Err(AllocError::InvalidFree("location is not owned by this allocator"));
        }
        let Some((resource, footprint)) = location
            .resource
            .and_then(|r| self.live.remove(&r).map(|size| (r, size)))
        else {
            diagnostics::emit(&diagnostics::GH002);
            return Err(AllocError::InvalidFree("resource is not live"));
        };

        self.pending_bytes += footprint;
        self.deferred.push(generation, (resource, footprint));
        location.release();
        Ok(())
    }

    /// Destroy every resource freed at or before `retired`.
    pub fn cleanup(&mut self, retired: Generation) -> usize {
        let mut destroyed = 0;
        while let Some((resource, footprint)) = self.deferred.pop_retired(retired) {
            self.device.destroy_resource(resource);
            self.pending_bytes -= footprint;
            self.allocated_bytes -= footprint;
            destroyed += 1;
        }
        if destroyed > 0 {
            log::debug!("destroyed {} committed textures up to generation {}", destroyed, retired);
        }
        destroyed
    }

    pub fn owns(&self, location: &ResourceLocation) -> bool {
        location.owner() == self.id
    }

    /// Live committed textures.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            heap_count: self.live.len() + self.deferred.len(),
            reserved_bytes: self.allocated_bytes,
            allocated_bytes: self.allocated_bytes,
            pending_release_bytes: self.pending_bytes,
            live_allocations: self.live.len(),
        }
    }
}

impl Drop for PixelResourceAllocator {
    fn drop(&mut self) {
        for (resource, _) in self.deferred.drain_all() {
            self.device.destroy_resource(resource);
        }
        for resource in self.live.keys() {
            self.device.destroy_resource(*resource);
        }
    }
}
