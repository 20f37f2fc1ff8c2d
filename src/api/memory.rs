//! The allocator context.
//!
//! [`GpuMemory`] owns one instance of every allocator in the crate and is
//! passed explicitly to whatever records and submits GPU work. It keeps the
//! submission generation counter that tags every free and drives reclamation
//! when the frame-sync collaborator reports a retired generation.

use std::ptr::NonNull;
use std::sync::Arc;

use crate::allocators::deferred::Generation;
use crate::allocators::default_buffer::DefaultBufferAllocator;
use crate::allocators::pixel::PixelResourceAllocator;
use crate::allocators::texture::TextureResourceAllocator;
use crate::allocators::upload::UploadBufferAllocator;
use crate::api::config::AllocatorConfig;
use crate::api::error::{AllocError, Result};
use crate::api::location::ResourceLocation;
use crate::api::stats::MemoryStats;
use crate::descriptors::{DescriptorCache, DescriptorSlots, SlotHandle};
use crate::diagnostics;
use crate::gpu::traits::{DescriptorKind, GpuDevice, ResourceDesc, ResourceState};

/// GPU memory allocator context.
pub struct GpuMemory {
    device: Arc<dyn GpuDevice>,
    config: AllocatorConfig,

    upload: UploadBufferAllocator,
    default_buffers: DefaultBufferAllocator,
    textures: TextureResourceAllocator,
    pixels: PixelResourceAllocator,

    descriptor_slots: DescriptorSlots,
    descriptor_cache: DescriptorCache,

    /// Generation that frees are tagged with right now
    generation: Generation,
    /// Newest generation reported retired
    retired: Option<Generation>,

    allocation_count: u64,
    deallocation_count: u64,
    peak_allocated: u64,
}

impl GpuMemory {
    /// Build every allocator for `device`.
    ///
    /// Descriptor tables are created immediately; memory heaps are created on
    /// first demand.
    pub fn new(device: Arc<dyn GpuDevice>, config: AllocatorConfig) -> Result<Self> {
        config.validate()?;

        let memory = Self {
            upload: UploadBufferAllocator::new(Arc::clone(&device), &config)?,
            default_buffers: DefaultBufferAllocator::new(Arc::clone(&device), &config)?,
            textures: TextureResourceAllocator::new(Arc::clone(&device), &config)?,
            pixels: PixelResourceAllocator::new(Arc::clone(&device)),
            descriptor_slots: DescriptorSlots::new(Arc::clone(&device), &config)?,
            descriptor_cache: DescriptorCache::new(Arc::clone(&device), &config)?,
            device,
            config,
            generation: 0,
            retired: None,
            allocation_count: 0,
            deallocation_count: 0,
            peak_allocated: 0,
        };
        log::debug!(
            "gpu memory context ready (heap size {}, min block {})",
            memory.config.default_heap_size,
            memory.config.min_block_size
        );
        Ok(memory)
    }

    /// Tear everything down. The GPU must be idle.
    ///
    /// Every deferred release is flushed before the heaps are destroyed.
    pub fn shutdown(mut self) {
        let reclaimed = self.flush(Generation::MAX);
        log::debug!(
            "gpu memory context shut down ({} deferred releases flushed, {} allocations still live)",
            reclaimed,
            self.allocation_count.saturating_sub(self.deallocation_count)
        );
    }

    /// Allocate CPU-writable upload memory. Returns the location and its mapped pointer.
    pub fn alloc_upload(&mut self, size: u64, alignment: u64) -> Result<(ResourceLocation, NonNull<u8>)> {
        let allocation = self.upload.alloc_upload(size, alignment)?;
        self.record_allocation();
        Ok(allocation)
    }

    /// Allocate upload memory holding a copy of `data`.
    pub fn upload_data(&mut self, data: &[u8], alignment: u64) -> Result<ResourceLocation> {
        let location = self.upload.alloc_and_write(data, alignment)?;
        self.record_allocation();
        Ok(location)
    }

    /// Allocate a GPU-only buffer.
    pub fn alloc_default_buffer(&mut self, desc: &ResourceDesc, alignment: u64) -> Result<ResourceLocation> {
        let location = self.default_buffers.alloc_default(desc, alignment)?;
        self.record_allocation();
        Ok(location)
    }

    /// Allocate a texture in `state`.
    ///
    /// Render-target and depth-stencil textures become committed resources;
    /// all others are placed in shared texture heaps.
    pub fn alloc_texture(&mut self, desc: &ResourceDesc, state: ResourceState) -> Result<ResourceLocation> {
        let location = if desc.flags().is_attachment() {
            self.pixels.alloc_pixel(desc, state)?
        } else {
            self.textures.alloc_texture(desc, state)?
        };
        self.record_allocation();
        Ok(location)
    }

    /// Free a location from any allocator of this context.
    ///
    /// The memory is reused once the current generation retires.
    pub fn free(&mut self, location: &mut ResourceLocation) -> Result<()> {
        let generation = self.generation;
        if self.upload.owns(location) {
            self.upload.free(location, generation)?;
        } else if self.default_buffers.owns(location) {
            self.default_buffers.free(location, generation)?;
        } else if self.textures.owns(location) {
            self.textures.free(location, generation)?;
        } else if self.pixels.owns(location) {
            self.pixels.free(location, generation)?;
        } else if location.is_released() {
            diagnostics::emit(&diagnostics::GH002);
            return Err(AllocError::InvalidFree("location already released"));
        } else {
            diagnostics::emit(&diagnostics::GH001);
            return Err(AllocError::InvalidFree("location was not allocated by this context"));
        }
        self.deallocation_count += 1;
        Ok(())
    }

    /// Take a slot from the `kind` descriptor table.
    pub fn alloc_descriptor_slot(&mut self, kind: DescriptorKind) -> Result<SlotHandle> {
        self.descriptor_slots.allocate(kind)
    }

    /// Return a descriptor slot. Slots are recycled immediately.
    pub fn free_descriptor_slot(&mut self, handle: SlotHandle) -> Result<()> {
        self.descriptor_slots.free(handle)
    }

    pub fn descriptor_slots(&self) -> &DescriptorSlots {
        &self.descriptor_slots
    }

    /// Per-frame descriptor staging tables.
    pub fn descriptor_cache_mut(&mut self) -> &mut DescriptorCache {
        &mut self.descriptor_cache
    }

    /// Generation that frees are currently tagged with.
    pub fn current_generation(&self) -> Generation {
        self.generation
    }

    /// Close the current generation and return it.
    ///
    /// Call once per command submission; the returned value is what the
    /// frame-sync collaborator later passes to [`on_frame_retired`](Self::on_frame_retired).
    pub fn submit_frame(&mut self) -> Generation {
        let submitted = self.generation;
        self.generation += 1;
        submitted
    }

    /// The GPU finished all work up to and including `generation`.
    ///
    /// Reclaims every release tagged with `generation` or older and rewinds
    /// the descriptor cache. Returns the number of releases reclaimed; stale
    /// or repeated generations reclaim nothing. A generation that was never
    /// submitted is clamped to the newest submitted one.
    pub fn on_frame_retired(&mut self, generation: Generation) -> usize {
        self.descriptor_cache.reset();
        let generation = if generation >= self.generation {
            diagnostics::emit_with_context(
                &diagnostics::GH005,
                &format!("retired {}, current generation {}", generation, self.generation),
            );
            match self.generation.checked_sub(1) {
                Some(submitted) => submitted,
                None => return 0,
            }
        } else {
            generation
        };
        if self.retired.map_or(false, |retired| generation <= retired) {
            log::trace!("generation {} already retired", generation);
            return 0;
        }
        self.retired = Some(generation);
        let reclaimed = self.flush(generation);
        log::debug!("generation {} retired, {} releases reclaimed", generation, reclaimed);
        reclaimed
    }

    /// Newest generation reported retired.
    pub fn last_retired(&self) -> Option<Generation> {
        self.retired
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    pub fn upload_allocator(&self) -> &UploadBufferAllocator {
        &self.upload
    }

    /// Write into an existing upload allocation.
    pub fn write_upload(&self, location: &ResourceLocation, offset: u64, data: &[u8]) -> Result<()> {
        self.upload.write(location, offset, data)
    }

    /// Snapshot of memory usage.
    pub fn stats(&self) -> MemoryStats {
        let mut stats = MemoryStats::new();
        stats.add_pool(self.upload.stats());
        stats.add_pool(self.default_buffers.stats());
        stats.add_pool(self.textures.stats());

        let pixels = self.pixels.stats();
        stats.reserved_bytes += pixels.reserved_bytes;
        stats.allocated_bytes += pixels.allocated_bytes;
        stats.pending_release_bytes += pixels.pending_release_bytes;
        stats.committed_resources = self.pixels.live_count();

        stats.peak_allocated = self.peak_allocated;
        stats.allocation_count = self.allocation_count;
        stats.deallocation_count = self.deallocation_count;
        stats.descriptor_slots_in_use = self.descriptor_slots.in_use();
        stats
    }

    fn flush(&mut self, retired: Generation) -> usize {
        self.upload.cleanup(retired)
            + self.default_buffers.cleanup(retired)
            + self.textures.cleanup(retired)
            + self.pixels.cleanup(retired)
    }

    fn record_allocation(&mut self) {
        self.allocation_count += 1;
        let allocated = self.upload.stats().allocated_bytes
            + self.default_buffers.stats().allocated_bytes
            + self.textures.stats().allocated_bytes
            + self.pixels.stats().allocated_bytes;
        self.peak_allocated = self.peak_allocated.max(allocated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::host::HostDevice;

    fn memory() -> GpuMemory {
        GpuMemory::new(Arc::new(HostDevice::new()), AllocatorConfig::minimal()).unwrap()
    }

    #[test]
    fn test_generations_advance_on_submit() {
        let mut memory = memory();
        assert_eq!(memory.current_generation(), 0);
        assert_eq!(memory.submit_frame(), 0);
        assert_eq!(memory.submit_frame(), 1);
        assert_eq!(memory.current_generation(), 2);
    }

    #[test]
    fn test_free_waits_for_retirement() {
        let mut memory = memory();
        let (mut location, _) = memory.alloc_upload(512, 0).unwrap();
        memory.free(&mut location).unwrap();
        let frame = memory.submit_frame();

        assert_eq!(memory.stats().pending_release_bytes, 512);
        assert_eq!(memory.on_frame_retired(frame), 1);
        assert_eq!(memory.stats().pending_release_bytes, 0);

        // Repeating the same generation reclaims nothing more.
        assert_eq!(memory.on_frame_retired(frame), 0);
    }

    #[test]
    fn test_unsubmitted_generation_does_not_flush_open_frees() {
        let mut memory = memory();
        let (mut open, _) = memory.alloc_upload(512, 0).unwrap();
        memory.free(&mut open).unwrap();
        assert_eq!(memory.on_frame_retired(5), 0);
        assert_eq!(memory.last_retired(), None);

        let frame = memory.submit_frame();
        let (mut later, _) = memory.alloc_upload(256, 0).unwrap();
        memory.free(&mut later).unwrap();

        // Clamped to the submitted frame; the open generation stays pending.
        assert_eq!(memory.on_frame_retired(frame + 10), 1);
        assert_eq!(memory.last_retired(), Some(frame));
        assert_eq!(memory.stats().pending_release_bytes, 256);
    }

    #[test]
    fn test_unknown_location_is_rejected() {
        let mut a = memory();
        let mut b = memory();
        let (mut location, _) = a.alloc_upload(64, 0).unwrap();
        assert_eq!(
            b.free(&mut location),
            Err(AllocError::InvalidFree("location was not allocated by this context"))
        );
        a.free(&mut location).unwrap();
        assert_eq!(a.stats().deallocation_count, 1);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = AllocatorConfig::minimal().with_min_block_size(300);
        assert!(matches!(
            GpuMemory::new(Arc::new(HostDevice::new()), config),
            Err(AllocError::InvalidRequest(_))
        ));
    }
}
