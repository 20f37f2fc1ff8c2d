//! Sampled textures placed in shared heaps.

use std::sync::Arc;

use crate::allocators::deferred::Generation;
use crate::allocators::multi::MultiBuddyAllocator;
use crate::api::config::{AllocatorConfig, HeapConfig};
use crate::api::error::{AllocError, Result};
use crate::api::location::ResourceLocation;
use crate::api::stats::PoolStats;
use crate::gpu::traits::{GpuDevice, ResourceDesc, ResourceState};

/// Places non render-target, non depth-stencil textures in shared default heaps.
pub struct TextureResourceAllocator {
    pool: MultiBuddyAllocator,
}

impl TextureResourceAllocator {
    pub fn new(device: Arc<dyn GpuDevice>, config: &AllocatorConfig) -> Result<Self> {
        Ok(Self {
            pool: MultiBuddyAllocator::new(device, HeapConfig::textures(config))?,
        })
    }

    /// Place a texture described by `desc`, created in `state`.
    ///
    /// Render-target and depth-stencil textures are rejected; they belong to
    /// the [`PixelResourceAllocator`](crate::PixelResourceAllocator).
    pub fn alloc_texture(&mut self, desc: &ResourceDesc, state: ResourceState) -> Result<ResourceLocation> {
        if desc.is_buffer() {
            return Err(AllocError::InvalidRequest("texture allocator only serves textures"));
        }
        if desc.flags().is_attachment() {
            return Err(AllocError::InvalidRequest(
                "render-target and depth-stencil textures need the pixel allocator",
            ));
        }
        self.pool.allocate_placed(desc, state)
    }

    /// Release `location` once `generation` retires. The placed resource is
    /// destroyed at that point too.
    pub fn free(&mut self, location: &mut ResourceLocation, generation: Generation) -> Result<()> {
        self.pool.deallocate(location, generation)
    }

    pub fn cleanup(&mut self, retired: Generation) -> usize {
        self.pool.cleanup(retired)
    }

    pub fn owns(&self, location: &ResourceLocation) -> bool {
        self.pool.owns(location)
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn pool(&self) -> &MultiBuddyAllocator {
        &self.pool
    }
}
