//! GPU-only buffers.
//!
//! Buffers that allow unordered access cannot share a backing buffer with
//! plain ones, so they are served from a second pool.

use std::sync::Arc;

use crate::allocators::deferred::Generation;
use crate::allocators::multi::MultiBuddyAllocator;
use crate::api::config::{AllocatorConfig, HeapConfig};
use crate::api::error::{AllocError, Result};
use crate::api::location::ResourceLocation;
use crate::api::stats::PoolStats;
use crate::diagnostics;
use crate::gpu::traits::{GpuDevice, ResourceDesc, ResourceFlags};

/// Default-heap buffer allocator with separate plain and UAV pools.
pub struct DefaultBufferAllocator {
    plain: MultiBuddyAllocator,
    uav: MultiBuddyAllocator,
}

impl DefaultBufferAllocator {
    pub fn new(device: Arc<dyn GpuDevice>, config: &AllocatorConfig) -> Result<Self> {
        Ok(Self {
            plain: MultiBuddyAllocator::new(Arc::clone(&device), HeapConfig::default_buffers(config))?,
            uav: MultiBuddyAllocator::new(device, HeapConfig::uav_buffers(config))?,
        })
    }

    /// Allocate the buffer described by `desc`.
    ///
    /// Only buffer descriptions are accepted. `ALLOW_UNORDERED_ACCESS` selects
    /// the UAV pool.
    pub fn alloc_default(&mut self, desc: &ResourceDesc, alignment: u64) -> Result<ResourceLocation> {
        match desc {
            ResourceDesc::Buffer { size, flags } if flags.contains(ResourceFlags::ALLOW_UNORDERED_ACCESS) => {
                self.uav.allocate(*size, alignment)
            }
            ResourceDesc::Buffer { size, .. } => self.plain.allocate(*size, alignment),
            ResourceDesc::Texture2D { .. } => Err(AllocError::InvalidRequest(
                "default buffer allocator only serves buffers",
            )),
        }
    }

    /// Release `location` once `generation` retires.
    pub fn free(&mut self, location: &mut ResourceLocation, generation: Generation) -> Result<()> {
        if self.plain.owns(location) {
            self.plain.deallocate(location, generation)
        } else if self.uav.owns(location) {
            self.uav.deallocate(location, generation)
        } else if location.is_released() {
            diagnostics::emit(&diagnostics::GH002);
            Err(AllocError::InvalidFree("location already released"))
        } else {
            diagnostics::emit(&diagnostics::GH001);
            Err(AllocError::InvalidFree("location is not owned by this allocator"))
        }
    }

    /// Reclaim everything freed at or before `retired` in both pools.
    pub fn cleanup(&mut self, retired: Generation) -> usize {
        self.plain.cleanup(retired) + self.uav.cleanup(retired)
    }

    pub fn owns(&self, location: &ResourceLocation) -> bool {
        self.plain.owns(location) || self.uav.owns(location)
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = self.plain.stats();
        stats += self.uav.stats();
        stats
    }

    pub fn plain_pool(&self) -> &MultiBuddyAllocator {
        &self.plain
    }

    pub fn uav_pool(&self) -> &MultiBuddyAllocator {
        &self.uav
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::host::HostDevice;
    use crate::gpu::traits::Format;

    #[test]
    fn test_uav_buffers_use_their_own_pool() {
        let device = Arc::new(HostDevice::new());
        let mut alloc = DefaultBufferAllocator::new(device.clone(), &AllocatorConfig::minimal()).unwrap();

        let mut plain = alloc.alloc_default(&ResourceDesc::buffer(1024), 0).unwrap();
        let uav_desc = ResourceDesc::buffer(1024).with_flags(ResourceFlags::ALLOW_UNORDERED_ACCESS);
        let mut uav = alloc.alloc_default(&uav_desc, 0).unwrap();

        assert!(alloc.plain_pool().owns(&plain));
        assert!(alloc.uav_pool().owns(&uav));
        assert_ne!(plain.resource(), uav.resource());
        assert_eq!(device.committed_count(), 2);
        assert!(plain.mapped_ptr().is_none());

        alloc.free(&mut plain, 0).unwrap();
        alloc.free(&mut uav, 0).unwrap();
        assert_eq!(alloc.cleanup(0), 2);
    }

    #[test]
    fn test_textures_are_rejected() {
        let mut alloc =
            DefaultBufferAllocator::new(Arc::new(HostDevice::new()), &AllocatorConfig::minimal()).unwrap();
        let desc = ResourceDesc::tex2d(16, 16, Format::R8G8B8A8Unorm);
        assert!(matches!(alloc.alloc_default(&desc, 0), Err(AllocError::InvalidRequest(_))));
    }

    #[test]
    fn test_free_routes_and_rejects() {
        let device: Arc<dyn GpuDevice> = Arc::new(HostDevice::new());
        let mut a = DefaultBufferAllocator::new(Arc::clone(&device), &AllocatorConfig::minimal()).unwrap();
        let mut b = DefaultBufferAllocator::new(device, &AllocatorConfig::minimal()).unwrap();

        let mut location = a.alloc_default(&ResourceDesc::buffer(64), 4).unwrap();
        assert!(matches!(b.free(&mut location, 0), Err(AllocError::InvalidFree(_))));
        a.free(&mut location, 0).unwrap();
        assert_eq!(
            a.free(&mut location, 0),
            Err(AllocError::InvalidFree("location already released"))
        );
    }
}
