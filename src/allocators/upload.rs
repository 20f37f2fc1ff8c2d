//! CPU-writable upload memory.

use std::ptr::NonNull;
use std::sync::Arc;

use crate::allocators::deferred::Generation;
use crate::allocators::multi::MultiBuddyAllocator;
use crate::api::config::{AllocatorConfig, HeapConfig};
use crate::api::error::{AllocError, Result};
use crate::api::location::{AllocatorId, ResourceLocation};
use crate::api::stats::PoolStats;
use crate::gpu::traits::GpuDevice;

/// Upload-heap buffers suballocated from persistently mapped backing buffers.
pub struct UploadBufferAllocator {
    pool: MultiBuddyAllocator,
}

impl UploadBufferAllocator {
    pub fn new(device: Arc<dyn GpuDevice>, config: &AllocatorConfig) -> Result<Self> {
        Ok(Self {
            pool: MultiBuddyAllocator::new(device, HeapConfig::upload(config))?,
        })
    }

    /// Allocate `size` bytes and return the location with its CPU pointer.
    ///
    /// An `alignment` of 0 selects the constant-buffer alignment (256 by default).
    pub fn alloc_upload(&mut self, size: u64, alignment: u64) -> Result<(ResourceLocation, NonNull<u8>)> {
        let mut location = self.pool.allocate(size, alignment)?;
        match location.mapped_ptr() {
            Some(ptr) => Ok((location, ptr)),
            None => {
                // Never handed to the GPU, so no generation has to retire first.
                self.pool.deallocate(&mut location, 0)?;
                Err(AllocError::Backend("upload memory is not mapped".to_string()))
            }
        }
    }

    /// Allocate room for `data` and copy it into the mapping.
    pub fn alloc_and_write(&mut self, data: &[u8], alignment: u64) -> Result<ResourceLocation> {
        let (location, ptr) = self.alloc_upload(data.len() as u64, alignment)?;
        // SAFETY: the mapping behind `ptr` is at least `data.len()` bytes long
        // and belongs exclusively to `location`.
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr(), data.len()) };
        Ok(location)
    }

    /// Copy `data` into an existing upload location at `offset`.
    pub fn write(&self, location: &ResourceLocation, offset: u64, data: &[u8]) -> Result<()> {
        if !self.pool.owns(location) || location.is_released() {
            return Err(AllocError::InvalidRequest("location is not a live upload allocation"));
        }
        offset
            .checked_add(data.len() as u64)
            .filter(|&end| end <= location.size().min(location.block_size()))
            .ok_or(AllocError::InvalidRequest("write exceeds the allocation"))?;
        let ptr = location
            .mapped_ptr()
            .ok_or(AllocError::InvalidRequest("location is not mapped"))?;
        // SAFETY: the written range lies within the block, which the mapping fully covers.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr().add(offset as usize), data.len());
        }
        Ok(())
    }

    /// Release `location` once `generation` retires.
    pub fn free(&mut self, location: &mut ResourceLocation, generation: Generation) -> Result<()> {
        self.pool.deallocate(location, generation)
    }

    /// Reclaim everything freed at or before `retired`.
    pub fn cleanup(&mut self, retired: Generation) -> usize {
        self.pool.cleanup(retired)
    }

    pub fn owns(&self, location: &ResourceLocation) -> bool {
        self.pool.owns(location)
    }

    pub fn id(&self) -> AllocatorId {
        self.pool.id()
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Underlying heap pool.
    pub fn pool(&self) -> &MultiBuddyAllocator {
        &self.pool
    }
}
