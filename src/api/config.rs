//! Allocator configuration.

use crate::api::error::{AllocError, Result};
use crate::gpu::traits::{HeapFlags, HeapKind, ResourceFlags};
use crate::util::size::{kb, mb};

/// How a buddy block is turned into something the GPU can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocationStrategy {
    /// One device heap per backing heap; each allocation becomes a resource
    /// placed at the block offset.
    PlacedResource,
    /// One committed buffer per backing heap; allocations are byte ranges
    /// inside that buffer.
    ManualSubAllocation,
}

/// Immutable policy of one multi-heap allocator and all of its backing heaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Placement strategy
    pub strategy: AllocationStrategy,
    /// Memory kind of every backing heap
    pub kind: HeapKind,
    /// Heap restrictions (placed-resource strategy only)
    pub heap_flags: HeapFlags,
    /// Flags of the backing buffer (manual-suballocation strategy only)
    pub resource_flags: ResourceFlags,
    /// Capacity of a regular backing heap
    pub heap_size: u64,
    /// Smallest block the buddy allocator hands out
    pub min_block_size: u64,
    /// Alignment used when the caller passes 0
    pub default_alignment: u64,
}

impl HeapConfig {
    /// CPU-writable upload memory, suballocated from one mapped buffer per heap.
    pub fn upload(config: &AllocatorConfig) -> Self {
        Self {
            strategy: AllocationStrategy::ManualSubAllocation,
            kind: HeapKind::Upload,
            heap_flags: HeapFlags::NONE,
            resource_flags: ResourceFlags::NONE,
            heap_size: config.default_heap_size,
            min_block_size: config.min_block_size,
            default_alignment: config.upload_alignment,
        }
    }

    /// GPU-only buffers.
    pub fn default_buffers(config: &AllocatorConfig) -> Self {
        Self {
            strategy: AllocationStrategy::ManualSubAllocation,
            kind: HeapKind::Default,
            heap_flags: HeapFlags::NONE,
            resource_flags: ResourceFlags::NONE,
            heap_size: config.default_heap_size,
            min_block_size: config.min_block_size,
            default_alignment: config.default_alignment,
        }
    }

    /// GPU-only buffers that allow unordered access.
    pub fn uav_buffers(config: &AllocatorConfig) -> Self {
        Self {
            resource_flags: ResourceFlags::ALLOW_UNORDERED_ACCESS,
            ..Self::default_buffers(config)
        }
    }

    /// Sampled textures placed in shared heaps.
    pub fn textures(config: &AllocatorConfig) -> Self {
        Self {
            strategy: AllocationStrategy::PlacedResource,
            kind: HeapKind::Default,
            heap_flags: HeapFlags::ALLOW_ONLY_NON_RT_DS_TEXTURES,
            resource_flags: ResourceFlags::NONE,
            heap_size: config.default_heap_size,
            min_block_size: config.min_block_size,
            default_alignment: config.texture_alignment,
        }
    }

    /// Builder pattern: set the regular heap capacity.
    pub fn with_heap_size(mut self, size: u64) -> Self {
        self.heap_size = size;
        self
    }

    /// Builder pattern: set the minimum block size.
    pub fn with_min_block_size(mut self, size: u64) -> Self {
        self.min_block_size = size;
        self
    }

    /// Check the sizes form a valid buddy hierarchy.
    pub fn validate(&self) -> Result<()> {
        if !self.min_block_size.is_power_of_two() {
            return Err(AllocError::InvalidRequest("min block size must be a power of two"));
        }
        if !self.heap_size.is_power_of_two() || self.heap_size < self.min_block_size {
            return Err(AllocError::InvalidRequest(
                "heap size must be a power of two no smaller than the min block size",
            ));
        }
        if !self.default_alignment.is_power_of_two() {
            return Err(AllocError::InvalidRequest("default alignment must be a power of two"));
        }
        Ok(())
    }
}

/// Configuration for the whole allocator context.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// Capacity of a regular backing heap (default: 256 MB)
    pub default_heap_size: u64,

    /// Minimum buddy block (default: 256 bytes)
    pub min_block_size: u64,

    /// Default alignment for GPU-only buffers
    pub default_alignment: u64,

    /// Default alignment for upload allocations (constant-buffer alignment)
    pub upload_alignment: u64,

    /// Default placement alignment for textures
    pub texture_alignment: u64,

    /// Render-target view slots
    pub rtv_capacity: u32,

    /// Depth-stencil view slots
    pub dsv_capacity: u32,

    /// Shader-resource/constant-buffer/unordered-access view slots
    pub srv_capacity: u32,

    /// Shader-visible CBV/SRV/UAV descriptors staged per frame
    pub cache_cbv_srv_uav_capacity: u32,

    /// Render-target descriptors staged per frame
    pub cache_rtv_capacity: u32,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            default_heap_size: mb(256),
            min_block_size: 256,
            default_alignment: 4,
            upload_alignment: 256,
            texture_alignment: kb(64),
            rtv_capacity: 128,
            dsv_capacity: 128,
            srv_capacity: 128,
            cache_cbv_srv_uav_capacity: 2048,
            cache_rtv_capacity: 1024,
        }
    }
}

impl AllocatorConfig {
    /// Create a minimal config for testing or constrained environments.
    pub fn minimal() -> Self {
        Self {
            default_heap_size: mb(4),
            min_block_size: 256,
            default_alignment: 4,
            upload_alignment: 256,
            texture_alignment: kb(64),
            rtv_capacity: 16,
            dsv_capacity: 16,
            srv_capacity: 32,
            cache_cbv_srv_uav_capacity: 64,
            cache_rtv_capacity: 16,
        }
    }

    /// Builder pattern: set the regular heap capacity.
    pub fn with_heap_size(mut self, size: u64) -> Self {
        self.default_heap_size = size;
        self
    }

    /// Builder pattern: set the minimum block size.
    pub fn with_min_block_size(mut self, size: u64) -> Self {
        self.min_block_size = size;
        self
    }

    /// Builder pattern: set all three descriptor table capacities.
    pub fn with_descriptor_capacity(mut self, slots: u32) -> Self {
        self.rtv_capacity = slots;
        self.dsv_capacity = slots;
        self.srv_capacity = slots;
        self
    }

    /// Reject configurations the allocators cannot honor.
    pub fn validate(&self) -> Result<()> {
        for alignment in [self.default_alignment, self.upload_alignment, self.texture_alignment] {
            if !alignment.is_power_of_two() {
                return Err(AllocError::InvalidRequest("alignments must be powers of two"));
            }
        }
        if [
            self.rtv_capacity,
            self.dsv_capacity,
            self.srv_capacity,
            self.cache_cbv_srv_uav_capacity,
            self.cache_rtv_capacity,
        ]
        .contains(&0)
        {
            return Err(AllocError::InvalidRequest("descriptor capacities must be non-zero"));
        }
        HeapConfig::upload(self).validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AllocatorConfig::default().validate().is_ok());
        assert!(AllocatorConfig::minimal().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_power_of_two_heap() {
        let config = AllocatorConfig::default().with_heap_size(mb(3));
        assert!(matches!(config.validate(), Err(AllocError::InvalidRequest(_))));
    }

    #[test]
    fn test_rejects_empty_descriptor_table() {
        let config = AllocatorConfig::minimal().with_descriptor_capacity(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_heap_configs_follow_memory_kind() {
        let config = AllocatorConfig::default();
        assert_eq!(HeapConfig::upload(&config).kind, HeapKind::Upload);
        assert_eq!(HeapConfig::textures(&config).strategy, AllocationStrategy::PlacedResource);
        assert!(HeapConfig::uav_buffers(&config)
            .resource_flags
            .contains(ResourceFlags::ALLOW_UNORDERED_ACCESS));
    }
}
