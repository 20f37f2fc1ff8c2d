//! # gpuheap
//!
//! GPU memory allocation for real-time renderers: buddy suballocation of large
//! device heaps, per-memory-kind front-ends, and fixed-capacity descriptor
//! tables, with releases deferred until the GPU has retired the frame that
//! freed them.
//!
//! ## Features
//!
//! - Buddy allocator over power-of-two blocks, lowest offset first
//! - Growable pools of backing heaps, with dedicated heaps for oversized requests
//! - Placed-resource and manual-suballocation strategies
//! - Upload, default-buffer, texture and render-target front-ends
//! - Generation-tagged deferred release
//! - Descriptor slot tables and a per-frame descriptor cache
//! - Diagnostics through the `log` crate
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gpuheap::{AllocatorConfig, GpuMemory, HostDevice, DescriptorKind};
//!
//! let mut memory = GpuMemory::new(Arc::new(HostDevice::new()), AllocatorConfig::default()).unwrap();
//!
//! // Frame loop
//! let constants = memory.upload_data(&[0u8; 64], 0).unwrap();
//! let srv = memory.alloc_descriptor_slot(DescriptorKind::CbvSrvUav).unwrap();
//! let frame = memory.submit_frame();
//! // ... once the GPU signals completion of `frame` ...
//! memory.on_frame_retired(frame);
//! # let _ = (constants, srv);
//! ```

pub mod allocators;
pub mod api;
pub mod descriptors;
pub mod diagnostics;
pub mod gpu;

mod sync;
pub mod util;

// Re-export public API at crate root for convenience
pub use api::config::{AllocationStrategy, AllocatorConfig, HeapConfig};
pub use api::error::{AllocError, Result};
pub use api::location::{AllocatorId, LocationKind, ResourceLocation};
pub use api::memory::GpuMemory;
pub use api::stats::{MemoryStats, PoolStats};

// Allocators
pub use allocators::buddy::BuddyAllocator;
pub use allocators::default_buffer::DefaultBufferAllocator;
pub use allocators::deferred::{DeferredQueue, Generation};
pub use allocators::multi::MultiBuddyAllocator;
pub use allocators::pixel::PixelResourceAllocator;
pub use allocators::texture::TextureResourceAllocator;
pub use allocators::upload::UploadBufferAllocator;

// Descriptors
pub use descriptors::{CachedDescriptors, DescriptorCache, DescriptorSlotAllocator, DescriptorSlots, SlotHandle};

// Backend seam
pub use gpu::{
    CpuDescriptorHandle, DescriptorKind, DeviceError, Format, GpuDescriptorHandle, GpuDevice, HeapFlags, HeapKind,
    HostDevice, ResourceDesc, ResourceFlags, ResourceState,
};

// Diagnostics - Core types and predefined codes
pub use diagnostics::{Diagnostic, DiagnosticKind};
pub use diagnostics::{GH001, GH002, GH003, GH004, GH005, GH101, GH102, GH103, GH901};
