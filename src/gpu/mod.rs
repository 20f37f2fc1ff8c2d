//! GPU backend seam.
//!
//! Every allocator talks to the device through the [`GpuDevice`] trait, shared
//! as an `Arc<dyn GpuDevice>`.
//!
//! ## Backends
//! - `host`: in-memory device for tests and tooling (always available)

// Always present for API stability: traits define the interface
pub mod traits;
pub use traits::{
    AllocationInfo, CpuDescriptorHandle, DescriptorHeapId, DescriptorHeapInfo, DescriptorKind,
    DeviceError, Format, GpuDescriptorHandle, GpuDevice, HeapDesc, HeapFlags, HeapId, HeapKind,
    ResourceDesc, ResourceFlags, ResourceId, ResourceState,
};

pub mod host;
pub use host::HostDevice;
