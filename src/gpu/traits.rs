//! GPU backend traits and types
//!
//! This module defines the device interface the allocators are written against,
//! WITHOUT pulling in any backend-specific dependencies. A backend only has to
//! create heaps, place resources inside them, or create committed resources.

use std::fmt;
use std::ptr::NonNull;

/// Errors reported by a GPU backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device refused to back the request with memory
    OutOfMemory {
        /// Bytes that were requested
        requested: u64,
    },
    /// The request is valid but the backend cannot express it
    Unsupported(String),
    /// Backend-specific error (opaque)
    Backend(String),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::OutOfMemory { requested } => {
                write!(f, "device out of memory ({} bytes requested)", requested)
            }
            DeviceError::Unsupported(msg) => write!(f, "Unsupported by backend: {}", msg),
            DeviceError::Backend(msg) => write!(f, "Backend error: {}", msg),
        }
    }
}

impl std::error::Error for DeviceError {}

/// Opaque identity of a device heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapId(pub u64);

/// Opaque identity of a device resource (placed or committed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

/// Opaque identity of a descriptor heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorHeapId(pub u64);

/// CPU-side descriptor handle (an address in a descriptor heap)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CpuDescriptorHandle(pub u64);

impl CpuDescriptorHandle {
    /// Offset the handle by `index` descriptors of `increment` bytes.
    pub fn offset(self, index: u32, increment: u32) -> Self {
        Self(self.0 + index as u64 * increment as u64)
    }
}

/// GPU-side descriptor handle (only valid for shader-visible heaps)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuDescriptorHandle(pub u64);

impl GpuDescriptorHandle {
    /// Offset the handle by `index` descriptors of `increment` bytes.
    pub fn offset(self, index: u32, increment: u32) -> Self {
        Self(self.0 + index as u64 * increment as u64)
    }
}

/// Memory kind a heap is created in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapKind {
    /// CPU-writable, GPU-readable
    Upload,
    /// GPU-only, fastest for shaders
    Default,
    /// GPU-writable, CPU-readable
    Readback,
}

impl HeapKind {
    /// Whether memory of this kind can be mapped on the CPU.
    pub fn is_cpu_visible(&self) -> bool {
        !matches!(self, HeapKind::Default)
    }
}

/// Heap placement restrictions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HeapFlags {
    pub bits: u32,
}

impl HeapFlags {
    pub const NONE: Self = Self { bits: 0 };
    pub const ALLOW_ONLY_BUFFERS: Self = Self { bits: 0x01 };
    pub const ALLOW_ONLY_NON_RT_DS_TEXTURES: Self = Self { bits: 0x02 };
    pub const ALLOW_ONLY_RT_DS_TEXTURES: Self = Self { bits: 0x04 };

    /// Check whether all bits of `other` are set.
    pub fn contains(&self, other: Self) -> bool {
        self.bits & other.bits == other.bits
    }
}

impl std::ops::BitOr for HeapFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self { bits: self.bits | rhs.bits }
    }
}

/// Resource usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ResourceFlags {
    pub bits: u32,
}

impl ResourceFlags {
    pub const NONE: Self = Self { bits: 0 };
    pub const ALLOW_RENDER_TARGET: Self = Self { bits: 0x01 };
    pub const ALLOW_DEPTH_STENCIL: Self = Self { bits: 0x02 };
    pub const ALLOW_UNORDERED_ACCESS: Self = Self { bits: 0x04 };
    pub const DENY_SHADER_RESOURCE: Self = Self { bits: 0x08 };

    /// Check whether all bits of `other` are set.
    pub fn contains(&self, other: Self) -> bool {
        self.bits & other.bits == other.bits
    }

    /// Check whether any bit of `other` is set.
    pub fn intersects(&self, other: Self) -> bool {
        self.bits & other.bits != 0
    }

    /// Render-target or depth-stencil usage.
    pub fn is_attachment(&self) -> bool {
        self.intersects(Self::ALLOW_RENDER_TARGET | Self::ALLOW_DEPTH_STENCIL)
    }
}

impl std::ops::BitOr for ResourceFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self { bits: self.bits | rhs.bits }
    }
}

/// Resource state at creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    GenericRead,
    CopyDest,
    RenderTarget,
    DepthWrite,
    UnorderedAccess,
    PixelShaderResource,
}

/// Texel formats known to the allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    R8G8B8A8Unorm,
    B8G8R8A8Unorm,
    R16G16B16A16Float,
    R32G32B32A32Float,
    R32Float,
    D24UnormS8Uint,
    D32Float,
}

impl Format {
    /// Size of one texel in bytes.
    pub fn bytes_per_pixel(&self) -> u64 {
        match self {
            Format::R8G8B8A8Unorm | Format::B8G8R8A8Unorm => 4,
            Format::R16G16B16A16Float => 8,
            Format::R32G32B32A32Float => 16,
            Format::R32Float | Format::D24UnormS8Uint | Format::D32Float => 4,
        }
    }

    /// Depth/stencil formats.
    pub fn is_depth(&self) -> bool {
        matches!(self, Format::D24UnormS8Uint | Format::D32Float)
    }
}

/// Description of a resource to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceDesc {
    /// Linear buffer
    Buffer { size: u64, flags: ResourceFlags },
    /// 2D texture (or texture array)
    Texture2D {
        width: u32,
        height: u32,
        array_size: u16,
        mip_levels: u16,
        format: Format,
        sample_count: u32,
        flags: ResourceFlags,
    },
}

impl ResourceDesc {
    /// Describe a buffer.
    pub fn buffer(size: u64) -> Self {
        ResourceDesc::Buffer { size, flags: ResourceFlags::NONE }
    }

    /// Describe a single-mip, single-sample 2D texture.
    pub fn tex2d(width: u32, height: u32, format: Format) -> Self {
        ResourceDesc::Texture2D {
            width,
            height,
            array_size: 1,
            mip_levels: 1,
            format,
            sample_count: 1,
            flags: ResourceFlags::NONE,
        }
    }

    /// Replace the usage flags.
    pub fn with_flags(mut self, new_flags: ResourceFlags) -> Self {
        match &mut self {
            ResourceDesc::Buffer { flags, .. } | ResourceDesc::Texture2D { flags, .. } => {
                *flags = new_flags
            }
        }
        self
    }

    /// Usage flags of the resource.
    pub fn flags(&self) -> ResourceFlags {
        match self {
            ResourceDesc::Buffer { flags, .. } | ResourceDesc::Texture2D { flags, .. } => *flags,
        }
    }

    pub fn is_buffer(&self) -> bool {
        matches!(self, ResourceDesc::Buffer { .. })
    }
}

/// Description of a heap to create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapDesc {
    pub size: u64,
    pub alignment: u64,
    pub kind: HeapKind,
    pub flags: HeapFlags,
}

/// Size and alignment a resource needs when placed in a heap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationInfo {
    pub size: u64,
    pub alignment: u64,
}

/// Descriptor (view) heap kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    /// Render-target views
    RenderTarget,
    /// Depth-stencil views
    DepthStencil,
    /// Constant-buffer, shader-resource and unordered-access views
    CbvSrvUav,
}

impl DescriptorKind {
    /// All kinds, in table order.
    pub const ALL: [DescriptorKind; 3] = [
        DescriptorKind::RenderTarget,
        DescriptorKind::DepthStencil,
        DescriptorKind::CbvSrvUav,
    ];
}

impl fmt::Display for DescriptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorKind::RenderTarget => write!(f, "RTV"),
            DescriptorKind::DepthStencil => write!(f, "DSV"),
            DescriptorKind::CbvSrvUav => write!(f, "CBV/SRV/UAV"),
        }
    }
}

/// A descriptor heap as created by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHeapInfo {
    pub id: DescriptorHeapId,
    pub kind: DescriptorKind,
    pub capacity: u32,
    /// Byte distance between consecutive descriptors
    pub increment: u32,
    pub cpu_start: CpuDescriptorHandle,
    /// Present only for shader-visible heaps
    pub gpu_start: Option<GpuDescriptorHandle>,
}

/// The device interface every allocator is written against.
///
/// All methods take `&self`; backends synchronize internally. The trait is
/// object-safe so allocators can share an `Arc<dyn GpuDevice>`.
pub trait GpuDevice: Send + Sync {
    /// Create a heap that resources can later be placed in.
    fn create_heap(&self, desc: &HeapDesc) -> Result<HeapId, DeviceError>;

    /// Release a heap. Resources placed in it must already be destroyed.
    fn destroy_heap(&self, heap: HeapId);

    /// Create a resource with its own implicit heap.
    fn create_committed_resource(
        &self,
        kind: HeapKind,
        desc: &ResourceDesc,
        state: ResourceState,
    ) -> Result<ResourceId, DeviceError>;

    /// Create a resource aliasing `heap` at `offset`.
    fn create_placed_resource(
        &self,
        heap: HeapId,
        offset: u64,
        desc: &ResourceDesc,
        state: ResourceState,
    ) -> Result<ResourceId, DeviceError>;

    /// Release a placed or committed resource.
    fn destroy_resource(&self, resource: ResourceId);

    /// Persistently map a CPU-visible resource.
    fn map(&self, resource: ResourceId) -> Result<NonNull<u8>, DeviceError>;

    /// GPU virtual address of a resource (0 for textures).
    fn gpu_virtual_address(&self, resource: ResourceId) -> u64;

    /// Size and alignment `desc` needs when placed in a heap.
    fn allocation_info(&self, desc: &ResourceDesc) -> AllocationInfo;

    /// Create a descriptor heap with `capacity` slots.
    fn create_descriptor_heap(
        &self,
        kind: DescriptorKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<DescriptorHeapInfo, DeviceError>;

    /// Release a descriptor heap.
    fn destroy_descriptor_heap(&self, heap: DescriptorHeapId);

    /// Copy `src` descriptors contiguously starting at `dst`.
    fn copy_descriptors(&self, dst: CpuDescriptorHandle, src: &[CpuDescriptorHandle], kind: DescriptorKind);
}
