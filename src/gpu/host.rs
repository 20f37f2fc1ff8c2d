//! In-memory GPU backend
//!
//! Emulates a device with plain host memory. CPU-visible heaps and committed
//! upload/readback resources get real byte storage, so mapped pointers can be
//! written; GPU-only memory is bookkept without storage. No GPU hardware is
//! needed, which makes this the backend for tests and tooling.

use std::collections::HashMap;
use std::ptr::NonNull;

use super::traits::*;
use crate::sync::mutex::Mutex;
use crate::util::layout::{align_up, checked_align_up};
use crate::util::size::kb;

/// Placement alignment for buffers and regular textures.
const DEFAULT_PLACEMENT_ALIGNMENT: u64 = kb(64);

/// Placement alignment for multisampled textures.
const MSAA_PLACEMENT_ALIGNMENT: u64 = kb(4096);

/// First CPU descriptor address handed out.
const DESCRIPTOR_BASE: u64 = 0x1000;

/// First GPU descriptor address handed out.
const GPU_DESCRIPTOR_BASE: u64 = 0x1_0000_0000;

/// First GPU virtual address handed out to buffers.
const GPU_VA_BASE: u64 = 0x10_0000_0000;

struct HostHeap {
    desc: HeapDesc,
    storage: Option<Box<[u8]>>,
    placed: usize,
}

enum Placement {
    Committed { kind: HeapKind },
    Placed { heap: HeapId, offset: u64 },
}

struct HostResource {
    desc: ResourceDesc,
    placement: Placement,
    size: u64,
    gpu_va: u64,
    storage: Option<Box<[u8]>>,
}

struct HostDescriptorHeap {
    info: DescriptorHeapInfo,
    contents: Vec<Option<CpuDescriptorHandle>>,
}

impl HostDescriptorHeap {
    fn slot_of(&self, handle: CpuDescriptorHandle) -> Option<usize> {
        let start = self.info.cpu_start.0;
        let end = start + self.info.capacity as u64 * self.info.increment as u64;
        if handle.0 < start || handle.0 >= end {
            return None;
        }
        Some(((handle.0 - start) / self.info.increment as u64) as usize)
    }
}

#[derive(Default)]
struct HostState {
    next_id: u64,
    heaps: HashMap<HeapId, HostHeap>,
    resources: HashMap<ResourceId, HostResource>,
    descriptor_heaps: HashMap<DescriptorHeapId, HostDescriptorHeap>,
    used_bytes: u64,
    next_gpu_va: u64,
    next_descriptor: u64,
    next_gpu_descriptor: u64,
}

impl HostState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn reserve(&mut self, size: u64, budget: Option<u64>) -> Result<(), DeviceError> {
        let used = self
            .used_bytes
            .checked_add(size)
            .filter(|&used| budget.map_or(true, |budget| used <= budget))
            .ok_or(DeviceError::OutOfMemory { requested: size })?;
        self.used_bytes = used;
        Ok(())
    }
}

/// A GPU device emulated in host memory
pub struct HostDevice {
    state: Mutex<HostState>,
    budget: Option<u64>,
}

impl HostDevice {
    /// Create a device with unlimited memory.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HostState {
                next_gpu_va: GPU_VA_BASE,
                next_descriptor: DESCRIPTOR_BASE,
                next_gpu_descriptor: GPU_DESCRIPTOR_BASE,
                ..HostState::default()
            }),
            budget: None,
        }
    }

    /// Create a device that refuses heaps and committed resources beyond `bytes`.
    pub fn with_budget(bytes: u64) -> Self {
        Self {
            budget: Some(bytes),
            ..Self::new()
        }
    }

    /// Number of live heaps.
    pub fn heap_count(&self) -> usize {
        self.state.lock().heaps.len()
    }

    /// Sizes of live heaps, smallest first.
    pub fn heap_sizes(&self) -> Vec<u64> {
        let mut sizes: Vec<u64> = self.state.lock().heaps.values().map(|h| h.desc.size).collect();
        sizes.sort_unstable();
        sizes
    }

    /// Number of live resources (placed and committed).
    pub fn resource_count(&self) -> usize {
        self.state.lock().resources.len()
    }

    /// Number of live committed resources.
    pub fn committed_count(&self) -> usize {
        self.state
            .lock()
            .resources
            .values()
            .filter(|r| matches!(r.placement, Placement::Committed { .. }))
            .count()
    }

    /// Number of live descriptor heaps.
    pub fn descriptor_heap_count(&self) -> usize {
        self.state.lock().descriptor_heaps.len()
    }

    /// Bytes of device memory currently reserved by heaps and committed resources.
    pub fn used_bytes(&self) -> u64 {
        self.state.lock().used_bytes
    }

    /// Heap and offset of a placed resource.
    pub fn placement_of(&self, resource: ResourceId) -> Option<(HeapId, u64)> {
        match self.state.lock().resources.get(&resource)?.placement {
            Placement::Placed { heap, offset } => Some((heap, offset)),
            Placement::Committed { .. } => None,
        }
    }

    /// Size of a live resource.
    pub fn resource_size(&self, resource: ResourceId) -> Option<u64> {
        self.state.lock().resources.get(&resource).map(|r| r.size)
    }

    /// Source handle last copied into the descriptor slot at `handle`.
    pub fn descriptor_at(&self, handle: CpuDescriptorHandle) -> Option<CpuDescriptorHandle> {
        let state = self.state.lock();
        state.descriptor_heaps.values().find_map(|heap| {
            let slot = heap.slot_of(handle)?;
            heap.contents[slot]
        })
    }
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn texture_footprint(desc: &ResourceDesc) -> u64 {
    match desc {
        ResourceDesc::Buffer { size, .. } => *size,
        ResourceDesc::Texture2D { width, height, array_size, mip_levels, format, sample_count, .. } => {
            let mut total = 0u64;
            let (mut w, mut h) = (*width as u64, *height as u64);
            for _ in 0..(*mip_levels).max(1) {
                let level = w.max(1).saturating_mul(h.max(1)).saturating_mul(format.bytes_per_pixel());
                total = total.saturating_add(level);
                w /= 2;
                h /= 2;
            }
            total
                .saturating_mul((*array_size).max(1) as u64)
                .saturating_mul((*sample_count).max(1) as u64)
        }
    }
}

/// Zeroed byte storage for CPU-visible memory.
fn host_storage(size: u64) -> Result<Box<[u8]>, DeviceError> {
    let len = usize::try_from(size).map_err(|_| DeviceError::OutOfMemory { requested: size })?;
    let mut storage = Vec::new();
    storage
        .try_reserve_exact(len)
        .map_err(|_| DeviceError::OutOfMemory { requested: size })?;
    storage.resize(len, 0u8);
    Ok(storage.into_boxed_slice())
}

impl GpuDevice for HostDevice {
    fn create_heap(&self, desc: &HeapDesc) -> Result<HeapId, DeviceError> {
        if desc.size == 0 {
            return Err(DeviceError::Backend("heap size must be non-zero".to_string()));
        }
        let mut state = self.state.lock();
        state.reserve(desc.size, self.budget)?;

        let storage = match desc.kind.is_cpu_visible().then(|| host_storage(desc.size)).transpose() {
            Ok(storage) => storage,
            Err(err) => {
                state.used_bytes -= desc.size;
                return Err(err);
            }
        };
        let id = HeapId(state.next_id());
        state.heaps.insert(id, HostHeap { desc: *desc, storage, placed: 0 });
        Ok(id)
    }

    fn destroy_heap(&self, heap: HeapId) {
        let mut state = self.state.lock();
        if let Some(removed) = state.heaps.remove(&heap) {
            debug_assert_eq!(removed.placed, 0, "heap destroyed with live placed resources");
            state.used_bytes -= removed.desc.size;
        }
    }

    fn create_committed_resource(
        &self,
        kind: HeapKind,
        desc: &ResourceDesc,
        _state: ResourceState,
    ) -> Result<ResourceId, DeviceError> {
        let size = texture_footprint(desc);
        if size == 0 {
            return Err(DeviceError::Backend("resource size must be non-zero".to_string()));
        }
        if kind.is_cpu_visible() && !desc.is_buffer() {
            return Err(DeviceError::Unsupported(
                "textures cannot live in CPU-visible memory".to_string(),
            ));
        }

        let reserved = checked_align_up(size, DEFAULT_PLACEMENT_ALIGNMENT)
            .ok_or(DeviceError::OutOfMemory { requested: size })?;
        let mut state = self.state.lock();
        state.reserve(reserved, self.budget)?;

        let storage = match kind.is_cpu_visible().then(|| host_storage(size)).transpose() {
            Ok(storage) => storage,
            Err(err) => {
                state.used_bytes -= reserved;
                return Err(err);
            }
        };
        let gpu_va = if desc.is_buffer() {
            let va = state.next_gpu_va;
            state.next_gpu_va = state.next_gpu_va.saturating_add(reserved);
            va
        } else {
            0
        };
        let id = ResourceId(state.next_id());
        state.resources.insert(
            id,
            HostResource {
                desc: desc.clone(),
                placement: Placement::Committed { kind },
                size,
                gpu_va,
                storage,
            },
        );
        Ok(id)
    }

    fn create_placed_resource(
        &self,
        heap: HeapId,
        offset: u64,
        desc: &ResourceDesc,
        _state: ResourceState,
    ) -> Result<ResourceId, DeviceError> {
        let info = self.allocation_info(desc);
        let mut state = self.state.lock();

        let host_heap = state
            .heaps
            .get_mut(&heap)
            .ok_or_else(|| DeviceError::Backend(format!("unknown heap {:?}", heap)))?;
        let flags = host_heap.desc.flags;
        if flags.contains(HeapFlags::ALLOW_ONLY_BUFFERS) && !desc.is_buffer() {
            return Err(DeviceError::Unsupported("heap only accepts buffers".to_string()));
        }
        if flags.contains(HeapFlags::ALLOW_ONLY_NON_RT_DS_TEXTURES)
            && (desc.is_buffer() || desc.flags().is_attachment())
        {
            return Err(DeviceError::Unsupported(
                "heap only accepts non render-target/depth textures".to_string(),
            ));
        }
        if flags.contains(HeapFlags::ALLOW_ONLY_RT_DS_TEXTURES) && !desc.flags().is_attachment() {
            return Err(DeviceError::Unsupported(
                "heap only accepts render-target/depth textures".to_string(),
            ));
        }
        if offset % info.alignment != 0 {
            return Err(DeviceError::Backend(format!(
                "placement offset {} is not aligned to {}",
                offset, info.alignment
            )));
        }
        if offset.checked_add(info.size).map_or(true, |end| end > host_heap.desc.size) {
            return Err(DeviceError::Backend(format!(
                "placement of {} bytes at {} exceeds heap size {}",
                info.size, offset, host_heap.desc.size
            )));
        }
        host_heap.placed += 1;

        let gpu_va = if desc.is_buffer() {
            let va = state.next_gpu_va;
            state.next_gpu_va = state.next_gpu_va.saturating_add(info.size);
            va
        } else {
            0
        };
        let id = ResourceId(state.next_id());
        state.resources.insert(
            id,
            HostResource {
                desc: desc.clone(),
                placement: Placement::Placed { heap, offset },
                size: info.size,
                gpu_va,
                storage: None,
            },
        );
        Ok(id)
    }

    fn destroy_resource(&self, resource: ResourceId) {
        let mut state = self.state.lock();
        let Some(removed) = state.resources.remove(&resource) else {
            return;
        };
        match removed.placement {
            Placement::Committed { .. } => {
                state.used_bytes -= align_up(removed.size, DEFAULT_PLACEMENT_ALIGNMENT);
            }
            Placement::Placed { heap, .. } => {
                if let Some(host_heap) = state.heaps.get_mut(&heap) {
                    host_heap.placed -= 1;
                }
            }
        }
    }

    fn map(&self, resource: ResourceId) -> Result<NonNull<u8>, DeviceError> {
        let mut state = self.state.lock();
        let state = &mut *state;
        let res = state
            .resources
            .get_mut(&resource)
            .ok_or_else(|| DeviceError::Backend(format!("unknown resource {:?}", resource)))?;

        let ptr = match res.placement {
            Placement::Committed { .. } => res.storage.as_mut().map(|s| s.as_mut_ptr()),
            Placement::Placed { heap, offset } => state
                .heaps
                .get_mut(&heap)
                .and_then(|h| h.storage.as_mut())
                // SAFETY: placement was bounds-checked against the heap size on creation
                .map(|s| unsafe { s.as_mut_ptr().add(offset as usize) }),
        };
        ptr.and_then(NonNull::new)
            .ok_or_else(|| DeviceError::Unsupported(format!("{:?} is not CPU-visible", res.desc)))
    }

    fn gpu_virtual_address(&self, resource: ResourceId) -> u64 {
        self.state
            .lock()
            .resources
            .get(&resource)
            .map(|r| r.gpu_va)
            .unwrap_or(0)
    }

    fn allocation_info(&self, desc: &ResourceDesc) -> AllocationInfo {
        let alignment = match desc {
            ResourceDesc::Texture2D { sample_count, .. } if *sample_count > 1 => MSAA_PLACEMENT_ALIGNMENT,
            _ => DEFAULT_PLACEMENT_ALIGNMENT,
        };
        AllocationInfo {
            size: checked_align_up(texture_footprint(desc), alignment).unwrap_or(u64::MAX),
            alignment,
        }
    }

    fn create_descriptor_heap(
        &self,
        kind: DescriptorKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<DescriptorHeapInfo, DeviceError> {
        if capacity == 0 {
            return Err(DeviceError::Backend("descriptor heap capacity must be non-zero".to_string()));
        }
        if shader_visible && kind != DescriptorKind::CbvSrvUav {
            // Render-target and depth-stencil views are never shader visible.
            return Err(DeviceError::Unsupported(format!("{} heaps cannot be shader visible", kind)));
        }

        let increment = match kind {
            DescriptorKind::RenderTarget | DescriptorKind::DepthStencil => 32,
            DescriptorKind::CbvSrvUav => 64,
        };
        let span = capacity as u64 * increment as u64;

        let mut state = self.state.lock();
        let cpu_start = CpuDescriptorHandle(state.next_descriptor);
        state.next_descriptor += align_up(span, 0x1000);
        let gpu_start = shader_visible.then(|| {
            let start = GpuDescriptorHandle(state.next_gpu_descriptor);
            state.next_gpu_descriptor += align_up(span, 0x1000);
            start
        });

        let info = DescriptorHeapInfo {
            id: DescriptorHeapId(state.next_id()),
            kind,
            capacity,
            increment,
            cpu_start,
            gpu_start,
        };
        state.descriptor_heaps.insert(
            info.id,
            HostDescriptorHeap { info, contents: vec![None; capacity as usize] },
        );
        Ok(info)
    }

    fn destroy_descriptor_heap(&self, heap: DescriptorHeapId) {
        self.state.lock().descriptor_heaps.remove(&heap);
    }

    fn copy_descriptors(&self, dst: CpuDescriptorHandle, src: &[CpuDescriptorHandle], kind: DescriptorKind) {
        let mut state = self.state.lock();
        let Some(heap) = state
            .descriptor_heaps
            .values_mut()
            .find(|h| h.info.kind == kind && h.slot_of(dst).is_some())
        else {
            log::warn!("copy_descriptors: {:?} is not inside any {} heap", dst, kind);
            return;
        };

        let first = heap.slot_of(dst).unwrap_or(0);
        for (i, handle) in src.iter().enumerate() {
            match heap.contents.get_mut(first + i) {
                Some(slot) => *slot = Some(*handle),
                None => {
                    log::warn!("copy_descriptors: {} descriptors overflow the destination heap", src.len());
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload_heap(size: u64) -> HeapDesc {
        HeapDesc {
            size,
            alignment: DEFAULT_PLACEMENT_ALIGNMENT,
            kind: HeapKind::Upload,
            flags: HeapFlags::ALLOW_ONLY_BUFFERS,
        }
    }

    #[test]
    fn test_budget_refuses_heap() {
        let device = HostDevice::with_budget(kb(64));
        assert!(device.create_heap(&upload_heap(kb(64))).is_ok());

        let err = device.create_heap(&upload_heap(kb(64))).unwrap_err();
        assert_eq!(err, DeviceError::OutOfMemory { requested: kb(64) });
        assert_eq!(device.heap_count(), 1);
    }

    #[test]
    fn test_huge_sizes_saturate_instead_of_wrapping() {
        let device = HostDevice::new();
        let huge = ResourceDesc::tex2d(u32::MAX, u32::MAX, Format::R32G32B32A32Float);
        assert_eq!(device.allocation_info(&huge).size, u64::MAX);

        for kind in [HeapKind::Default, HeapKind::Upload] {
            let err = device
                .create_committed_resource(kind, &ResourceDesc::buffer(u64::MAX), ResourceState::Common)
                .unwrap_err();
            assert_eq!(err, DeviceError::OutOfMemory { requested: u64::MAX });
        }
        assert_eq!(device.resource_count(), 0);
        assert_eq!(device.used_bytes(), 0);
    }

    #[test]
    fn test_placed_buffer_maps_into_heap_storage() {
        let device = HostDevice::new();
        let heap = device.create_heap(&upload_heap(kb(256))).unwrap();

        let a = device
            .create_placed_resource(heap, 0, &ResourceDesc::buffer(16), ResourceState::GenericRead)
            .unwrap();
        let b = device
            .create_placed_resource(heap, kb(64), &ResourceDesc::buffer(16), ResourceState::GenericRead)
            .unwrap();

        let pa = device.map(a).unwrap();
        let pb = device.map(b).unwrap();
        assert_eq!(pb.as_ptr() as usize - pa.as_ptr() as usize, kb(64) as usize);
        assert_eq!(device.placement_of(b), Some((heap, kb(64))));
    }

    #[test]
    fn test_default_memory_cannot_map() {
        let device = HostDevice::new();
        let buffer = device
            .create_committed_resource(HeapKind::Default, &ResourceDesc::buffer(1024), ResourceState::Common)
            .unwrap();
        assert!(matches!(device.map(buffer), Err(DeviceError::Unsupported(_))));
    }

    #[test]
    fn test_texture_heap_rejects_render_targets() {
        let device = HostDevice::new();
        let heap = device
            .create_heap(&HeapDesc {
                size: kb(1024),
                alignment: DEFAULT_PLACEMENT_ALIGNMENT,
                kind: HeapKind::Default,
                flags: HeapFlags::ALLOW_ONLY_NON_RT_DS_TEXTURES,
            })
            .unwrap();

        let rt = ResourceDesc::tex2d(64, 64, Format::R8G8B8A8Unorm).with_flags(ResourceFlags::ALLOW_RENDER_TARGET);
        let err = device
            .create_placed_resource(heap, 0, &rt, ResourceState::RenderTarget)
            .unwrap_err();
        assert!(matches!(err, DeviceError::Unsupported(_)));
    }

    #[test]
    fn test_copy_descriptors() {
        let device = HostDevice::new();
        let info = device.create_descriptor_heap(DescriptorKind::CbvSrvUav, 4, true).unwrap();
        assert!(info.gpu_start.is_some());

        let src = [CpuDescriptorHandle(0xAA), CpuDescriptorHandle(0xBB)];
        let dst = info.cpu_start.offset(1, info.increment);
        device.copy_descriptors(dst, &src, DescriptorKind::CbvSrvUav);

        assert_eq!(device.descriptor_at(info.cpu_start), None);
        assert_eq!(device.descriptor_at(dst), Some(CpuDescriptorHandle(0xAA)));
        assert_eq!(
            device.descriptor_at(info.cpu_start.offset(2, info.increment)),
            Some(CpuDescriptorHandle(0xBB))
        );
    }

    #[test]
    fn test_rtv_heap_not_shader_visible() {
        let device = HostDevice::new();
        assert!(device.create_descriptor_heap(DescriptorKind::RenderTarget, 8, true).is_err());
        assert!(device.create_descriptor_heap(DescriptorKind::RenderTarget, 8, false).is_ok());
    }
}
