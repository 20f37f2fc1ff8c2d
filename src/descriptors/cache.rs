//! Per-frame descriptor staging.

use std::sync::Arc;

use crate::api::config::AllocatorConfig;
use crate::api::error::{AllocError, Result};
use crate::diagnostics;
use crate::gpu::traits::{CpuDescriptorHandle, DescriptorHeapInfo, DescriptorKind, GpuDescriptorHandle, GpuDevice};

/// A contiguous run of descriptors staged in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedDescriptors {
    /// CPU address of the first staged descriptor
    pub cpu: CpuDescriptorHandle,
    /// GPU address of the first staged descriptor (shader-visible tables only)
    pub gpu: Option<GpuDescriptorHandle>,
    pub count: u32,
}

/// Linear table rewound as a whole.
struct StagingTable {
    heap: DescriptorHeapInfo,
    used: u32,
}

impl StagingTable {
    fn append(&mut self, device: &dyn GpuDevice, handles: &[CpuDescriptorHandle]) -> Result<CachedDescriptors> {
        let count = u32::try_from(handles.len()).unwrap_or(u32::MAX);
        if count > self.heap.capacity - self.used {
            diagnostics::emit_with_context(
                &diagnostics::GH103,
                &format!("{} of {} {} descriptors used, {} more requested", self.used, self.heap.capacity, self.heap.kind, count),
            );
            return Err(AllocError::TableFull {
                kind: self.heap.kind,
                capacity: self.heap.capacity,
            });
        }

        let staged = CachedDescriptors {
            cpu: self.heap.cpu_start.offset(self.used, self.heap.increment),
            gpu: self.heap.gpu_start.map(|gpu| gpu.offset(self.used, self.heap.increment)),
            count,
        };
        if count > 0 {
            device.copy_descriptors(staged.cpu, handles, self.heap.kind);
        }
        self.used += count;
        Ok(staged)
    }
}

/// Scratch descriptor tables filled during a frame and rewound when it retires.
///
/// CBV/SRV/UAV descriptors are staged in a shader-visible table so they can be
/// bound directly; render-target views are staged in a CPU-only table.
pub struct DescriptorCache {
    device: Arc<dyn GpuDevice>,
    cbv_srv_uav: StagingTable,
    rtv: StagingTable,
}

impl DescriptorCache {
    pub fn new(device: Arc<dyn GpuDevice>, config: &AllocatorConfig) -> Result<Self> {
        if config.cache_cbv_srv_uav_capacity == 0 || config.cache_rtv_capacity == 0 {
            return Err(AllocError::InvalidRequest("descriptor cache capacity must be non-zero"));
        }
        let cbv_srv_uav =
            device.create_descriptor_heap(DescriptorKind::CbvSrvUav, config.cache_cbv_srv_uav_capacity, true)?;
        let rtv = match device.create_descriptor_heap(DescriptorKind::RenderTarget, config.cache_rtv_capacity, false) {
            Ok(rtv) => rtv,
            Err(err) => {
                device.destroy_descriptor_heap(cbv_srv_uav.id);
                return Err(err.into());
            }
        };

        Ok(Self {
            device,
            cbv_srv_uav: StagingTable { heap: cbv_srv_uav, used: 0 },
            rtv: StagingTable { heap: rtv, used: 0 },
        })
    }

    /// Copy `handles` into the shader-visible table, contiguously.
    pub fn append_cbv_srv_uav(&mut self, handles: &[CpuDescriptorHandle]) -> Result<CachedDescriptors> {
        self.cbv_srv_uav.append(self.device.as_ref(), handles)
    }

    /// Copy render-target view `handles` into the RTV table, contiguously.
    pub fn append_rtv(&mut self, handles: &[CpuDescriptorHandle]) -> Result<CachedDescriptors> {
        self.rtv.append(self.device.as_ref(), handles)
    }

    /// Rewind both tables. Only valid once the GPU no longer reads them.
    pub fn reset(&mut self) {
        self.cbv_srv_uav.used = 0;
        self.rtv.used = 0;
    }

    pub fn cbv_srv_uav_used(&self) -> u32 {
        self.cbv_srv_uav.used
    }

    pub fn rtv_used(&self) -> u32 {
        self.rtv.used
    }

    /// The shader-visible table, for binding.
    pub fn cbv_srv_uav_heap(&self) -> &DescriptorHeapInfo {
        &self.cbv_srv_uav.heap
    }
}

impl Drop for DescriptorCache {
    fn drop(&mut self) {
        self.device.destroy_descriptor_heap(self.cbv_srv_uav.heap.id);
        self.device.destroy_descriptor_heap(self.rtv.heap.id);
    }
}
