//! Fixed-capacity descriptor slot tables.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::api::config::AllocatorConfig;
use crate::api::error::{AllocError, Result};
use crate::api::location::AllocatorId;
use crate::diagnostics;
use crate::gpu::traits::{CpuDescriptorHandle, DescriptorHeapInfo, DescriptorKind, GpuDevice};

/// A slot in a descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    kind: DescriptorKind,
    index: u32,
    cpu: CpuDescriptorHandle,
    owner: AllocatorId,
}

impl SlotHandle {
    pub fn kind(&self) -> DescriptorKind {
        self.kind
    }

    /// Index of the slot inside its table.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// CPU descriptor address of the slot.
    pub fn cpu(&self) -> CpuDescriptorHandle {
        self.cpu
    }
}

/// One descriptor table of a single kind.
///
/// Free indices live in a bounded queue prefilled with `0..capacity`; an
/// occupancy bitmap rejects frees of slots that are not handed out.
pub struct DescriptorSlotAllocator {
    device: Arc<dyn GpuDevice>,
    id: AllocatorId,
    heap: DescriptorHeapInfo,
    free_list: ArrayQueue<u32>,
    occupied: Vec<u64>,
    in_use: usize,
}

impl DescriptorSlotAllocator {
    /// Create a non-shader-visible table of `capacity` descriptors.
    pub fn new(device: Arc<dyn GpuDevice>, kind: DescriptorKind, capacity: u32) -> Result<Self> {
        if capacity == 0 {
            return Err(AllocError::InvalidRequest("descriptor table capacity must be non-zero"));
        }
        let heap = device.create_descriptor_heap(kind, capacity, false)?;

        let free_list = ArrayQueue::new(capacity as usize);
        for index in 0..capacity {
            // Cannot fail: the queue holds exactly `capacity` entries.
            let _ = free_list.push(index);
        }

        log::debug!("created {} slot table with {} descriptors", kind, capacity);
        Ok(Self {
            device,
            id: AllocatorId::next(),
            heap,
            free_list,
            occupied: vec![0; (capacity as usize + 63) / 64],
            in_use: 0,
        })
    }

    /// Hand out a free slot, or `TableFull` when every slot is in use.
    pub fn allocate(&mut self) -> Result<SlotHandle> {
        let index = match self.free_list.pop() {
            Some(index) => index,
            None => {
                diagnostics::emit_with_context(&diagnostics::GH101, &format!("{} table", self.heap.kind));
                return Err(AllocError::TableFull {
                    kind: self.heap.kind,
                    capacity: self.heap.capacity,
                });
            }
        };
        debug_assert!(!self.is_occupied(index), "slot {} handed out twice", index);
        self.set_occupied(index, true);
        self.in_use += 1;

        Ok(SlotHandle {
            kind: self.heap.kind,
            index,
            cpu: self.cpu_handle(index),
            owner: self.id,
        })
    }

    /// Return a slot to the table.
    pub fn free(&mut self, handle: SlotHandle) -> Result<()> {
        if handle.owner != self.id || handle.kind != self.heap.kind || handle.index >= self.heap.capacity {
            diagnostics::emit(&diagnostics::GH102);
            return Err(AllocError::InvalidFree("slot handle belongs to another table"));
        }
        if !self.is_occupied(handle.index) {
            diagnostics::emit(&diagnostics::GH102);
            return Err(AllocError::InvalidFree("slot is not in use"));
        }

        self.set_occupied(handle.index, false);
        self.in_use -= 1;
        self.free_list
            .push(handle.index)
            .map_err(|_| AllocError::InvalidFree("slot free list overflow"))
    }

    /// CPU descriptor address of slot `index`.
    pub fn cpu_handle(&self, index: u32) -> CpuDescriptorHandle {
        self.heap.cpu_start.offset(index, self.heap.increment)
    }

    pub fn kind(&self) -> DescriptorKind {
        self.heap.kind
    }

    pub fn capacity(&self) -> u32 {
        self.heap.capacity
    }

    /// Slots currently handed out.
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn available(&self) -> usize {
        self.free_list.len()
    }

    /// The device table backing this allocator.
    pub fn heap_info(&self) -> &DescriptorHeapInfo {
        &self.heap
    }

    fn is_occupied(&self, index: u32) -> bool {
        self.occupied[(index / 64) as usize] & (1u64 << (index % 64)) != 0
    }

    fn set_occupied(&mut self, index: u32, occupied: bool) {
        let word = &mut self.occupied[(index / 64) as usize];
        if occupied {
            *word |= 1u64 << (index % 64);
        } else {
            *word &= !(1u64 << (index % 64));
        }
    }
}

impl Drop for DescriptorSlotAllocator {
    fn drop(&mut self) {
        self.device.destroy_descriptor_heap(self.heap.id);
    }
}

/// One slot table per descriptor kind.
pub struct DescriptorSlots {
    render_target: DescriptorSlotAllocator,
    depth_stencil: DescriptorSlotAllocator,
    cbv_srv_uav: DescriptorSlotAllocator,
}

impl DescriptorSlots {
    /// Create the three tables with the capacities from `config`.
    pub fn new(device: Arc<dyn GpuDevice>, config: &AllocatorConfig) -> Result<Self> {
        Ok(Self {
            render_target: DescriptorSlotAllocator::new(
                Arc::clone(&device),
                DescriptorKind::RenderTarget,
                config.rtv_capacity,
            )?,
            depth_stencil: DescriptorSlotAllocator::new(
                Arc::clone(&device),
                DescriptorKind::DepthStencil,
                config.dsv_capacity,
            )?,
            cbv_srv_uav: DescriptorSlotAllocator::new(device, DescriptorKind::CbvSrvUav, config.srv_capacity)?,
        })
    }

    pub fn allocate(&mut self, kind: DescriptorKind) -> Result<SlotHandle> {
        self.allocator_mut(kind).allocate()
    }

    pub fn free(&mut self, handle: SlotHandle) -> Result<()> {
        self.allocator_mut(handle.kind()).free(handle)
    }

    /// Table serving `kind`.
    pub fn allocator(&self, kind: DescriptorKind) -> &DescriptorSlotAllocator {
        match kind {
            DescriptorKind::RenderTarget => &self.render_target,
            DescriptorKind::DepthStencil => &self.depth_stencil,
            DescriptorKind::CbvSrvUav => &self.cbv_srv_uav,
        }
    }

    fn allocator_mut(&mut self, kind: DescriptorKind) -> &mut DescriptorSlotAllocator {
        match kind {
            DescriptorKind::RenderTarget => &mut self.render_target,
            DescriptorKind::DepthStencil => &mut self.depth_stencil,
            DescriptorKind::CbvSrvUav => &mut self.cbv_srv_uav,
        }
    }

    /// Slots in use across all kinds.
    pub fn in_use(&self) -> usize {
        DescriptorKind::ALL.iter().map(|&kind| self.allocator(kind).in_use()).sum()
    }
}
