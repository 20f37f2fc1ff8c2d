//! Integration tests for gpuheap.

use gpuheap::{
    AllocError, AllocatorConfig, CpuDescriptorHandle, DescriptorKind, Format, GpuMemory,
    HeapConfig, HostDevice, LocationKind, MultiBuddyAllocator, ResourceDesc, ResourceFlags, ResourceLocation,
    ResourceState,
};
use gpuheap::util::layout::is_aligned;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

fn context() -> (Arc<HostDevice>, GpuMemory) {
    let device = Arc::new(HostDevice::new());
    let memory = GpuMemory::new(device.clone(), AllocatorConfig::minimal()).unwrap();
    (device, memory)
}

fn free_all(memory: &mut GpuMemory, locations: &mut [ResourceLocation]) {
    for location in locations {
        memory.free(location).unwrap();
    }
}

#[test]
fn test_small_uploads_share_one_heap() {
    let device = Arc::new(HostDevice::new());
    let config = HeapConfig::upload(&AllocatorConfig::minimal()).with_heap_size(4096);
    let mut pool = MultiBuddyAllocator::new(device.clone(), config).unwrap();

    let mut locations: Vec<_> = (0..4).map(|_| pool.allocate(100, 4).unwrap()).collect();
    assert_eq!(pool.heap_count(), 1);
    assert_eq!(device.committed_count(), 1);
    assert_eq!(
        locations.iter().map(|l| l.offset_in_heap()).collect::<Vec<_>>(),
        vec![0, 256, 512, 768]
    );
    assert_eq!(pool.stats().allocated_bytes, 1024);

    for location in &mut locations {
        pool.deallocate(location, 0).unwrap();
    }
    pool.cleanup(0);
    let heap = &pool.heaps()[0];
    assert_eq!(heap.free_offsets(4), vec![0]);
    assert_eq!(heap.free_bytes(), 4096);
    heap.validate().unwrap();
}

#[test]
fn test_oversized_request_gets_exact_heap() {
    let device = Arc::new(HostDevice::new());
    let config = HeapConfig::textures(&AllocatorConfig::minimal()).with_heap_size(256 * 1024);
    let mut pool = MultiBuddyAllocator::new(device.clone(), config).unwrap();

    // 512x512 RGBA8 = 1 MiB, four times the default heap.
    let desc = ResourceDesc::tex2d(512, 512, Format::R8G8B8A8Unorm);
    let mut texture = pool.allocate_placed(&desc, ResourceState::CopyDest).unwrap();
    assert_eq!(device.heap_sizes(), vec![1024 * 1024]);
    assert_eq!(texture.size(), 1024 * 1024);

    pool.deallocate(&mut texture, 0).unwrap();
    pool.cleanup(0);
}

#[test]
fn test_huge_requests_fail_without_reserving_memory() {
    let (device, mut memory) = context();

    assert!(matches!(memory.alloc_upload(u64::MAX, 0), Err(AllocError::InvalidRequest(_))));
    assert!(matches!(memory.upload_data(&[0; 16], 1 << 63), Err(AllocError::InvalidRequest(_))));
    let huge = ResourceDesc::buffer((1 << 63) + 1);
    assert!(matches!(memory.alloc_default_buffer(&huge, 0), Err(AllocError::InvalidRequest(_))));

    let stats = memory.stats();
    assert_eq!(stats.heap_count, 0);
    assert_eq!(stats.allocation_count, 0);
    assert_eq!(device.committed_count(), 0);
}

#[test]
fn test_alignment_property() {
    let device = Arc::new(HostDevice::new());
    let config = HeapConfig::default_buffers(&AllocatorConfig::minimal()).with_heap_size(1 << 20);
    let mut pool = MultiBuddyAllocator::new(device, config).unwrap();

    let mut live = Vec::new();
    for (i, size) in [1u64, 255, 256, 257, 1000, 4096, 5000, 65536].iter().enumerate() {
        for alignment in [4u64, 256, 1024, 65536] {
            let location = pool.allocate(*size, alignment).unwrap();
            let expected = (*size).max(alignment).max(256).next_power_of_two();
            assert!(is_aligned(location.offset_in_heap(), alignment), "size {} align {}", size, alignment);
            assert_eq!(location.block_size(), expected);
            live.push(location);
        }
        if i % 2 == 1 {
            for mut location in live.drain(..) {
                pool.deallocate(&mut location, i as u64).unwrap();
            }
            pool.cleanup(i as u64);
        }
        pool.validate().unwrap();
    }
    assert_eq!(pool.heap_count(), 1);
    assert!(pool.heaps()[0].is_empty());
}

#[test]
fn test_no_reuse_before_retirement() {
    let (_device, mut memory) = context();

    let (mut first, _) = memory.alloc_upload(4096, 0).unwrap();
    let first_offset = first.offset_in_heap();
    memory.free(&mut first).unwrap();
    let frame = memory.submit_frame();

    // Still in flight: the freed range must not come back.
    let (mut second, _) = memory.alloc_upload(4096, 0).unwrap();
    assert_ne!(second.offset_in_heap(), first_offset);

    memory.on_frame_retired(frame);
    let (mut third, _) = memory.alloc_upload(4096, 0).unwrap();
    assert_eq!(third.offset_in_heap(), first_offset);

    memory.free(&mut second).unwrap();
    memory.free(&mut third).unwrap();
}

#[test]
fn test_frame_loop_reaches_steady_state() {
    let (device, mut memory) = context();

    for frame in 0..32u64 {
        let mut transient: Vec<_> = (0..8)
            .map(|i| memory.upload_data(&[i as u8; 200], 0).unwrap())
            .collect();
        free_all(&mut memory, &mut transient);
        let submitted = memory.submit_frame();
        assert_eq!(submitted, frame);
        if frame >= 2 {
            memory.on_frame_retired(frame - 2);
        }
    }

    // Two frames in flight never need more than the first heap.
    assert_eq!(memory.upload_allocator().pool().heap_count(), 1);
    assert_eq!(device.committed_count(), 1);
    let stats = memory.stats();
    assert_eq!(stats.allocation_count, 256);
    assert_eq!(stats.deallocation_count, 256);
    assert!(stats.peak_allocated > 0);
}

#[test]
fn test_textures_route_by_usage() {
    let (device, mut memory) = context();

    let sampled = ResourceDesc::tex2d(256, 256, Format::R8G8B8A8Unorm);
    let target = ResourceDesc::tex2d(256, 256, Format::R16G16B16A16Float).with_flags(ResourceFlags::ALLOW_RENDER_TARGET);
    let depth = ResourceDesc::tex2d(256, 256, Format::D24UnormS8Uint).with_flags(ResourceFlags::ALLOW_DEPTH_STENCIL);

    let mut locations = vec![
        memory.alloc_texture(&sampled, ResourceState::PixelShaderResource).unwrap(),
        memory.alloc_texture(&target, ResourceState::RenderTarget).unwrap(),
        memory.alloc_texture(&depth, ResourceState::DepthWrite).unwrap(),
    ];
    assert_eq!(locations[0].kind(), LocationKind::Placed);
    assert_eq!(locations[1].kind(), LocationKind::Committed);
    assert_eq!(locations[2].kind(), LocationKind::Committed);
    assert_eq!(device.heap_count(), 1);
    assert_eq!(memory.stats().committed_resources, 2);

    free_all(&mut memory, &mut locations);
    assert_eq!(device.resource_count(), 3);
    let frame = memory.submit_frame();
    assert_eq!(memory.on_frame_retired(frame), 3);
    assert_eq!(device.resource_count(), 0);
    assert_eq!(memory.stats().committed_resources, 0);
}

#[test]
fn test_default_buffers_and_uav_buffers() {
    let (_device, mut memory) = context();

    let mut vertex = memory.alloc_default_buffer(&ResourceDesc::buffer(3000), 0).unwrap();
    let uav_desc = ResourceDesc::buffer(3000).with_flags(ResourceFlags::ALLOW_UNORDERED_ACCESS);
    let mut uav = memory.alloc_default_buffer(&uav_desc, 0).unwrap();

    assert_eq!(vertex.kind(), LocationKind::SubAllocated);
    assert_ne!(vertex.resource(), uav.resource());
    assert!(vertex.mapped_ptr().is_none());
    assert!(is_aligned(vertex.gpu_address(), 4));

    let texture = ResourceDesc::tex2d(4, 4, Format::R32Float);
    assert!(matches!(
        memory.alloc_default_buffer(&texture, 0),
        Err(AllocError::InvalidRequest(_))
    ));

    memory.free(&mut vertex).unwrap();
    memory.free(&mut uav).unwrap();
    assert!(matches!(memory.free(&mut uav), Err(AllocError::InvalidFree(_))));
}

#[test]
fn test_descriptor_slots_are_unique_until_freed() {
    let device = Arc::new(HostDevice::new());
    let config = AllocatorConfig::minimal().with_descriptor_capacity(128);
    let mut memory = GpuMemory::new(device, config).unwrap();

    let handles: Vec<_> = (0..128)
        .map(|_| memory.alloc_descriptor_slot(DescriptorKind::CbvSrvUav).unwrap())
        .collect();
    let indices: HashSet<u32> = handles.iter().map(|h| h.index()).collect();
    assert_eq!(indices.len(), 128);
    assert!(indices.iter().all(|&i| i < 128));

    assert_eq!(
        memory.alloc_descriptor_slot(DescriptorKind::CbvSrvUav),
        Err(AllocError::TableFull { kind: DescriptorKind::CbvSrvUav, capacity: 128 })
    );
    // Other tables are unaffected.
    let rtv = memory.alloc_descriptor_slot(DescriptorKind::RenderTarget).unwrap();
    assert_eq!(memory.stats().descriptor_slots_in_use, 129);

    memory.free_descriptor_slot(handles[7]).unwrap();
    let reused = memory.alloc_descriptor_slot(DescriptorKind::CbvSrvUav).unwrap();
    assert_eq!(reused.index(), handles[7].index());
    memory.free_descriptor_slot(reused).unwrap();
    assert!(matches!(memory.free_descriptor_slot(handles[7]), Err(AllocError::InvalidFree(_))));
    memory.free_descriptor_slot(rtv).unwrap();
}

#[test]
fn test_descriptor_cache_resets_on_retire() {
    let (device, mut memory) = context();

    let sources: Vec<_> = (0..3)
        .map(|_| memory.alloc_descriptor_slot(DescriptorKind::CbvSrvUav).unwrap().cpu())
        .collect();
    let staged = memory.descriptor_cache_mut().append_cbv_srv_uav(&sources).unwrap();
    assert_eq!(staged.count, 3);
    assert!(staged.gpu.is_some());
    assert_eq!(device.descriptor_at(staged.cpu), Some(sources[0]));

    let frame = memory.submit_frame();
    memory.on_frame_retired(frame);
    assert_eq!(memory.descriptor_cache_mut().cbv_srv_uav_used(), 0);

    let again = memory.descriptor_cache_mut().append_cbv_srv_uav(&sources[..1]).unwrap();
    assert_eq!(again.cpu, staged.cpu);

    let capacity = memory.config().cache_rtv_capacity as usize;
    let too_many = vec![CpuDescriptorHandle(0); capacity + 1];
    assert!(matches!(
        memory.descriptor_cache_mut().append_rtv(&too_many),
        Err(AllocError::TableFull { kind: DescriptorKind::RenderTarget, .. })
    ));
}

#[test]
fn test_device_out_of_memory_surfaces() {
    let device = Arc::new(HostDevice::with_budget(8 * 1024 * 1024));
    let config = AllocatorConfig::minimal();
    let mut memory = GpuMemory::new(device, config).unwrap();

    let (mut first, _) = memory.alloc_upload(4 * 1024 * 1024, 0).unwrap();
    let mut second = memory.alloc_default_buffer(&ResourceDesc::buffer(1024), 0).unwrap();
    assert!(matches!(
        memory.alloc_upload(4 * 1024 * 1024, 0),
        Err(AllocError::DeviceOutOfMemory { .. })
    ));

    memory.free(&mut first).unwrap();
    memory.free(&mut second).unwrap();
}

#[test]
fn test_shutdown_releases_everything() {
    let (device, mut memory) = context();

    let mut upload = memory.upload_data(b"hello", 0).unwrap();
    let sampled = ResourceDesc::tex2d(64, 64, Format::R8G8B8A8Unorm);
    let mut texture = memory.alloc_texture(&sampled, ResourceState::Common).unwrap();
    let depth = ResourceDesc::tex2d(64, 64, Format::D32Float).with_flags(ResourceFlags::ALLOW_DEPTH_STENCIL);
    let mut target = memory.alloc_texture(&depth, ResourceState::DepthWrite).unwrap();
    memory.free(&mut upload).unwrap();
    memory.free(&mut texture).unwrap();
    memory.free(&mut target).unwrap();

    memory.shutdown();
    assert_eq!(device.heap_count(), 0);
    assert_eq!(device.resource_count(), 0);
    assert_eq!(device.descriptor_heap_count(), 0);
    assert_eq!(device.used_bytes(), 0);
}

#[test]
fn test_context_moves_to_render_thread() {
    let (device, memory) = context();

    let handle = thread::spawn(move || {
        let mut memory = memory;
        let mut location = memory.upload_data(&[1, 2, 3, 4], 0).unwrap();
        memory.free(&mut location).unwrap();
        let frame = memory.submit_frame();
        memory.on_frame_retired(frame)
    });
    assert_eq!(handle.join().unwrap(), 1);
    assert_eq!(device.resource_count(), 0);
}
