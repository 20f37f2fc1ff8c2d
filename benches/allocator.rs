//! Benchmarks for gpuheap.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gpuheap::{
    AllocatorConfig, DescriptorKind, Format, GpuMemory, HeapConfig, HostDevice, MultiBuddyAllocator, ResourceDesc,
    ResourceState,
};
use std::sync::Arc;

fn bench_buddy(c: &mut Criterion) {
    let mut group = c.benchmark_group("buddy_allocation");

    for size in [256u64, 4096, 65536] {
        group.bench_with_input(BenchmarkId::new("alloc_free_flush", size), &size, |b, &size| {
            let config = HeapConfig::default_buffers(&AllocatorConfig::default());
            let mut pool = MultiBuddyAllocator::new(Arc::new(HostDevice::new()), config).unwrap();
            let mut generation = 0;
            b.iter(|| {
                let mut location = pool.allocate(black_box(size), 0).unwrap();
                pool.deallocate(&mut location, generation).unwrap();
                pool.cleanup(generation);
                generation += 1;
            })
        });
    }

    group.bench_function("alloc_100_mixed_then_flush", |b| {
        let config = HeapConfig::default_buffers(&AllocatorConfig::default());
        let mut pool = MultiBuddyAllocator::new(Arc::new(HostDevice::new()), config).unwrap();
        let mut live = Vec::with_capacity(100);
        let mut generation = 0;
        b.iter(|| {
            for i in 0..100u64 {
                live.push(pool.allocate(256 + (i * 977) % 16384, 0).unwrap());
            }
            for mut location in live.drain(..) {
                pool.deallocate(&mut location, generation).unwrap();
            }
            black_box(pool.cleanup(generation));
            generation += 1;
        })
    });

    group.finish();
}

fn bench_frame_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_loop");

    group.bench_function("upload_64_constants_per_frame", |b| {
        let mut memory = GpuMemory::new(Arc::new(HostDevice::new()), AllocatorConfig::default()).unwrap();
        let constants = [0u8; 192];
        let mut in_flight = Vec::with_capacity(64);
        b.iter(|| {
            for _ in 0..64 {
                in_flight.push(memory.upload_data(&constants, 0).unwrap());
            }
            for mut location in in_flight.drain(..) {
                memory.free(&mut location).unwrap();
            }
            let frame = memory.submit_frame();
            if frame >= 2 {
                memory.on_frame_retired(frame - 2);
            }
        })
    });

    group.bench_function("placed_texture_alloc_free", |b| {
        let mut memory = GpuMemory::new(Arc::new(HostDevice::new()), AllocatorConfig::default()).unwrap();
        let desc = ResourceDesc::tex2d(256, 256, Format::R8G8B8A8Unorm);
        b.iter(|| {
            let mut texture = memory.alloc_texture(&desc, ResourceState::CopyDest).unwrap();
            memory.free(&mut texture).unwrap();
            let frame = memory.submit_frame();
            memory.on_frame_retired(frame);
        })
    });

    group.finish();
}

fn bench_descriptors(c: &mut Criterion) {
    let mut group = c.benchmark_group("descriptors");

    group.bench_function("slot_alloc_free", |b| {
        let mut memory = GpuMemory::new(Arc::new(HostDevice::new()), AllocatorConfig::default()).unwrap();
        b.iter(|| {
            let slot = memory.alloc_descriptor_slot(DescriptorKind::CbvSrvUav).unwrap();
            memory.free_descriptor_slot(black_box(slot)).unwrap();
        })
    });

    group.bench_function("cache_append_16", |b| {
        let mut memory = GpuMemory::new(Arc::new(HostDevice::new()), AllocatorConfig::default()).unwrap();
        let sources: Vec<_> = (0..16)
            .map(|_| memory.alloc_descriptor_slot(DescriptorKind::CbvSrvUav).unwrap().cpu())
            .collect();
        b.iter(|| {
            let cache = memory.descriptor_cache_mut();
            if cache.append_cbv_srv_uav(&sources).is_err() {
                cache.reset();
            }
        })
    });

    group.finish();
}

criterion_group!(benches, bench_buddy, bench_frame_loop, bench_descriptors);
criterion_main!(benches);
