//! Buffer pool and chain dispatch benchmarks.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use framepipe::image::{AllocationTag, BufferFlags, ImageBuffer};
use framepipe::pool::{BufferPool, BufferRequest};
use framepipe::prelude::*;
use framepipe::stage::StageConfig;

fn no_direct(_: &mut ImageBuffer) -> bool {
    false
}

fn bench_pool_acquire_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_acquire_release");

    for (label, width, height) in [("sd", 720u32, 576u32), ("hd", 1920, 1080), ("uhd", 3840, 2160)]
    {
        let mut pool = BufferPool::new();
        let request = BufferRequest {
            format: PixelFormat::I420,
            tag: AllocationTag::Temp,
            flags: BufferFlags::empty(),
            width,
            height,
            alloc_width: width,
        };
        // Warm the slot so the loop measures reuse, not first allocation.
        let warm = pool.acquire(request, no_direct, "bench").unwrap();
        warm.borrow_mut().release_ref("bench").unwrap();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(label), &request, |b, &request| {
            b.iter(|| {
                let buf = pool.acquire(request, no_direct, "bench").unwrap();
                buf.borrow_mut().release_ref("bench").unwrap();
            });
        });
    }

    group.finish();
}

fn bench_chain_push_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_push_frame");

    for depth in [1usize, 4, 16] {
        let sink = NullSink::new([PixelFormat::I420]);
        let spec = vec!["identity"; depth].join(" ! ");
        let specs = parse_chain_spec(&spec).unwrap();
        let mut chain =
            FilterChain::build(StageRegistry::builtin(), &specs, Box::new(sink)).unwrap();
        chain
            .configure(StageConfig {
                width: 1280,
                height: 720,
                out_width: 1280,
                out_height: 720,
                flags: ConfigFlags::empty(),
                format: PixelFormat::I420,
            })
            .unwrap();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| {
                let frame = chain
                    .acquire_buffer(
                        PixelFormat::I420,
                        AllocationTag::Temp,
                        BufferFlags::empty(),
                        None,
                        None,
                    )
                    .unwrap();
                chain.push_frame(&frame, Some(0.0)).unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pool_acquire_release, bench_chain_push_frame);
criterion_main!(benches);
