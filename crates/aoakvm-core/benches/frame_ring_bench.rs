//! Criterion benchmarks for the frame ring.
//!
//! The decode thread pushes once per decoded picture and the render loop pops
//! once per tick, both under the ring's mutex.  These numbers bound how much
//! of a 60 fps frame budget the hand-off costs.
//!
//! Run with:
//! ```bash
//! cargo bench --package aoakvm-core --bench frame_ring_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use aoakvm_core::FrameRing;

/// Stand-in for a decoded picture: the ring only moves ownership.
fn make_frame(seq: u64) -> Vec<u8> {
    let mut frame = vec![0u8; 64];
    frame[..8].copy_from_slice(&seq.to_le_bytes());
    frame
}

/// Push immediately followed by pop, the steady state when rendering keeps up.
fn bench_push_pop(c: &mut Criterion) {
    let ring = FrameRing::with_capacity(30).expect("ring allocation must succeed");
    let mut seq = 0u64;
    c.bench_function("push_pop", |b| {
        b.iter(|| {
            seq += 1;
            ring.push(black_box(make_frame(seq)));
            black_box(ring.pop())
        })
    });
}

/// Pushing into a full ring, the case where rendering has stalled.
fn bench_push_evicting(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_full_ring");
    for capacity in [2usize, 30, 120] {
        let ring = FrameRing::with_capacity(capacity).expect("ring allocation must succeed");
        for seq in 0..capacity as u64 {
            ring.push(make_frame(seq));
        }
        group.bench_with_input(BenchmarkId::new("capacity", capacity), &ring, |b, ring| {
            let mut seq = 0u64;
            b.iter(|| {
                seq += 1;
                black_box(ring.push(make_frame(seq)))
            })
        });
    }
    group.finish();
}

fn bench_pop_empty(c: &mut Criterion) {
    let ring: FrameRing<Vec<u8>> = FrameRing::with_capacity(30).expect("ring allocation must succeed");
    c.bench_function("pop_empty", |b| b.iter(|| black_box(ring.pop())));
}

criterion_group!(benches, bench_push_pop, bench_push_evicting, bench_pop_empty);
criterion_main!(benches);
