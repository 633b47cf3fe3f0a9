// benches/benchmarks.rs -- Plane fit throughput, serial vs parallel.
//
//   cargo bench
//
// The serial rows pin the fitter below its parallel threshold so the
// rayon speedup (and the small-cloud overhead) is visible per size.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use glam::DVec3;

use planefit_gpu::plane::PlaneFitter;

// ============================================================
// Helpers
// ============================================================

/// Noisy samples of the plane z = 0.3x - 0.2y + 1.
fn make_cloud(n: usize) -> Vec<DVec3> {
    let mut state = 0x9e37_79b9_7f4a_7c15u64;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state >> 11) as f64 / (1u64 << 53) as f64 - 0.5
    };
    (0..n)
        .map(|_| {
            let x = 20.0 * next();
            let y = 20.0 * next();
            DVec3::new(x, y, 0.3 * x - 0.2 * y + 1.0 + 0.01 * next())
        })
        .collect()
}

// ============================================================
// Benchmarks
// ============================================================

fn bench_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("plane_fit");
    for &n in &[1_000usize, 100_000, 1_000_000] {
        let cloud = make_cloud(n);
        group.throughput(Throughput::Elements(n as u64));

        let serial = PlaneFitter::new().with_parallel_threshold(usize::MAX);
        group.bench_with_input(BenchmarkId::new("serial", n), &cloud, |b, pts| {
            b.iter(|| serial.fit(pts))
        });

        let parallel = PlaneFitter::new().with_parallel_threshold(0);
        group.bench_with_input(BenchmarkId::new("parallel", n), &cloud, |b, pts| {
            b.iter(|| parallel.fit(pts))
        });
    }
    group.finish();
}

fn bench_chunk_len(c: &mut Criterion) {
    let cloud = make_cloud(1_000_000);
    let mut group = c.benchmark_group("plane_fit_chunk_len");
    for &chunk in &[256usize, 1024, 16_384, 131_072] {
        let fitter = PlaneFitter::new().with_parallel_threshold(0).with_chunk_len(chunk);
        group.bench_with_input(BenchmarkId::from_parameter(chunk), &cloud, |b, pts| {
            b.iter(|| fitter.fit(pts))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_fit, bench_chunk_len);
criterion_main!(benches);
