//! Benchmarks for the numeric kernels.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use tcadana_metrics::kernels::{interpolate, max_abs, trapezoid};

fn bench_reductions(c: &mut Criterion) {
    let mut group = c.benchmark_group("reductions");
    for &n in &[10_000usize, 1_000_000] {
        let x: Vec<f64> = (0..n).map(|i| i as f64 * 0.01).collect();
        let y: Vec<f64> = x.iter().map(|v| (v * 0.1).sin() * 1e5).collect();
        group.bench_with_input(BenchmarkId::new("trapezoid", n), &n, |b, _| {
            b.iter(|| black_box(trapezoid(&x, &y, 1 << 16)))
        });
        group.bench_with_input(BenchmarkId::new("max_abs", n), &n, |b, _| {
            b.iter(|| black_box(max_abs(&y, 1 << 16)))
        });
    }
    group.finish();
}

fn bench_interpolate(c: &mut Criterion) {
    let x: Vec<f64> = (0..100_000).map(|i| i as f64).collect();
    let y: Vec<f64> = x.iter().map(|v| v * 2.0).collect();
    c.bench_function("interpolate_100k", |b| {
        b.iter(|| black_box(interpolate(&x, &y, black_box(54_321.5))))
    });
}

criterion_group!(benches, bench_reductions, bench_interpolate);
criterion_main!(benches);
