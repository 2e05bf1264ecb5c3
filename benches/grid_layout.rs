use criterion::{black_box, criterion_group, criterion_main, Criterion};
use vodforge::storyboard::{layout, total_tiles};

fn bench_layout(c: &mut Criterion) {
    c.bench_function("layout_common_durations", |b| {
        b.iter(|| {
            for secs in [12.0, 95.0, 600.0, 3600.0] {
                let tiles = total_tiles(black_box(secs), 100);
                black_box(layout(tiles, 10).unwrap());
            }
        })
    });

    // Primes force the fallback scan.
    c.bench_function("layout_prime_fallback", |b| {
        b.iter(|| black_box(layout(black_box(97), black_box(10)).unwrap()))
    });

    c.bench_function("layout_large_edge", |b| {
        b.iter(|| black_box(layout(black_box(4093), black_box(64)).unwrap()))
    });
}

criterion_group!(benches, bench_layout);
criterion_main!(benches);
