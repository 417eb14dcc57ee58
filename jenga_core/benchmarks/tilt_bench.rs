use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use jenga_core::{build_headless_app, run_tick, TowerConfig};

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");

    for levels in [6u32, 18, 36, 72] {
        group.bench_with_input(BenchmarkId::new("levels", levels), &levels, |b, &levels| {
            b.iter_batched(
                || {
                    let config = TowerConfig {
                        levels,
                        tilt_sample_interval: 1,
                        ..TowerConfig::default()
                    };
                    let mut app = build_headless_app(config);
                    run_tick(&mut app);
                    app
                },
                |mut app| {
                    run_tick(&mut app);
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(tilt_benches, bench_tick);
criterion_main!(tilt_benches);
