//! Benchmark: per-frame dispatch overhead
//!
//! Registers `n` trivial actions on a manual looper and measures one tick.
//! Actions never finish, so every iteration runs the full table.
//! Throughput "elements" are action invocations (`n`).

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use tickloop_runtime::{ActionContext, LooperExt, ManualLooper};

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");
    for &n in &[16usize, 1_024, 16_384] {
        let looper = ManualLooper::new(60.0).expect("manual looper");
        for _ in 0..n {
            looper
                .register(|ctx: &ActionContext| black_box(ctx.current_frame()) != u64::MAX)
                .expect("register");
        }
        looper.tick();

        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| looper.tick());
        });
    }
    group.finish();
}

fn bench_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("churn");
    for &n in &[1_024usize, 16_384] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter_batched(
                || {
                    let looper = ManualLooper::new(60.0).expect("manual looper");
                    for i in 0..n {
                        // Every other action finishes on its first run
                        looper
                            .register(move |_: &ActionContext| i % 2 == 0)
                            .expect("register");
                    }
                    looper
                },
                |looper| looper.tick(),
                BatchSize::PerIteration,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_tick, bench_churn);
criterion_main!(benches);
