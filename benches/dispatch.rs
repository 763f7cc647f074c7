use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use fiberpool::prelude::*;

fn batch_size() -> u64 {
    env::var("BATCH")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1_000)
}

fn bench_dispatch(c: &mut Criterion) {
    let batch = batch_size();

    let mut group = c.benchmark_group("dispatch");
    group.measurement_time(Duration::from_secs(10));
    group.warm_up_time(Duration::from_millis(1200));

    // 1) Raw switch cost: one fiber yielding back to `call`.
    {
        group.throughput(Throughput::Elements(1));
        let mut fiber = Fiber::new(|| {
            loop {
                yield_now();
            }
        });
        group.bench_function("call_yield", |b| {
            b.iter(|| fiber.call().unwrap());
        });
    }

    // 2) Schedule a batch of callables and drain it, one thread and four.
    for (threads, use_caller) in [(1, true), (4, true)] {
        let pool = WorkerPool::new(threads, use_caller).unwrap();
        let ctr = Arc::new(AtomicU64::new(0));
        group.throughput(Throughput::Elements(batch));
        group.bench_function(BenchmarkId::new("schedule_batch", format!("t{threads}")), |b| {
            b.iter(|| {
                for _ in 0..batch {
                    let ctr = Arc::clone(&ctr);
                    pool.schedule(move || {
                        ctr.fetch_add(1, Ordering::Relaxed);
                    });
                }
                pool.dispatch();
            });
        });
    }

    // 3) Yield ping-pong through the ready queue.
    {
        let pool = WorkerPool::new(1, true).unwrap();
        let rounds = batch / 2;
        group.throughput(Throughput::Elements(rounds * 2));
        group.bench_function("yield_pingpong", |b| {
            b.iter(|| {
                for _ in 0..2 {
                    pool.schedule(move || {
                        for _ in 0..rounds {
                            yield_now();
                        }
                    });
                }
                pool.dispatch();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_dispatch);
criterion_main!(benches);
