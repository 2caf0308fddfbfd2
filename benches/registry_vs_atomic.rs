use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use conteggi::{Counters, CountersConfig};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

const NUM_THREADS: usize = 8;
const ITERATIONS_PER_THREAD: usize = 1_000_000;

fn bench_increment(c: &mut Criterion) {
    let mut group = c.benchmark_group("counter_increment");

    group.bench_function(
        BenchmarkId::new(
            "Counters (dynamic slots)",
            format!("{}threads x {}iter", NUM_THREADS, ITERATIONS_PER_THREAD),
        ),
        |b| {
            b.iter(|| {
                let counters = Counters::with_config(CountersConfig::new(16, 1, false));
                let requests = counters.register("requests");
                counters.reserve_dynamic(NUM_THREADS);
                let mut handles = vec![];

                for _ in 0..NUM_THREADS {
                    let counters = counters.clone();
                    let handle = thread::spawn(move || {
                        let slot = counters.acquire_dynamic();
                        for _ in 0..ITERATIONS_PER_THREAD {
                            counters.increment(requests);
                        }
                        counters.release_dynamic(slot);
                    });
                    handles.push(handle);
                }

                for handle in handles {
                    handle.join().unwrap();
                }

                black_box(counters.get(requests))
            })
        },
    );

    group.bench_function(
        BenchmarkId::new(
            "Counters (shared block)",
            format!("{}threads x {}iter", NUM_THREADS, ITERATIONS_PER_THREAD),
        ),
        |b| {
            b.iter(|| {
                let counters = Counters::with_config(CountersConfig::new(16, 1, true));
                let requests = counters.register("requests");
                let mut handles = vec![];

                for _ in 0..NUM_THREADS {
                    let counters = counters.clone();
                    let handle = thread::spawn(move || {
                        for _ in 0..ITERATIONS_PER_THREAD {
                            counters.increment(requests);
                        }
                    });
                    handles.push(handle);
                }

                for handle in handles {
                    handle.join().unwrap();
                }

                black_box(counters.get(requests))
            })
        },
    );

    group.bench_function(
        BenchmarkId::new(
            "AtomicU64 (single)",
            format!("{}threads x {}iter", NUM_THREADS, ITERATIONS_PER_THREAD),
        ),
        |b| {
            b.iter(|| {
                let counter = Arc::new(AtomicU64::new(0));
                let mut handles = vec![];

                for _ in 0..NUM_THREADS {
                    let counter_clone = Arc::clone(&counter);
                    let handle = thread::spawn(move || {
                        for _ in 0..ITERATIONS_PER_THREAD {
                            counter_clone.fetch_add(1, Ordering::Relaxed);
                        }
                    });
                    handles.push(handle);
                }

                for handle in handles {
                    handle.join().unwrap();
                }

                black_box(counter.load(Ordering::Relaxed))
            })
        },
    );

    group.finish();
}

criterion_group!(benches, bench_increment);
criterion_main!(benches);
