use std::hint::black_box;
use std::time::{Duration, Instant};

use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use reactor_server::timer::TimerHeap;

const SIZES: [usize; 3] = [1_000, 10_000, 65_536];

fn filled(size: usize, base: Instant) -> TimerHeap<u64> {
    let mut timer = TimerHeap::with_capacity(size);
    for fd in 0..size {
        // spread deadlines so the heap is not already sorted
        let offset = (fd * 7919) % size;
        timer.add_at(fd as i32, base + Duration::from_micros(offset as u64), fd as u64);
    }
    timer
}

fn benchmark_refresh(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("timer_refresh");
    let base = Instant::now();

    for size in SIZES {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut timer = filled(size, base);
            let mut fd = 0;
            let mut tick = 0u64;
            b.iter(|| {
                fd = (fd + 1) % size;
                tick += 1;
                let _ = black_box(timer.refresh_at(fd as i32, base + Duration::from_micros(size as u64 + tick)));
            });
        });
    }

    group.finish();
}

fn benchmark_expire(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("timer_expire_all");
    let base = Instant::now();

    for size in SIZES {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched_ref(
                || filled(size, base),
                |timer| {
                    let mut expired = 0u64;
                    timer.expire_due(base + Duration::from_secs(1), |_, action| expired += action);
                    black_box(expired);
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn benchmark_add_remove(criterion: &mut Criterion) {
    let base = Instant::now();
    criterion.bench_function("timer_add_remove_10000", |b| {
        let mut timer = filled(10_000, base);
        b.iter(|| {
            timer.add_at(20_000, base, 0);
            black_box(timer.remove(20_000));
        });
    });
}

criterion_group!(timer, benchmark_refresh, benchmark_expire, benchmark_add_remove);
criterion_main!(timer);
