//! Criterion micro-benchmarks for ring, queue and layout operations.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use hopring_core::{CompletionEntry, CqIndex, RingLayout, SubmissionEntry, UserData};
use hopring_ring::{completion_queue, ring, submission_queue};

const BATCH: u32 = 256;

fn bench_ring_push_pop(c: &mut Criterion) {
    let (mut tx, mut rx) = ring::<u64>(1024).unwrap();
    let mut group = c.benchmark_group("ring");
    group.throughput(Throughput::Elements(u64::from(BATCH)));
    group.bench_function("push_pop_256", |b| {
        b.iter(|| {
            for i in 0..u64::from(BATCH) {
                tx.push(black_box(i));
            }
            while let Some(v) = rx.pop() {
                black_box(v);
            }
        });
    });
    group.finish();
}

fn bench_sq_allocate_submit(c: &mut Criterion) {
    let (mut sq, mut source) = submission_queue(1024).unwrap();
    let mut group = c.benchmark_group("submission_queue");
    group.throughput(Throughput::Elements(u64::from(BATCH)));
    group.bench_function("allocate_submit_consume_256", |b| {
        b.iter(|| {
            for i in 0..u64::from(BATCH) {
                if let Ok(sqe) = sq.allocate_entry() {
                    *sqe = SubmissionEntry::nop(UserData(i));
                }
            }
            black_box(sq.submit(BATCH));
            while let Some(sqe) = source.next_entry() {
                black_box(sqe);
            }
        });
    });
    group.finish();
}

fn bench_cq_post_pop(c: &mut Criterion) {
    let (mut sink, mut cq) = completion_queue(1024).unwrap();
    c.bench_function("completion_queue/post_pop_256", |b| {
        b.iter(|| {
            for i in 0..u64::from(BATCH) {
                sink.post(CompletionEntry::new(UserData(i), 0));
            }
            while let Some(cqe) = cq.try_pop() {
                black_box(cqe);
            }
        });
    });
}

fn bench_layout_encode(c: &mut Criterion) {
    let layout = RingLayout::new(64, &[128, 128]).unwrap();
    let mut region = vec![0u8; layout.region_size()];
    let sqe = SubmissionEntry::nop(UserData(7)).with_target(CqIndex(1));
    let cqe = CompletionEntry::new(UserData(7), 0);
    c.bench_function("layout/sqe_cqe_round_trip", |b| {
        b.iter(|| {
            layout.write_sqe(&mut region, 3, &sqe).unwrap();
            layout
                .write_cqe(&mut region, CqIndex(1), 5, &cqe)
                .unwrap();
            black_box(layout.read_sqe(&region, 3).unwrap());
            black_box(layout.read_cqe(&region, CqIndex(1), 5).unwrap());
        });
    });
}

criterion_group!(
    benches,
    bench_ring_push_pop,
    bench_sq_allocate_submit,
    bench_cq_post_pop,
    bench_layout_encode
);
criterion_main!(benches);
