use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde_json::{Value, json};

use roomsync::{
    core::{conflict::merge_values, queue::OfflineQueue},
    op::OperationDraft,
    persist::memory::MemoryKv,
    types::{OperationType, Priority},
};

fn draft(i: u64) -> OperationDraft {
    let priority = match i % 3 {
        0 => Priority::High,
        1 => Priority::Medium,
        _ => Priority::Low,
    };
    OperationDraft::new(
        OperationType::Update,
        "room-status",
        json!({ "room": i % 400, "status": "clean" }),
    )
    .with_priority(priority)
}

fn filled_queue(n: u64) -> OfflineQueue {
    let mut queue = OfflineQueue::open(Box::new(MemoryKv::new())).expect("open");
    for i in 0..n {
        queue.push_at(draft(i), i);
    }
    queue
}

fn bench_enqueue(c: &mut Criterion) {
    c.bench_function("queue_push_50k", |b| {
        b.iter(|| filled_queue(50_000));
    });
}

fn bench_persist(c: &mut Criterion) {
    c.bench_function("queue_persist_5k", |b| {
        let mut queue = filled_queue(5_000);
        b.iter(|| queue.persist().expect("persist"));
    });
}

fn bench_replay_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay_order");
    for n in [100u64, 1_000, 10_000] {
        let queue = filled_queue(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| queue.pending_in_replay_order());
        });
    }
    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let rows = |offset: u64| -> Value {
        Value::Array((0..1_000).map(|i| json!({ "id": i + offset, "floor": i % 10 })).collect())
    };
    let local = rows(0);
    let remote = rows(500);
    c.bench_function("merge_arrays_1k", |b| {
        b.iter(|| merge_values(&local, &remote));
    });
}

criterion_group!(benches, bench_enqueue, bench_persist, bench_replay_order, bench_merge);
criterion_main!(benches);
