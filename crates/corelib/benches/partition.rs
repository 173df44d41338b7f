//! Benchmarks for the routing hot path: key digest and partition lookup.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use corelib::{Key, Partition, PartitionMap, PARTITIONS};

fn bench_key_digest(c: &mut Criterion) {
    c.bench_function("key_digest_string", |b| {
        b.iter(|| Key::new("test", "users", black_box("user:1234567")))
    });
    c.bench_function("key_digest_int", |b| {
        b.iter(|| Key::new("test", "users", black_box(1234567i64)))
    });
}

fn bench_master_lookup(c: &mut Criterion) {
    let owners: Vec<Arc<String>> = (0..8).map(|i| Arc::new(format!("node-{i}"))).collect();
    let mut map = PartitionMap::new();
    for pid in 0..PARTITIONS {
        map.set("test", 0, pid, Arc::clone(&owners[pid % owners.len()]));
        map.set("test", 1, pid, Arc::clone(&owners[(pid + 1) % owners.len()]));
    }
    let partition = Key::new("test", "users", "user:1").partition();

    c.bench_function("partition_map_master", |b| {
        b.iter(|| map.master(black_box(&partition)).cloned())
    });
    c.bench_function("partition_map_clone", |b| b.iter(|| black_box(map.clone())));
    c.bench_function("partition_new", |b| {
        b.iter(|| Partition::new(black_box("test"), black_box(17)))
    });
}

criterion_group!(benches, bench_key_digest, bench_master_lookup);
criterion_main!(benches);
