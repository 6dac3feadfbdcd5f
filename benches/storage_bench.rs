//! Benchmarks for offsetstore operations

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use offsetstore::{Config, Document, OffsetIndex};
use tempfile::TempDir;

fn open_index(dir: &TempDir) -> OffsetIndex {
    let config = Config::builder().data_dir(dir.path()).build();
    OffsetIndex::open(config).unwrap()
}

fn document(id: u64) -> Document {
    Document::new(id)
        .with("name", format!("user-{}", id))
        .with("score", id as i64)
        .with("active", id % 2 == 0)
}

fn storage_benchmarks(c: &mut Criterion) {
    c.bench_function("put", |b| {
        let dir = TempDir::new().unwrap();
        let index = open_index(&dir);
        let mut id = 0u64;
        b.iter(|| {
            id += 1;
            index.put(1, &document(id)).unwrap();
        });
    });

    c.bench_function("get_durable", |b| {
        let dir = TempDir::new().unwrap();
        let index = open_index(&dir);
        for id in 0..1000 {
            index.put(1, &document(id)).unwrap();
        }
        index.flush(1).unwrap();

        let mut id = 0u64;
        b.iter(|| {
            id = (id + 1) % 1000;
            let key = index.record_key::<Document>(id).unwrap();
            index.get::<Document>(key).unwrap()
        });
    });

    c.bench_function("put_then_get_unflushed", |b| {
        let dir = TempDir::new().unwrap();
        let index = open_index(&dir);
        let mut id = 0u64;
        b.iter(|| {
            id += 1;
            index.put(1, &document(id)).unwrap();
            let key = index.record_key::<Document>(id).unwrap();
            index.get::<Document>(key).unwrap()
        });
    });

    c.bench_function("flush_100", |b| {
        let dir = TempDir::new().unwrap();
        let index = open_index(&dir);
        let mut txn = 0u64;
        b.iter_batched(
            || {
                txn += 1;
                for id in 0..100 {
                    index.put(txn, &document(id)).unwrap();
                }
                txn
            },
            |txn| index.flush(txn).unwrap(),
            BatchSize::PerIteration,
        );
    });
}

criterion_group!(benches, storage_benchmarks);
criterion_main!(benches);
