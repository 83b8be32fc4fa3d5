//! Benchmark suite for store operations

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use quadstore::{Store, StoreManager, Triple, TriplePattern, TripleStore};
use tempfile::TempDir;

fn triple(i: usize) -> Triple {
    Triple::new(
        format!("http://example.org/person/{}", i % 1000),
        format!("http://example.org/vocab#rel{}", i % 10),
        format!("http://example.org/person/{}", (i * 7 + 1) % 1000),
    )
    .in_graph(format!("http://example.org/graph/{}", i % 4))
}

fn create_test_store(triple_count: usize) -> (TempDir, Store) {
    let dir = TempDir::new().unwrap();
    let mut store = StoreManager::default().create_store(dir.path()).unwrap();
    for i in 0..triple_count {
        store.insert_triple(&triple(i)).unwrap();
    }
    store.commit(1).unwrap();
    (dir, store)
}

fn bench_insert_and_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_and_commit");

    for size in [100, 1000, 10000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let dir = TempDir::new().unwrap();
                let mut store = StoreManager::default().create_store(dir.path()).unwrap();
                for i in 0..size {
                    store.insert_triple(black_box(&triple(i))).unwrap();
                }
                store.commit(1).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_match_patterns(c: &mut Criterion) {
    let (_dir, store) = create_test_store(10000);
    let mut group = c.benchmark_group("match");

    let patterns = [
        ("s__", TriplePattern::any().subject("http://example.org/person/42")),
        ("_p_", TriplePattern::any().predicate("http://example.org/vocab#rel3")),
        ("__o", TriplePattern::any().object_uri("http://example.org/person/295")),
        (
            "sp_",
            TriplePattern::any()
                .subject("http://example.org/person/42")
                .predicate("http://example.org/vocab#rel2"),
        ),
    ];
    for (name, pattern) in patterns {
        group.bench_function(name, |b| {
            b.iter(|| store.match_triples(black_box(&pattern)).unwrap());
        });
    }

    group.finish();
}

fn bench_reopen(c: &mut Criterion) {
    let (dir, store) = create_test_store(10000);
    drop(store);

    c.bench_function("open_store", |b| {
        b.iter(|| StoreManager::default().open_store(dir.path(), true).unwrap());
    });
}

fn bench_consolidate(c: &mut Criterion) {
    c.bench_function("consolidate_1000x5_commits", |b| {
        b.iter(|| {
            let dir = TempDir::new().unwrap();
            let mut store = StoreManager::default().create_store(dir.path()).unwrap();
            for job in 0..5 {
                for i in 0..1000 {
                    store.insert_triple(&triple(job * 1000 + i)).unwrap();
                }
                store.commit(job as u128 + 1).unwrap();
            }
            store.consolidate(99).unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_insert_and_commit,
    bench_match_patterns,
    bench_reopen,
    bench_consolidate
);
criterion_main!(benches);
