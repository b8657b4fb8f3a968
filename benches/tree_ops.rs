//! Benchmarks for archive file system tree operations

use archivefs::{ArchiveFileSystem, BasicEntry, BasicEntryFactory, EntryType, MknodOptions};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

fn entries(count: usize) -> Vec<BasicEntry> {
    (0..count)
        .map(|i| BasicEntry::file(format!("dir{}/sub{}/file{}.txt", i % 10, i % 100, i)))
        .collect()
}

fn benchmark_bulk_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_from_entries");

    for size in [100, 1000, 10000].iter() {
        let input = entries(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let fs = ArchiveFileSystem::from_entries(
                    Arc::new(BasicEntryFactory),
                    input.clone(),
                    None,
                    false,
                )
                .unwrap();
                black_box(fs.len());
            });
        });
    }

    group.finish();
}

fn benchmark_link(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_link");
    let options = MknodOptions::new().create_parents(true);

    for depth in [1, 4, 16].iter() {
        let path = format!(
            "/{}/leaf",
            (0..*depth).map(|i| format!("d{}", i)).collect::<Vec<_>>().join("/")
        );
        group.bench_with_input(BenchmarkId::from_parameter(depth), depth, |b, _| {
            b.iter(|| {
                let mut fs = ArchiveFileSystem::new_empty(Arc::new(BasicEntryFactory)).unwrap();
                fs.mknod(black_box(&path), EntryType::File, options, None)
                    .unwrap()
                    .run()
                    .unwrap();
            });
        });
    }

    group.finish();
}

fn benchmark_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_lookup");

    for size in [1000, 10000].iter() {
        let fs =
            ArchiveFileSystem::from_entries(Arc::new(BasicEntryFactory), entries(*size), None, false)
                .unwrap();
        group.bench_with_input(BenchmarkId::new("hit", size), size, |b, _| {
            b.iter(|| black_box(fs.entry(black_box("/dir3/sub43/file543.txt"))));
        });
        group.bench_with_input(BenchmarkId::new("miss", size), size, |b, _| {
            b.iter(|| black_box(fs.entry(black_box("/no/such/entry"))));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_bulk_construction,
    benchmark_link,
    benchmark_lookup
);
criterion_main!(benches);
