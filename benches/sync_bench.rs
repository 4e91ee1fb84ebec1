//! 目录扫描与整树同步的基准

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use treesync_lib::core::{FileScanner, RunStats, ScanConfig};
use treesync_lib::{SyncConfig, SyncEngine};

const FILE_SIZE: usize = 16 * 1024;

fn create_tree(files: usize) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..files {
        let path = dir.path().join(format!("d{:02}/f{:05}.bin", i % 32, i));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let content: Vec<u8> = (0..FILE_SIZE).map(|j| ((i + j) % 251) as u8).collect();
        fs::write(&path, content).unwrap();
    }
    dir
}

fn scan(root: &Path, compute_checksums: bool) -> usize {
    let scanner = FileScanner::new(ScanConfig {
        compute_checksums,
        ..Default::default()
    });
    scanner.scan(root, &RunStats::new()).unwrap().len()
}

fn scan_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");
    for files in [256, 1024] {
        let tree = create_tree(files);
        group.throughput(Throughput::Bytes((files * FILE_SIZE) as u64));

        group.bench_with_input(BenchmarkId::new("metadata", files), tree.path(), |b, root| {
            b.iter(|| black_box(scan(root, false)));
        });
        group.bench_with_input(BenchmarkId::new("checksum", files), tree.path(), |b, root| {
            b.iter(|| black_box(scan(root, true)));
        });
    }
    group.finish();
}

fn full_sync_benchmarks(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let source = create_tree(1024);

    let mut group = c.benchmark_group("full_sync");
    group.sample_size(10);
    for threads in [1, 4, 8] {
        group.bench_with_input(BenchmarkId::new("threads", threads), &threads, |b, &threads| {
            b.iter_batched(
                || tempfile::tempdir().unwrap(),
                |dest| {
                    let engine = SyncEngine::new(SyncConfig {
                        threads,
                        ..Default::default()
                    });
                    let report = runtime
                        .block_on(engine.sync(source.path(), dest.path()))
                        .unwrap();
                    black_box(report.stats.files_copied)
                },
                criterion::BatchSize::PerIteration,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, scan_benchmarks, full_sync_benchmarks);
criterion_main!(benches);
