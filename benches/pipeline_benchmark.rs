//! Pipeline throughput benchmarks
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::fs::File;
use std::io::Write;
use tempfile::TempDir;
use transfer_engine::config::{PipelineConfig, PoolConfig};
use transfer_engine::core::{LocalTransfer, TransferOptions, WorkerPool};
use transfer_engine::event::EventLoop;
use transfer_engine::io::{Direction, Pipeline, ReadStatus};

/// Create a test file of the specified size
fn create_test_file(dir: &std::path::Path, name: &str, size: usize) -> std::path::PathBuf {
    let path = dir.join(name);
    let mut file = File::create(&path).unwrap();

    let chunk_size = 64 * 1024;
    let chunk: Vec<u8> = (0..chunk_size).map(|i| (i % 256) as u8).collect();
    let mut remaining = size;

    while remaining > 0 {
        let to_write = remaining.min(chunk_size);
        file.write_all(&chunk[..to_write]).unwrap();
        remaining -= to_write;
    }

    path
}

fn bench_read_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_pipeline");
    let dir = TempDir::new().unwrap();
    let size = 16 * 1024 * 1024;
    let path = create_test_file(dir.path(), "source.bin", size);
    let pool = WorkerPool::new(&PoolConfig { max_threads: 2 }).unwrap();

    group.throughput(Throughput::Bytes(size as u64));
    for slot_size in [64 * 1024, 256 * 1024, 1024 * 1024] {
        let config = PipelineConfig::new(8, slot_size);
        group.bench_with_input(
            BenchmarkId::new(
                "slot",
                humansize::format_size(slot_size as u64, humansize::BINARY),
            ),
            &config,
            |b, config| {
                b.iter(|| {
                    let file = File::open(&path).unwrap();
                    let mut pipeline =
                        Pipeline::create(&pool, file, Direction::Read, false, config).unwrap();
                    let mut total = 0;
                    loop {
                        match pipeline.next_read_buffer() {
                            ReadStatus::Ready { len, .. } => total += len,
                            ReadStatus::WouldBlock => std::thread::yield_now(),
                            ReadStatus::Eof => break,
                            ReadStatus::Error => panic!("{:?}", pipeline.last_error()),
                        }
                    }
                    black_box(total)
                });
            },
        );
    }

    group.finish();
}

fn bench_local_transfer(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_transfer");
    let dir = TempDir::new().unwrap();
    let event_loop = EventLoop::new().unwrap();
    let pool = WorkerPool::new(&PoolConfig { max_threads: 4 }).unwrap();

    for size in [1024 * 1024, 16 * 1024 * 1024] {
        let source = create_test_file(dir.path(), "transfer.bin", size);
        let destination = dir.path().join("transfer_copy.bin");

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(
            BenchmarkId::new(
                "copy",
                humansize::format_size(size as u64, humansize::BINARY),
            ),
            &size,
            |b, _| {
                b.iter(|| {
                    let (handler, done) = LocalTransfer::start(
                        &event_loop,
                        &pool,
                        &source,
                        &destination,
                        &TransferOptions::default(),
                        &PipelineConfig::default(),
                        None,
                    )
                    .unwrap();
                    let summary = done.recv().unwrap().unwrap();
                    handler.remove();
                    black_box(summary.bytes_written)
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_read_pipeline, bench_local_transfer);
criterion_main!(benches);
