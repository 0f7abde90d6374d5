//! Performance benchmarks for stratus-files.
//!
//! Run with: `cargo bench -p stratus-files`
//!
//! Covers slicing-by-8 CRC64 throughput and the cost of combining part
//! checksums, which should stay flat as part length grows.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rand::RngCore;
use stratus_files::crc64::{calc, combine};
use stratus_files::planner::plan;

fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    data
}

fn bench_crc64_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("crc64_calc");

    for size in [4 * 1024, 256 * 1024, 4 * 1024 * 1024] {
        let data = random_bytes(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| black_box(calc(0, black_box(data))));
        });
    }

    group.finish();
}

fn bench_crc64_combine(c: &mut Criterion) {
    let mut group = c.benchmark_group("crc64_combine");
    let a = calc(0, b"left");
    let b = calc(0, b"right");

    for len in [1u64 << 10, 1 << 20, 1 << 30, 5 << 30] {
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |bench, &len| {
            bench.iter(|| black_box(combine(black_box(a), black_box(b), len)));
        });
    }

    group.finish();
}

fn bench_combine_all_parts(c: &mut Criterion) {
    // 10 000 parts of 8 MiB: the final verification of a ~80 GB upload
    let parts = plan(10_000 * 8 * 1024 * 1024, 8 * 1024 * 1024).unwrap();
    let part_crcs: Vec<(u64, u64)> = parts
        .iter()
        .map(|p| (u64::from(p.number).wrapping_mul(0x9E37_79B9_7F4A_7C15), p.range.len))
        .collect();

    c.bench_function("combine_10000_parts", |b| {
        b.iter(|| {
            let mut crc = 0u64;
            for &(part_crc, len) in &part_crcs {
                crc = combine(crc, part_crc, len);
            }
            black_box(crc)
        });
    });
}

criterion_group!(
    benches,
    bench_crc64_throughput,
    bench_crc64_combine,
    bench_combine_all_parts
);
criterion_main!(benches);
