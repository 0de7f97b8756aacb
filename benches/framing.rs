// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Benchmarks for newline-delimited JSON framing.
//!
//! Run with: `cargo bench --bench framing`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

use agentvisor::rpc::FrameReader;

fn response_stream(count: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for id in 0..count {
        out.extend_from_slice(
            format!(
                "{{\"jsonrpc\":\"2.0\",\"id\":{},\"result\":{{\"content\":[{{\"type\":\"text\",\"text\":\"line {}\"}}]}}}}\n",
                id, id
            )
            .as_bytes(),
        );
    }
    out
}

/// Whole messages arriving in one read.
fn bench_aligned_chunks(c: &mut Criterion) {
    let mut group = c.benchmark_group("framing_aligned");

    for count in [1usize, 16, 256] {
        let data = response_stream(count);
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &data, |b, data| {
            b.iter(|| {
                let mut reader = FrameReader::new();
                black_box(reader.feed(black_box(data)))
            });
        });
    }

    group.finish();
}

/// Messages split across small pipe reads.
fn bench_split_chunks(c: &mut Criterion) {
    let data = response_stream(256);
    let mut group = c.benchmark_group("framing_split");
    group.throughput(Throughput::Bytes(data.len() as u64));

    for chunk in [7usize, 64, 8192] {
        group.bench_with_input(BenchmarkId::from_parameter(chunk), &chunk, |b, &chunk| {
            b.iter(|| {
                let mut reader = FrameReader::new();
                let mut frames = 0;
                for piece in data.chunks(chunk) {
                    frames += reader.feed(black_box(piece)).len();
                }
                black_box(frames)
            });
        });
    }

    group.finish();
}

/// Non-JSON noise interleaved with protocol traffic.
fn bench_noisy_stream(c: &mut Criterion) {
    let mut data = Vec::new();
    for id in 0..128 {
        data.extend_from_slice(b"npm WARN deprecated package@1.0.0\n");
        data.extend_from_slice(format!("{{\"jsonrpc\":\"2.0\",\"id\":{},\"result\":{{}}}}\n", id).as_bytes());
    }

    let mut group = c.benchmark_group("framing_noisy");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("interleaved_logs", |b| {
        b.iter(|| {
            let mut reader = FrameReader::new();
            black_box(reader.feed(black_box(&data)))
        });
    });
    group.finish();
}

criterion_group!(benches, bench_aligned_chunks, bench_split_chunks, bench_noisy_stream);
criterion_main!(benches);
