//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Benchmarks for message packing and unpacking

use bytes::BytesMut;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use kinx_codec::{FramePacker, Message, Packer, StreamPacker};
use std::hint::black_box;

// Benchmark packing messages of increasing size
fn bench_pack(c: &mut Criterion) {
    let mut group = c.benchmark_group("pack");
    let packer = FramePacker::new();

    for size in [0, 64, 1024, 65536].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let message = Message::new(1, vec![0x5a; size]);
            b.iter(|| black_box(packer.pack(black_box(&message)).unwrap()));
        });
    }
    group.finish();
}

// Benchmark peek-based decoding from a buffer
fn bench_frame_unpack(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_unpack");
    let packer = FramePacker::new();

    for size in [0, 64, 1024, 65536].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let wire = packer.pack(&Message::new(1, vec![0x5a; size])).unwrap();
            b.iter(|| {
                let mut buf = BytesMut::from(&wire[..]);
                black_box(packer.unpack(&mut buf).unwrap());
            });
        });
    }
    group.finish();
}

// Benchmark stream decoding from an in-memory reader
fn bench_stream_unpack(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_unpack");
    let packer = StreamPacker::new();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();

    for size in [0, 64, 1024, 65536].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let wire = packer.pack(&Message::new(1, vec![0x5a; size])).unwrap();
            b.to_async(&runtime).iter(|| async {
                let mut reader: &[u8] = &wire;
                black_box(packer.unpack(&mut reader).await.unwrap());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_pack, bench_frame_unpack, bench_stream_unpack);
criterion_main!(benches);
