//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
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

//! Filter chain throughput
//!
//! Measures bytes per second through:
//! - Message filters (encode and decode of one framed message)
//! - A stateful zlib stream shared by consecutive messages

use chainrpc::buffer::{ByteBuffer, copy_buffers};
use chainrpc::filter::{FilterId, FilterRegistry, filter_data, unfilter_data};
use chainrpc::framing::{decode_message, encode_message};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

const SIZES: [usize; 3] = [1024, 16 * 1024, 256 * 1024];

/// Semi-compressible payload.
fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i / 7) % 64) as u8 + b' ').collect()
}

fn bench_message_filters(c: &mut Criterion) {
    let registry = FilterRegistry::with_defaults();
    let mut group = c.benchmark_group("message_filters");

    for (name, ids) in [
        ("none", vec![]),
        ("xor", vec![FilterId::Xor]),
        ("zlib", vec![FilterId::ZlibStateless]),
        ("zlib_xor", vec![FilterId::ZlibStateless, FilterId::Xor]),
    ] {
        for size in SIZES {
            let data = ByteBuffer::from(payload(size));
            let mut encoder = registry.create_chain(&ids).unwrap();
            let mut decoder = registry.create_chain(&ids).unwrap();

            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(BenchmarkId::new(name, size), &data, |b, data| {
                b.iter(|| {
                    let frame = encode_message(vec![data.clone()], &mut encoder).unwrap();
                    let frame = ByteBuffer::from(copy_buffers(&frame));
                    black_box(decode_message(frame, &mut decoder).unwrap())
                });
            });
        }
    }
    group.finish();
}

fn bench_stateful_stream(c: &mut Criterion) {
    let registry = FilterRegistry::with_defaults();
    let mut group = c.benchmark_group("stateful_zlib");

    for size in SIZES {
        let data = ByteBuffer::from(payload(size));
        let mut encoder = registry.create_chain(&[FilterId::ZlibStateful]).unwrap();
        let mut decoder = registry.create_chain(&[FilterId::ZlibStateful]).unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| {
                let filtered = filter_data(std::slice::from_ref(data), &mut encoder).unwrap();
                let wire = ByteBuffer::from(copy_buffers(&filtered));
                black_box(unfilter_data(wire, data.len(), &mut decoder).unwrap())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_message_filters, bench_stateful_stream);
criterion_main!(benches);
