//! # Framing Benchmark
//!
//! Run with: `cargo bench --package nfw_networking`

// Benchmarks don't need docs
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nfw_core::ByteStream;
use nfw_networking::{packet_payload, Packetizer, WritePacket};

struct PlayerMove {
    entity: u32,
    position: [f32; 3],
    name: &'static str,
}

impl WritePacket for PlayerMove {
    fn write(&self, stream: &mut ByteStream<'_>) {
        stream.write(self.entity);
        stream.write(self.position);
        stream.write_str(self.name);
    }
}

/// Benchmark: serializing one typed packet into a frame.
fn bench_serialize(c: &mut Criterion) {
    let packet = PlayerMove {
        entity: 42,
        position: [1.0, 2.0, 3.0],
        name: "player-one",
    };
    c.bench_function("serialize_player_move", |b| {
        b.iter(|| black_box(packet_payload(black_box(&packet))));
    });
}

/// Benchmark: extracting frames from a buffer delivered in chunks.
fn bench_extract(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract");

    for body_size in [16usize, 256, 4096] {
        let body = vec![0xA5u8; body_size];
        let frame = packet_payload(&body[..]);
        let bytes: Vec<u8> = std::iter::repeat(frame.iter().copied()).take(64).flatten().collect();

        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(body_size), &bytes, |b, bytes| {
            b.iter(|| {
                let mut packetizer = Packetizer::new(64 * 1024);
                let mut count = 0usize;
                for chunk in bytes.chunks(1500) {
                    packetizer.write(chunk);
                    while packetizer.next_range().is_some() {
                        count += 1;
                    }
                    packetizer.clean();
                }
                black_box(count)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_serialize, bench_extract);
criterion_main!(benches);
