//! Codec benchmarks for watch-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use watch_protocol::{codec, Message, VideoState};

fn state_change() -> Message {
    Message::video_state("5c1e0a9b7d2f4e61", VideoState::new(1234.567, false))
}

fn bench_encode_state_change(c: &mut Criterion) {
    let message = state_change();
    let encoded_len = codec::encode(&message).unwrap().len();

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(encoded_len as u64));
    group.bench_function("video_state_change", |b| {
        b.iter(|| codec::encode(black_box(&message)))
    });
    group.finish();
}

fn bench_decode_state_change(c: &mut Criterion) {
    let encoded = codec::encode(&state_change()).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("video_state_change", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
    group.finish();
}

fn bench_decode_keepalive(c: &mut Criterion) {
    let encoded = codec::encode(&Message::ping()).unwrap();

    c.bench_function("decode_keepalive", |b| {
        b.iter(|| codec::decode(black_box(&encoded)).unwrap())
    });
}

criterion_group!(
    benches,
    bench_encode_state_change,
    bench_decode_state_change,
    bench_decode_keepalive
);
criterion_main!(benches);
