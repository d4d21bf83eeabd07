//! Throughput Benchmark for CinderKV
//!
//! Measures the storage engine under simple read/write workloads, plus the
//! RESP codec on command-sized frames.

use bytes::Bytes;
use cinderkv::protocol::{parse_message, RespValue};
use cinderkv::storage::Store;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;

/// Benchmark SET operations
fn bench_set(c: &mut Criterion) {
    let store = Arc::new(Store::new());

    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_small", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            store.set(key, Bytes::from("small_value"));
            i += 1;
        });
    });

    group.bench_function("set_medium", |b| {
        let mut i = 0u64;
        let value = Bytes::from("x".repeat(1024)); // 1KB value
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            store.set(key, value.clone());
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark GET operations
fn bench_get(c: &mut Criterion) {
    let store = Arc::new(Store::new());

    // Pre-populate with data
    for i in 0..100_000 {
        let key = Bytes::from(format!("key:{}", i));
        let value = Bytes::from(format!("value:{}", i));
        store.set(key, value);
    }

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 100_000);
            black_box(store.get(key.as_bytes()));
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("missing:{}", i);
            black_box(store.get(key.as_bytes()));
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark RESP encode/decode of a typical SET frame
fn bench_codec(c: &mut Criterion) {
    let frame = RespValue::command(
        "SET",
        &[Bytes::from("user:1000"), Bytes::from("x".repeat(64))],
    );
    let encoded = frame.serialize();

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Bytes(encoded.len() as u64));

    group.bench_function("encode_set", |b| {
        let mut buf = Vec::with_capacity(encoded.len());
        b.iter(|| {
            buf.clear();
            frame.serialize_into(&mut buf);
            black_box(buf.len());
        });
    });

    group.bench_function("decode_set", |b| {
        b.iter(|| {
            black_box(parse_message(&encoded).unwrap());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_set, bench_get, bench_codec);
criterion_main!(benches);
