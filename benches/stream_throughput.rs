//! Stream throughput benchmarks
//!
//! This benchmark suite measures:
//! - Frame encoding
//! - Write-half framing against a large peer window
//! - Read-half receive and drain
//! - Receive credit coalescing
//! - A full request/response over framed connections
//!
//! Run with: cargo bench --bench stream_throughput

use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use h2stream::http::h2::{
    codec::FrameCodec,
    flow_control::ReceiveCredit,
    frames::{DataFrame, FrameFlags, FrameType},
    Connection, ErrorCode, FramedConnectionBuilder, Result, Stream, StreamId, StreamSettings,
};
use h2stream::http::Headers;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

/// Connection that accepts and drops everything
struct NullConnection {
    window: u64,
}

impl Connection for NullConnection {
    fn is_client(&self) -> bool {
        true
    }

    fn peer_write_window_size(&self) -> u64 {
        self.window
    }

    fn local_read_window_size(&self) -> u64 {
        self.window
    }

    fn write_data(&self, _stream_id: StreamId, _end_stream: bool, data: Bytes) -> Result<()> {
        black_box(data);
        Ok(())
    }

    fn write_headers(&self, _stream_id: StreamId, _end_stream: bool, _headers: &Headers) -> Result<()> {
        Ok(())
    }

    fn write_stream_reset(&self, _stream_id: StreamId, _code: ErrorCode) -> Result<()> {
        Ok(())
    }

    fn write_stream_reset_async(&self, _stream_id: StreamId, _code: ErrorCode) {}

    fn write_window_update_async(&self, _stream_id: StreamId, delta: u64) {
        black_box(delta);
    }

    fn remove_stream(&self, _stream_id: StreamId) {}

    fn update_connection_flow_control(&self, byte_count: u64) {
        black_box(byte_count);
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn schedule_degraded_liveness_probe(&self) {}
}

fn null_stream(window: u64) -> Stream<NullConnection> {
    Stream::new(
        1,
        Arc::new(NullConnection { window }),
        false,
        false,
        None,
        &StreamSettings::default(),
    )
    .unwrap()
}

// ========== Frame Encoding ==========

fn bench_frame_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encoding");

    group.bench_function("encode_data_header", |b| {
        b.iter(|| {
            black_box(FrameCodec::encode_header(
                black_box(FrameType::Data),
                black_box(FrameFlags::from_u8(FrameFlags::END_STREAM)),
                black_box(1),
                black_box(16384),
            ))
        });
    });

    let payload = Bytes::from(vec![0u8; 16384]);
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("encode_data_frame_16k", |b| {
        b.iter(|| {
            let frame = DataFrame::new(1, payload.clone(), false);
            black_box(FrameCodec::encode_data_frame(&frame))
        });
    });

    group.finish();
}

// ========== Write Half ==========

fn bench_sink_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("sink_write");

    for size in [64 * 1024usize, 1024 * 1024] {
        let chunk = vec![0xA5u8; 8192];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let stream = null_stream(u64::MAX / 2);
                let sink = stream.sink().unwrap();
                let mut written = 0;
                while written < size {
                    sink.write(&chunk).unwrap();
                    written += chunk.len();
                }
                sink.close().unwrap();
            });
        });
    }

    group.finish();
}

// ========== Read Half ==========

fn bench_source_receive_and_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("source_receive_read");

    for size in [16 * 1024usize, 256 * 1024] {
        let payload = vec![0x5Au8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| {
                let stream = null_stream(payload.len() as u64);
                stream.receive_data(payload).unwrap();
                stream.receive_end_of_stream();

                let mut sink = BytesMut::with_capacity(payload.len());
                while let Some(n) = stream.source().read_into(&mut sink, 8192).unwrap() {
                    black_box(n);
                }
                black_box(sink.len())
            });
        });
    }

    group.finish();
}

// ========== Flow Control ==========

fn bench_receive_credit(c: &mut Criterion) {
    c.bench_function("receive_credit_consume_1k", |b| {
        b.iter(|| {
            let mut credit = ReceiveCredit::new(65535, 2);
            let mut updates = 0u64;
            for _ in 0..1000 {
                credit.consume(black_box(1024));
                if let Some(delta) = credit.take_update() {
                    updates += delta;
                }
            }
            black_box(updates)
        });
    });
}

// ========== Framed Connection ==========

fn bench_request_response(c: &mut Criterion) {
    let request = Headers::new()
        .with(":method", "GET")
        .with(":scheme", "https")
        .with(":path", "/bench");
    let response = Headers::new().with(":status", "200");
    let body = vec![7u8; 4096];

    c.bench_function("framed_request_response_4k", |b| {
        b.iter(|| {
            let client = FramedConnectionBuilder::new().build(Vec::new()).unwrap();
            let server = FramedConnectionBuilder::new().client(false).build(Vec::new()).unwrap();

            let stream = client.new_stream(&request, true).unwrap();
            let mut wire = &client.take_output()[..];
            while !wire.is_empty() {
                server.receive_frame(FrameCodec::read_frame(&mut wire, 16384).unwrap()).unwrap();
            }

            let exchange = server.accept().unwrap();
            exchange.write_headers(&response, false, false).unwrap();
            let sink = exchange.sink().unwrap();
            sink.write(&body).unwrap();
            sink.close().unwrap();

            let output = server.take_output();
            let mut wire = &output[..];
            while !wire.is_empty() {
                client.receive_frame(FrameCodec::read_frame(&mut wire, 16384).unwrap()).unwrap();
            }

            let mut received = Vec::new();
            stream.source().read_to_end(&mut received).unwrap();
            black_box(received.len())
        });
    });
}

criterion_group! {
    name = framing;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(10))
        .sample_size(500);
    targets =
        bench_frame_encoding,
        bench_sink_write,
        bench_source_receive_and_read,
        bench_receive_credit
}

criterion_group! {
    name = integration;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(10))
        .sample_size(200);
    targets = bench_request_response
}

criterion_main!(framing, integration);
