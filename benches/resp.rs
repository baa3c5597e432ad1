use std::sync::Arc;

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use slotwire::codec::resp::RespCodec;
use slotwire::codec::{Dialect, Progress, ProtocolOptions};
use slotwire::packet::Packet;
use slotwire::ByteBuffer;

fn bench_resp_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("resp");
    group.bench_function("decode_1k_sets", |b| {
        let mut wire = ByteBuffer::new();
        for i in 0..1000 {
            let val = format!("val{i}");
            RespCodec::encode_request(&mut wire, &["SET", "key", val.as_str()]);
        }
        let frozen = wire.data().to_vec();
        b.iter(|| {
            let options = Arc::new(ProtocolOptions::default());
            let mut codec = RespCodec::new(Dialect::Resp3, options);
            let mut buf = ByteBuffer::new();
            buf.append(&frozen);
            let mut count = 0usize;
            loop {
                match codec.decode(&mut buf) {
                    Progress::Done(_) => count += 1,
                    Progress::NeedMore => break,
                    Progress::Failed(e) => panic!("decode failed: {e}"),
                }
            }
            black_box(count);
        });
    });
    group.finish();
}

fn bench_resp_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("resp");
    group.bench_function("encode_1k_bulk_arrays", |b| {
        let packet = Packet::Array(Some(vec![
            Packet::bulk(Bytes::from_static(b"SET")),
            Packet::bulk(Bytes::from_static(b"key")),
            Packet::bulk(Bytes::from_static(b"value")),
        ]));
        b.iter(|| {
            let mut buf = ByteBuffer::new();
            for _ in 0..1000 {
                packet.encode_v3(&mut buf);
            }
            black_box(buf.readable_bytes());
        });
    });
    group.finish();
}

criterion_group!(benches, bench_resp_decode, bench_resp_encode);
criterion_main!(benches);
