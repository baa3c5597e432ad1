//! Cross-module RESP properties from spec.md §8: encode/decode round-trip,
//! incremental-parse equivalence, and exact size accounting, driven across
//! a handful of representative packets rather than an exhaustive grid.

use std::sync::Arc;

use bytes::Bytes;
use slotwire::codec::resp::RespCodec;
use slotwire::codec::{Dialect, Progress, ProtocolOptions};
use slotwire::{ByteBuffer, Packet};

fn codec(dialect: Dialect) -> RespCodec {
    RespCodec::new(dialect, Arc::new(ProtocolOptions::default()))
}

fn sample_packets() -> Vec<Packet> {
    vec![
        Packet::SimpleString("OK".into()),
        Packet::Error("ERR wrong type".into()),
        Packet::Integer(-42),
        Packet::bulk(Bytes::from_static(b"hello")),
        Packet::null_bulk(),
        Packet::Array(Some(vec![Packet::Integer(1), Packet::Integer(2)])),
        Packet::Array(None),
        Packet::Double(3.5),
        Packet::Boolean(true),
        Packet::Boolean(false),
        Packet::BigNumber("123456789012345678901234567890".into()),
        Packet::VerbatimString {
            tag: "txt".into(),
            body: Bytes::from_static(b"plain text"),
        },
        Packet::Map(vec![(Packet::bulk(Bytes::from_static(b"k")), Packet::Integer(1))]),
        Packet::Set(vec![Packet::Integer(1), Packet::Integer(2)]),
        Packet::Push(vec![Packet::SimpleString("message".into())]),
    ]
}

#[test]
fn v3_round_trips_and_size_matches() {
    for p in sample_packets() {
        let mut buf = ByteBuffer::new();
        p.encode_v3(&mut buf);
        assert_eq!(buf.readable_bytes(), p.encoded_size_v3(), "{p:?}");

        let mut c = codec(Dialect::Resp3);
        match c.decode(&mut buf) {
            Progress::Done(decoded) => assert_eq!(decoded, p, "round-trip mismatch for {p:?}"),
            other => panic!("expected Done for {p:?}, got {other:?}"),
        }
        assert!(buf.is_empty());
    }
}

#[test]
fn v2_size_matches_encoded_length() {
    for p in sample_packets() {
        let mut buf = ByteBuffer::new();
        p.encode_v2(&mut buf);
        assert_eq!(buf.readable_bytes(), p.encoded_size_v2(), "{p:?}");
    }
}

#[test]
fn incremental_feed_matches_whole_buffer_for_every_sample() {
    for p in sample_packets() {
        let mut whole = ByteBuffer::new();
        p.encode_v3(&mut whole);
        let input = whole.data().to_vec();

        for split in 0..=input.len() {
            let mut c = codec(Dialect::Resp3);
            let mut buf = ByteBuffer::new();
            buf.append(&input[..split]);
            let first = c.decode(&mut buf);
            let result = if matches!(first, Progress::NeedMore) {
                buf.append(&input[split..]);
                c.decode(&mut buf)
            } else {
                buf.append(&input[split..]);
                first
            };
            match result {
                Progress::Done(decoded) => assert_eq!(decoded, p, "split {split} for {p:?}"),
                other => panic!("split {split} for {p:?}: expected Done, got {other:?}"),
            }
        }
    }
}

#[test]
fn request_encode_decode_round_trip() {
    let mut buf = ByteBuffer::new();
    RespCodec::encode_request(&mut buf, &["SET", "key", "value"]);
    let mut c = codec(Dialect::Resp2);
    match c.decode_request(&mut buf) {
        Progress::Done(argv) => {
            assert_eq!(
                argv,
                vec![
                    Bytes::from_static(b"SET"),
                    Bytes::from_static(b"key"),
                    Bytes::from_static(b"value"),
                ]
            );
        }
        other => panic!("unexpected {other:?}"),
    }
}
