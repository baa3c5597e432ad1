//! Resumable RESP2/RESP3 codec atop the packet model.
//!
//! Decoding keeps the same discipline as the source: partially built
//! aggregates survive a `NeedMore` return as member state. Instead of a
//! recursive chain of `ArrayPacket` objects each holding their own
//! in-progress child, this keeps an explicit stack of open aggregate
//! frames plus one "pending scalar" slot for a bulk-like value whose
//! length is known but whose body hasn't fully arrived yet. Exactly one
//! scalar can be mid-flight at a time: whichever leaf the descent is
//! currently on.

use crate::buffer::ByteBuffer;
use crate::codec::{Dialect, Progress, ProtocolOptions, PROTO_RESP_INLINE_MAX_SIZE, PROTO_RESP_MBULK_BIG_ARG};
use crate::error::ProtocolError;
use crate::packet::{tag, Packet};
use bytes::Bytes;
use std::sync::Arc;

struct Agg {
    total: i64,
    items: Vec<Packet>,
}

struct PairAgg {
    total: i64,
    items: Vec<(Packet, Packet)>,
    key: Option<Packet>,
}

enum Frame {
    Array(Agg),
    Set(Agg),
    Push(Agg),
    Map(PairAgg),
    Attribute(PairAgg),
}

#[derive(Clone, Copy)]
enum PendingKind {
    Bulk,
    BlobError,
    Verbatim,
}

struct Pending {
    kind: PendingKind,
    len: usize,
}

enum OneStep {
    Value(Packet),
    NeedMore,
    Failed(ProtocolError),
}

/// A resumable RESP decoder/encoder bound to one connection's protocol
/// dialect and configured limits.
pub struct RespCodec {
    options: Arc<ProtocolOptions>,
    dialect: Dialect,
    stack: Vec<Frame>,
    pending: Option<Pending>,
}

impl RespCodec {
    pub fn new(dialect: Dialect, options: Arc<ProtocolOptions>) -> Self {
        RespCodec {
            options,
            dialect,
            stack: Vec::new(),
            pending: None,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn set_dialect(&mut self, dialect: Dialect) {
        self.dialect = dialect;
    }

    /// Decode one full reply packet, resuming any in-progress parse from
    /// the previous call.
    pub fn decode(&mut self, buf: &mut ByteBuffer) -> Progress<Packet> {
        loop {
            let value = match self.decode_one(buf) {
                OneStep::NeedMore => return Progress::NeedMore,
                OneStep::Failed(e) => {
                    self.stack.clear();
                    self.pending = None;
                    return Progress::Failed(e);
                }
                OneStep::Value(v) => v,
            };
            match self.attach(value) {
                Some(top) => return Progress::Done(top),
                None => continue,
            }
        }
    }

    fn attach(&mut self, mut value: Packet) -> Option<Packet> {
        loop {
            let done = match self.stack.last_mut() {
                None => return Some(value),
                Some(Frame::Array(a)) | Some(Frame::Set(a)) | Some(Frame::Push(a)) => {
                    a.items.push(value);
                    a.items.len() as i64 == a.total
                }
                Some(Frame::Map(m)) | Some(Frame::Attribute(m)) => {
                    if let Some(k) = m.key.take() {
                        m.items.push((k, value));
                        m.items.len() as i64 == m.total
                    } else {
                        m.key = Some(value);
                        return None;
                    }
                }
            };
            if !done {
                return None;
            }
            value = match self.stack.pop().unwrap() {
                Frame::Array(a) => Packet::Array(Some(a.items)),
                Frame::Set(a) => Packet::Set(a.items),
                Frame::Push(a) => Packet::Push(a.items),
                Frame::Map(m) => Packet::Map(m.items),
                Frame::Attribute(m) => Packet::Attribute(m.items),
            };
        }
    }

    fn decode_one(&mut self, buf: &mut ByteBuffer) -> OneStep {
        loop {
            if let Some(p) = self.pending.take() {
                match self.resume_scalar(p, buf) {
                    OneStep::NeedMore => return OneStep::NeedMore,
                    other => return other,
                }
            }
            if buf.is_empty() {
                return OneStep::NeedMore;
            }
            let first = buf.data()[0];
            if !self.dialect_allows(first) {
                log::trace!(
                    "RespCodec::decode_one: rejecting '{}' under {:?} dialect",
                    first as char,
                    self.dialect
                );
                return OneStep::Failed(ProtocolError::UnknownPacketType(first as char));
            }
            let crlf = match find_header_line(buf) {
                Ok(Some(p)) => p,
                Ok(None) => return OneStep::NeedMore,
                Err(e) => return OneStep::Failed(e),
            };

            match first {
                tag::SIMPLE_STRING => {
                    let text = String::from_utf8_lossy(&buf.data()[1..crlf]).into_owned();
                    buf.skip(crlf + 2);
                    return OneStep::Value(Packet::SimpleString(text));
                }
                tag::ERROR => {
                    let text = String::from_utf8_lossy(&buf.data()[1..crlf]).into_owned();
                    buf.skip(crlf + 2);
                    return OneStep::Value(Packet::Error(text));
                }
                tag::BIG_NUMBER => {
                    let text = String::from_utf8_lossy(&buf.data()[1..crlf]).into_owned();
                    buf.skip(crlf + 2);
                    return OneStep::Value(Packet::BigNumber(text));
                }
                tag::INTEGER => {
                    let n = match parse_i64(&buf.data()[1..crlf]) {
                        Some(n) => n,
                        None => return OneStep::Failed(ProtocolError::IntegerFormat),
                    };
                    buf.skip(crlf + 2);
                    return OneStep::Value(Packet::Integer(n));
                }
                tag::DOUBLE => {
                    let n = match parse_f64(&buf.data()[1..crlf]) {
                        Some(n) => n,
                        None => return OneStep::Failed(ProtocolError::DoubleFormat),
                    };
                    buf.skip(crlf + 2);
                    return OneStep::Value(Packet::Double(n));
                }
                tag::BOOLEAN => {
                    if crlf != 2 {
                        return OneStep::Failed(ProtocolError::UnexpectedByte {
                            expected: 't',
                            got: buf.data()[1] as char,
                        });
                    }
                    let v = match buf.data()[1] {
                        b't' => true,
                        b'f' => false,
                        other => {
                            return OneStep::Failed(ProtocolError::UnexpectedByte {
                                expected: 't',
                                got: other as char,
                            })
                        }
                    };
                    buf.skip(crlf + 2);
                    return OneStep::Value(Packet::Boolean(v));
                }
                tag::NULL => {
                    buf.skip(crlf + 2);
                    return OneStep::Value(Packet::Null);
                }
                tag::BULK_STRING => {
                    let n = match parse_i64(&buf.data()[1..crlf]) {
                        Some(n) => n,
                        None => return OneStep::Failed(ProtocolError::MissingBulkLen),
                    };
                    if n < -1 || n > self.options.proto_max_bulk_len() as i64 {
                        return OneStep::Failed(ProtocolError::InvalidBulkLength);
                    }
                    buf.skip(crlf + 2);
                    if n == -1 {
                        return OneStep::Value(Packet::BulkString(None));
                    }
                    self.pending = Some(Pending {
                        kind: PendingKind::Bulk,
                        len: n as usize,
                    });
                    continue;
                }
                tag::BLOB_ERROR => {
                    let n = match parse_i64(&buf.data()[1..crlf]) {
                        Some(n) => n,
                        None => return OneStep::Failed(ProtocolError::MissingBulkLen),
                    };
                    if n < 0 {
                        return OneStep::Failed(ProtocolError::UnbalancedAggregateNull);
                    }
                    buf.skip(crlf + 2);
                    self.pending = Some(Pending {
                        kind: PendingKind::BlobError,
                        len: n as usize,
                    });
                    continue;
                }
                tag::VERBATIM_STRING => {
                    let n = match parse_i64(&buf.data()[1..crlf]) {
                        Some(n) => n,
                        None => return OneStep::Failed(ProtocolError::MissingBulkLen),
                    };
                    if n < 0 {
                        return OneStep::Failed(ProtocolError::UnbalancedAggregateNull);
                    }
                    buf.skip(crlf + 2);
                    self.pending = Some(Pending {
                        kind: PendingKind::Verbatim,
                        len: n as usize,
                    });
                    continue;
                }
                tag::ARRAY | tag::SET | tag::PUSH | tag::MAP | tag::ATTRIBUTE => {
                    let n = match parse_i64(&buf.data()[1..crlf]) {
                        Some(n) => n,
                        None => return OneStep::Failed(ProtocolError::MissingArraySize),
                    };
                    if n > crate::codec::PROTO_RESP_DECODE_REQUEST_SIZE_LIMIT {
                        return OneStep::Failed(ProtocolError::InvalidMultibulkLength);
                    }
                    if n == -1 {
                        if first == tag::ARRAY {
                            buf.skip(crlf + 2);
                            return OneStep::Value(Packet::Array(None));
                        }
                        return OneStep::Failed(ProtocolError::InvalidMultibulkLength);
                    }
                    if n < -1 {
                        return OneStep::Failed(ProtocolError::InvalidMultibulkLength);
                    }
                    buf.skip(crlf + 2);
                    if n == 0 {
                        return OneStep::Value(match first {
                            tag::ARRAY => Packet::Array(Some(Vec::new())),
                            tag::SET => Packet::Set(Vec::new()),
                            tag::PUSH => Packet::Push(Vec::new()),
                            tag::MAP => Packet::Map(Vec::new()),
                            _ => Packet::Attribute(Vec::new()),
                        });
                    }
                    let frame = match first {
                        tag::ARRAY => Frame::Array(Agg { total: n, items: Vec::new() }),
                        tag::SET => Frame::Set(Agg { total: n, items: Vec::new() }),
                        tag::PUSH => Frame::Push(Agg { total: n, items: Vec::new() }),
                        tag::MAP => Frame::Map(PairAgg { total: n, items: Vec::new(), key: None }),
                        _ => Frame::Attribute(PairAgg { total: n, items: Vec::new(), key: None }),
                    };
                    self.stack.push(frame);
                    continue;
                }
                other => return OneStep::Failed(ProtocolError::UnknownPacketType(other as char)),
            }
        }
    }

    fn dialect_allows(&self, first: u8) -> bool {
        match self.dialect {
            Dialect::Resp3 => true,
            Dialect::Resp2 => matches!(
                first,
                tag::SIMPLE_STRING | tag::ERROR | tag::INTEGER | tag::BULK_STRING | tag::ARRAY
            ),
        }
    }

    fn resume_scalar(&mut self, pending: Pending, buf: &mut ByteBuffer) -> OneStep {
        let need = pending.len + 2;
        if pending.len >= PROTO_RESP_MBULK_BIG_ARG {
            buf.reserve(need.saturating_sub(buf.readable_bytes()));
        }
        if buf.readable_bytes() < need {
            self.pending = Some(pending);
            return OneStep::NeedMore;
        }
        if buf.data()[pending.len] != b'\r' || buf.data()[pending.len + 1] != b'\n' {
            return match pending.kind {
                PendingKind::Bulk => OneStep::Failed(ProtocolError::InvalidBulkLength),
                _ => OneStep::Failed(ProtocolError::MissingBulkLen),
            };
        }
        let body = Bytes::copy_from_slice(&buf.data()[..pending.len]);
        buf.skip(need);
        match pending.kind {
            PendingKind::Bulk => OneStep::Value(Packet::BulkString(Some(body))),
            PendingKind::BlobError => OneStep::Value(Packet::BlobError(body)),
            PendingKind::Verbatim => {
                if body.len() < 4 || body[3] != b':' {
                    return OneStep::Failed(ProtocolError::MissingBulkLen);
                }
                let tag = smol_str::SmolStr::new(String::from_utf8_lossy(&body[..3]));
                let value = body.slice(4..);
                OneStep::Value(Packet::VerbatimString { tag, body: value })
            }
        }
    }

    /// Decode a command request: either an inline line or a `*`-prefixed
    /// multibulk, per the server-side request grammar.
    pub fn decode_request(&mut self, buf: &mut ByteBuffer) -> Progress<Vec<Bytes>> {
        if buf.is_empty() {
            return Progress::NeedMore;
        }
        if buf.data()[0] == tag::ARRAY {
            return match self.decode(buf) {
                Progress::Done(Packet::Array(Some(items))) => {
                    let mut argv = Vec::with_capacity(items.len());
                    for item in items {
                        match item {
                            Packet::BulkString(Some(b)) => argv.push(b),
                            _ => return Progress::Failed(ProtocolError::InvalidMultibulkLength),
                        }
                    }
                    Progress::Done(argv)
                }
                Progress::Done(_) => Progress::Failed(ProtocolError::InvalidMultibulkLength),
                Progress::NeedMore => Progress::NeedMore,
                Progress::Failed(e) => Progress::Failed(e),
            };
        }
        decode_inline(buf)
    }

    /// Encode a command as a RESP multibulk of bulk strings, the wire shape
    /// every dialect uses for outbound requests.
    pub fn encode_request(buf: &mut ByteBuffer, argv: &[impl AsRef<[u8]>]) {
        buf.append(&[tag::ARRAY]);
        buf.append_number_as_text(argv.len() as i64);
        buf.append(b"\r\n");
        for arg in argv {
            let a = arg.as_ref();
            buf.append(&[tag::BULK_STRING]);
            buf.append_number_as_text(a.len() as i64);
            buf.append(b"\r\n");
            buf.append(a);
            buf.append(b"\r\n");
        }
    }
}

/// Find the header line's `\r` offset relative to `read`, enforcing the
/// 64 KiB bound so a client can't be forced to buffer an unbounded count
/// prefix.
fn find_header_line(buf: &ByteBuffer) -> Result<Option<usize>, ProtocolError> {
    match buf.find_crlf(0) {
        Some(pos) => Ok(Some(pos)),
        None => {
            if buf.readable_bytes() > PROTO_RESP_INLINE_MAX_SIZE {
                Err(ProtocolError::TooBigCountString)
            } else {
                Ok(None)
            }
        }
    }
}

fn parse_i64(digits: &[u8]) -> Option<i64> {
    std::str::from_utf8(digits).ok()?.parse::<i64>().ok()
}

fn parse_f64(digits: &[u8]) -> Option<f64> {
    let s = std::str::from_utf8(digits).ok()?;
    match s {
        "inf" | "+inf" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        _ => s.parse::<f64>().ok(),
    }
}

/// Parse one inline command line: shell-style quoting, argv out.
fn decode_inline(buf: &mut ByteBuffer) -> Progress<Vec<Bytes>> {
    let eol = match buf.find_eol(0) {
        Some(p) => p,
        None => {
            if buf.readable_bytes() > PROTO_RESP_INLINE_MAX_SIZE {
                return Progress::Failed(ProtocolError::TooBigInlineRequest);
            }
            return Progress::NeedMore;
        }
    };
    let mut line_end = eol;
    if line_end > 0 && buf.data()[line_end - 1] == b'\r' {
        line_end -= 1;
    }
    let line = buf.data()[..line_end].to_vec();
    match split_args(&line) {
        Ok(argv) => {
            buf.skip(eol + 1);
            Progress::Done(argv.into_iter().map(Bytes::from).collect())
        }
        Err(e) => Progress::Failed(e),
    }
}

/// Shell-style argv splitting: unquoted tokens separated by whitespace,
/// `"..."` with C escapes, `'...'` with only `\'` escaped.
fn split_args(line: &[u8]) -> Result<Vec<Vec<u8>>, ProtocolError> {
    let mut argv = Vec::new();
    let mut i = 0;
    let len = line.len();
    while i < len {
        while i < len && (line[i] as char).is_whitespace() {
            i += 1;
        }
        if i >= len {
            break;
        }
        let mut token = Vec::new();
        if line[i] == b'"' {
            i += 1;
            let mut closed = false;
            while i < len {
                if line[i] == b'\\' && i + 1 < len {
                    i += 1;
                    match line[i] {
                        b'n' => token.push(b'\n'),
                        b'r' => token.push(b'\r'),
                        b't' => token.push(b'\t'),
                        b'b' => token.push(0x08),
                        b'a' => token.push(0x07),
                        b'x' if i + 2 < len => {
                            let hex = std::str::from_utf8(&line[i + 1..i + 3]).ok();
                            if let Some(h) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                                token.push(h);
                                i += 2;
                            } else {
                                token.push(b'x');
                            }
                        }
                        other => token.push(other),
                    }
                    i += 1;
                } else if line[i] == b'"' {
                    i += 1;
                    closed = true;
                    break;
                } else {
                    token.push(line[i]);
                    i += 1;
                }
            }
            if !closed {
                return Err(ProtocolError::UnbalancedQuotes);
            }
        } else if line[i] == b'\'' {
            i += 1;
            let mut closed = false;
            while i < len {
                if line[i] == b'\\' && i + 1 < len && line[i + 1] == b'\'' {
                    token.push(b'\'');
                    i += 2;
                } else if line[i] == b'\'' {
                    i += 1;
                    closed = true;
                    break;
                } else {
                    token.push(line[i]);
                    i += 1;
                }
            }
            if !closed {
                return Err(ProtocolError::UnbalancedQuotes);
            }
        } else {
            while i < len && !(line[i] as char).is_whitespace() {
                token.push(line[i]);
                i += 1;
            }
        }
        argv.push(token);
    }
    Ok(argv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Dialect;

    fn codec(d: Dialect) -> RespCodec {
        RespCodec::new(d, Arc::new(ProtocolOptions::default()))
    }

    #[test]
    fn decodes_nested_array() {
        let mut c = codec(Dialect::Resp3);
        let mut buf = ByteBuffer::new();
        let input = b"*2\r\n$4\r\nbulk\r\n*2\r\n$7\r\nsubbulk\r\n+status\r\n";
        buf.append(input);
        match c.decode(&mut buf) {
            Progress::Done(Packet::Array(Some(items))) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[0], Packet::BulkString(Some(Bytes::from_static(b"bulk"))));
                match &items[1] {
                    Packet::Array(Some(inner)) => {
                        assert_eq!(inner.len(), 2);
                        assert_eq!(inner[1], Packet::SimpleString("status".into()));
                    }
                    other => panic!("expected nested array, got {other:?}"),
                }
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn sequential_bulk_strings_in_order() {
        let mut c = codec(Dialect::Resp3);
        let mut buf = ByteBuffer::new();
        buf.append(b"$-1\r\n$0\r\n\r\n$10\r\nREDISREDIS\r\n");
        assert_eq!(c.decode(&mut buf), Progress::Done(Packet::BulkString(None)));
        assert_eq!(
            c.decode(&mut buf),
            Progress::Done(Packet::BulkString(Some(Bytes::from_static(b""))))
        );
        assert_eq!(
            c.decode(&mut buf),
            Progress::Done(Packet::BulkString(Some(Bytes::from_static(b"REDISREDIS"))))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn incremental_feed_matches_whole_buffer() {
        let input = b"*2\r\n$4\r\nbulk\r\n$7\r\nsubbulk\r\n";
        for split in 0..input.len() {
            let mut c = codec(Dialect::Resp3);
            let mut buf = ByteBuffer::new();
            buf.append(&input[..split]);
            let first = c.decode(&mut buf);
            if split < input.len() {
                match &first {
                    Progress::Done(_) => {
                        // Some splits may land exactly on a boundary that
                        // already yields the value; just keep going.
                    }
                    Progress::NeedMore => {}
                    Progress::Failed(e) => panic!("unexpected failure at split {split}: {e}"),
                }
            }
            buf.append(&input[split..]);
            let result = if matches!(first, Progress::NeedMore) {
                c.decode(&mut buf)
            } else {
                first
            };
            assert!(matches!(result, Progress::Done(_)), "split {split}");
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn boolean_decodes_in_v3() {
        let mut c = codec(Dialect::Resp3);
        let mut buf = ByteBuffer::new();
        buf.append(b"#t\r\n");
        assert_eq!(c.decode(&mut buf), Progress::Done(Packet::Boolean(true)));
    }

    #[test]
    fn verbatim_string_decodes() {
        let mut c = codec(Dialect::Resp3);
        let mut buf = ByteBuffer::new();
        buf.append(b"=10\r\ntxt:test\r\n\r\n");
        match c.decode(&mut buf) {
            Progress::Done(Packet::VerbatimString { tag, body }) => {
                assert_eq!(tag.as_str(), "txt");
                assert_eq!(&body[..], b"test\r\n");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn inline_request_parses_argv() {
        let mut buf = ByteBuffer::new();
        buf.append(b"set key value\n");
        match decode_inline(&mut buf) {
            Progress::Done(argv) => {
                assert_eq!(argv, vec![Bytes::from_static(b"set"), Bytes::from_static(b"key"), Bytes::from_static(b"value")]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn inline_request_rejects_unbalanced_quotes() {
        let mut buf = ByteBuffer::new();
        buf.append(b"set \"key value\n");
        assert_eq!(decode_inline(&mut buf), Progress::Failed(ProtocolError::UnbalancedQuotes));
    }

    #[test]
    fn resp2_rejects_resp3_only_types() {
        let mut c = codec(Dialect::Resp2);
        let mut buf = ByteBuffer::new();
        buf.append(b"#t\r\n");
        assert_eq!(
            c.decode(&mut buf),
            Progress::Failed(ProtocolError::UnknownPacketType('#'))
        );
    }
}
