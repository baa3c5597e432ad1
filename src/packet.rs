//! The packet model: a tagged union covering every RESP2/RESP3 wire value.
//!
//! The original source expresses this as a `Packet` base class with virtual
//! dispatch (`instance_of`/`packet_cast`) and one derived class per wire
//! type. Here it is a single enum: aggregates own their children by value,
//! there are no cycles, and matching replaces the `instance_of` dance.

use crate::buffer::ByteBuffer;
use smol_str::SmolStr;

/// Leading bytes used to tag each wire type, shared by the encoder and the
/// decoder's dispatch table.
pub mod tag {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
    pub const NULL: u8 = b'_';
    pub const DOUBLE: u8 = b',';
    pub const BOOLEAN: u8 = b'#';
    pub const BIG_NUMBER: u8 = b'(';
    pub const BLOB_ERROR: u8 = b'!';
    pub const VERBATIM_STRING: u8 = b'=';
    pub const MAP: u8 = b'%';
    pub const SET: u8 = b'~';
    pub const ATTRIBUTE: u8 = b'|';
    pub const PUSH: u8 = b'>';
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    SimpleString(String),
    Error(String),
    Integer(i64),
    /// `None` is the RESP null bulk string (`$-1\r\n`).
    BulkString(Option<bytes::Bytes>),
    /// `None` is the RESP null array (`*-1\r\n`).
    Array(Option<Vec<Packet>>),
    /// The RESP3-only explicit null, `_\r\n`.
    Null,
    Double(f64),
    Boolean(bool),
    BigNumber(String),
    BlobError(bytes::Bytes),
    VerbatimString { tag: SmolStr, body: bytes::Bytes },
    Map(Vec<(Packet, Packet)>),
    Set(Vec<Packet>),
    Attribute(Vec<(Packet, Packet)>),
    Push(Vec<Packet>),
}

impl Packet {
    pub fn ok() -> Packet {
        Packet::SimpleString("OK".into())
    }

    pub fn bulk(data: impl Into<bytes::Bytes>) -> Packet {
        Packet::BulkString(Some(data.into()))
    }

    pub fn null_bulk() -> Packet {
        Packet::BulkString(None)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Packet::Error(_) | Packet::BlobError(_))
    }

    // ---- v3 (native) encoding ----------------------------------------

    pub fn encode_v3(&self, buf: &mut ByteBuffer) {
        match self {
            Packet::SimpleString(s) => encode_line(buf, tag::SIMPLE_STRING, s.as_bytes()),
            Packet::Error(s) => encode_line(buf, tag::ERROR, s.as_bytes()),
            Packet::Integer(n) => {
                buf.append(&[tag::INTEGER]);
                buf.append_number_as_text(*n);
                buf.append(b"\r\n");
            }
            Packet::BulkString(None) => buf.append(b"$-1\r\n"),
            Packet::BulkString(Some(b)) => encode_bulk(buf, tag::BULK_STRING, b),
            Packet::Array(None) => buf.append(b"*-1\r\n"),
            Packet::Array(Some(items)) => {
                encode_count(buf, tag::ARRAY, items.len());
                for item in items {
                    item.encode_v3(buf);
                }
            }
            Packet::Null => buf.append(b"_\r\n"),
            Packet::Double(d) => {
                buf.append(&[tag::DOUBLE]);
                buf.append(format_double(*d).as_bytes());
                buf.append(b"\r\n");
            }
            Packet::Boolean(b) => buf.append(if *b { b"#t\r\n" } else { b"#f\r\n" }),
            Packet::BigNumber(s) => encode_line(buf, tag::BIG_NUMBER, s.as_bytes()),
            Packet::BlobError(b) => encode_bulk(buf, tag::BLOB_ERROR, b),
            Packet::VerbatimString { tag: t, body } => {
                let total = 4 + body.len();
                buf.append(&[tag::VERBATIM_STRING]);
                buf.append_number_as_text(total as i64);
                buf.append(b"\r\n");
                buf.append(t.as_bytes());
                buf.append(b":");
                buf.append(body);
                buf.append(b"\r\n");
            }
            Packet::Map(pairs) => {
                encode_count(buf, tag::MAP, pairs.len());
                for (k, v) in pairs {
                    k.encode_v3(buf);
                    v.encode_v3(buf);
                }
            }
            Packet::Set(items) => {
                encode_count(buf, tag::SET, items.len());
                for item in items {
                    item.encode_v3(buf);
                }
            }
            Packet::Attribute(pairs) => {
                encode_count(buf, tag::ATTRIBUTE, pairs.len());
                for (k, v) in pairs {
                    k.encode_v3(buf);
                    v.encode_v3(buf);
                }
            }
            Packet::Push(items) => {
                encode_count(buf, tag::PUSH, items.len());
                for item in items {
                    item.encode_v3(buf);
                }
            }
        }
    }

    pub fn encoded_size_v3(&self) -> usize {
        match self {
            Packet::SimpleString(s) => line_size(s.len()),
            Packet::Error(s) => line_size(s.len()),
            Packet::Integer(n) => 1 + decimal_len(*n) + 2,
            Packet::BulkString(None) => 5,
            Packet::BulkString(Some(b)) => bulk_size(b.len()),
            Packet::Array(None) => 5,
            Packet::Array(Some(items)) => {
                count_size(items.len()) + items.iter().map(|p| p.encoded_size_v3()).sum::<usize>()
            }
            Packet::Null => 3,
            Packet::Double(d) => 1 + format_double(*d).len() + 2,
            Packet::Boolean(_) => 4,
            Packet::BigNumber(s) => line_size(s.len()),
            Packet::BlobError(b) => bulk_size(b.len()),
            Packet::VerbatimString { body, .. } => bulk_size(4 + body.len()),
            Packet::Map(pairs) => {
                count_size(pairs.len())
                    + pairs
                        .iter()
                        .map(|(k, v)| k.encoded_size_v3() + v.encoded_size_v3())
                        .sum::<usize>()
            }
            Packet::Set(items) => {
                count_size(items.len()) + items.iter().map(|p| p.encoded_size_v3()).sum::<usize>()
            }
            Packet::Attribute(pairs) => {
                count_size(pairs.len())
                    + pairs
                        .iter()
                        .map(|(k, v)| k.encoded_size_v3() + v.encoded_size_v3())
                        .sum::<usize>()
            }
            Packet::Push(items) => {
                count_size(items.len()) + items.iter().map(|p| p.encoded_size_v3()).sum::<usize>()
            }
        }
    }

    // ---- v2 (projected) encoding ---------------------------------------

    pub fn encode_v2(&self, buf: &mut ByteBuffer) {
        match self {
            Packet::SimpleString(_)
            | Packet::Error(_)
            | Packet::Integer(_)
            | Packet::BulkString(_) => self.encode_v3(buf),
            Packet::Array(None) => buf.append(b"*-1\r\n"),
            Packet::Array(Some(items)) => {
                encode_count(buf, tag::ARRAY, items.len());
                for item in items {
                    item.encode_v2(buf);
                }
            }
            Packet::Null => buf.append(b"$-1\r\n"),
            Packet::Double(d) => encode_bulk(buf, tag::BULK_STRING, format_double(*d).as_bytes()),
            Packet::Boolean(b) => {
                buf.append(&[tag::INTEGER]);
                buf.append_number_as_text(if *b { 1 } else { 0 });
                buf.append(b"\r\n");
            }
            Packet::BigNumber(s) => encode_bulk(buf, tag::BULK_STRING, s.as_bytes()),
            Packet::BlobError(b) => {
                let escaped = escape_control_bytes(b);
                encode_line(buf, tag::ERROR, escaped.as_bytes());
            }
            Packet::VerbatimString { body, .. } => encode_bulk(buf, tag::BULK_STRING, body),
            Packet::Map(pairs) | Packet::Attribute(pairs) => {
                encode_count(buf, tag::ARRAY, pairs.len() * 2);
                for (k, v) in pairs {
                    k.encode_v2(buf);
                    v.encode_v2(buf);
                }
            }
            Packet::Set(items) | Packet::Push(items) => {
                encode_count(buf, tag::ARRAY, items.len());
                for item in items {
                    item.encode_v2(buf);
                }
            }
        }
    }

    pub fn encoded_size_v2(&self) -> usize {
        match self {
            Packet::SimpleString(_)
            | Packet::Error(_)
            | Packet::Integer(_)
            | Packet::BulkString(_) => self.encoded_size_v3(),
            Packet::Array(None) => 5,
            Packet::Array(Some(items)) => {
                count_size(items.len()) + items.iter().map(|p| p.encoded_size_v2()).sum::<usize>()
            }
            Packet::Null => 5,
            Packet::Double(d) => bulk_size(format_double(*d).len()),
            Packet::Boolean(b) => 1 + decimal_len(if *b { 1 } else { 0 }) + 2,
            Packet::BigNumber(s) => bulk_size(s.len()),
            Packet::BlobError(b) => line_size(escape_control_bytes(b).len()),
            Packet::VerbatimString { body, .. } => bulk_size(body.len()),
            Packet::Map(pairs) | Packet::Attribute(pairs) => {
                count_size(pairs.len() * 2)
                    + pairs
                        .iter()
                        .map(|(k, v)| k.encoded_size_v2() + v.encoded_size_v2())
                        .sum::<usize>()
            }
            Packet::Set(items) | Packet::Push(items) => {
                count_size(items.len()) + items.iter().map(|p| p.encoded_size_v2()).sum::<usize>()
            }
        }
    }
}

fn encode_line(buf: &mut ByteBuffer, tag: u8, text: &[u8]) {
    buf.append(&[tag]);
    buf.append(text);
    buf.append(b"\r\n");
}

fn encode_bulk(buf: &mut ByteBuffer, tag: u8, data: &[u8]) {
    buf.append(&[tag]);
    buf.append_number_as_text(data.len() as i64);
    buf.append(b"\r\n");
    buf.append(data);
    buf.append(b"\r\n");
}

fn encode_count(buf: &mut ByteBuffer, tag: u8, n: usize) {
    buf.append(&[tag]);
    buf.append_number_as_text(n as i64);
    buf.append(b"\r\n");
}

fn line_size(text_len: usize) -> usize {
    1 + text_len + 2
}

fn bulk_size(data_len: usize) -> usize {
    1 + decimal_len(data_len as i64) + 2 + data_len + 2
}

fn count_size(n: usize) -> usize {
    1 + decimal_len(n as i64) + 2
}

fn decimal_len(n: i64) -> usize {
    if n == 0 {
        return 1;
    }
    let mut n = n;
    let mut len = 0;
    if n < 0 {
        len += 1;
        n = -n;
    }
    while n > 0 {
        len += 1;
        n /= 10;
    }
    len
}

/// Significant digits used by the `%.17g`-equivalent rendering below —
/// enough to round-trip any `f64` exactly.
const DOUBLE_PRECISION: i32 = 17;

/// Formats a double the way RESP3 wants it: `inf`/`-inf` literals for
/// infinities, otherwise the same `%.17g` rendering the source uses
/// (`fmt::format("{:.17g}", val_)` in `DoublePacket.hpp`) — fixed notation
/// inside `[1e-4, 1e17)`, scientific notation outside it, trailing
/// fractional zeros and a bare trailing `.` stripped either way.
pub fn format_double(d: f64) -> String {
    if d.is_nan() {
        return "nan".to_string();
    }
    if d.is_infinite() {
        return if d > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    if d == 0.0 {
        return if d.is_sign_negative() { "-0".to_string() } else { "0".to_string() };
    }

    let neg = d.is_sign_negative();
    let abs = d.abs();
    let sci = format!("{:.*e}", (DOUBLE_PRECISION - 1) as usize, abs);
    let (mantissa, exp_str) = sci.split_once('e').expect("exponential format always contains 'e'");
    let exponent: i32 = exp_str.parse().expect("exponent is always a valid integer");

    let body = if exponent < -4 || exponent >= DOUBLE_PRECISION {
        let digits = strip_trailing_zeros(mantissa);
        let sign = if exponent < 0 { "-" } else { "+" };
        format!("{digits}e{sign}{:02}", exponent.abs())
    } else {
        let decimals = (DOUBLE_PRECISION - 1 - exponent).max(0) as usize;
        strip_trailing_zeros(&format!("{:.*}", decimals, abs))
    };

    if neg {
        format!("-{body}")
    } else {
        body
    }
}

/// Strips trailing fractional zeros (and a bare trailing `.`) from a
/// decimal string, the way `%g` omits precision `%f` doesn't need.
fn strip_trailing_zeros(s: &str) -> String {
    if !s.contains('.') {
        return s.to_string();
    }
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Escapes control characters and non-printable bytes the way the source
/// escapes a `BlobError` when it has to be projected onto a RESP2 simple
/// error line (which cannot carry raw CR/LF).
pub fn escape_control_bytes(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    for &b in data {
        match b {
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x07 => out.push_str("\\a"),
            0x08 => out.push_str("\\b"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{:02x}", b)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_v3(p: &Packet) -> Vec<u8> {
        let mut buf = ByteBuffer::new();
        p.encode_v3(&mut buf);
        assert_eq!(buf.readable_bytes(), p.encoded_size_v3());
        buf.data().to_vec()
    }

    #[test]
    fn simple_string_encodes_with_crlf() {
        let p = Packet::SimpleString("OK".into());
        assert_eq!(roundtrip_v3(&p), b"+OK\r\n");
    }

    #[test]
    fn boolean_v2_projects_to_integer() {
        let p = Packet::Boolean(true);
        let mut buf = ByteBuffer::new();
        p.encode_v2(&mut buf);
        assert_eq!(buf.data(), b":1\r\n");
        assert_eq!(buf.readable_bytes(), p.encoded_size_v2());
    }

    #[test]
    fn verbatim_string_v2_drops_tag() {
        let p = Packet::VerbatimString {
            tag: "txt".into(),
            body: bytes::Bytes::from_static(b"test\r\n"),
        };
        let mut buf = ByteBuffer::new();
        p.encode_v2(&mut buf);
        assert_eq!(buf.data(), b"$6\r\ntest\r\n\r\n");
    }

    #[test]
    fn format_double_matches_c_percent_g17() {
        assert_eq!(format_double(0.1), "0.10000000000000001");
        assert_eq!(format_double(3.5), "3.5");
        assert_eq!(format_double(-2.0), "-2");
        assert_eq!(format_double(0.0), "0");
        assert_eq!(format_double(f64::INFINITY), "inf");
        assert_eq!(format_double(f64::NEG_INFINITY), "-inf");
        assert_eq!(format_double(1e20), "1e+20");
        assert_eq!(format_double(1e-10), "1e-10");
    }

    #[test]
    fn map_v2_flattens_to_array() {
        let p = Packet::Map(vec![(
            Packet::SimpleString("k".into()),
            Packet::Integer(1),
        )]);
        let mut buf = ByteBuffer::new();
        p.encode_v2(&mut buf);
        assert_eq!(buf.data(), b"*2\r\n+k\r\n:1\r\n");
    }
}
