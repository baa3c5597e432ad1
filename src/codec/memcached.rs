//! Resumable Memcached codec: text and binary dialects, both folded into
//! the same argv shape the RESP side produces so the dispatcher can treat
//! every inbound command uniformly.

use crate::buffer::ByteBuffer;
use crate::codec::{Progress, ProtocolOptions};
use crate::error::ProtocolError;
use crate::packet::Packet;
use bytes::Bytes;
use std::sync::Arc;

const BINARY_REQUEST_MAGIC: u8 = 0x80;
const BINARY_RESPONSE_MAGIC: u8 = 0x81;
const HEADER_LEN: usize = 24;
const KEY_MAX_LENGTH: usize = super::PROTO_MEMCACHED_KEY_MAX_LENGTH;

pub mod opcode {
    pub const GET: u8 = 0x00;
    pub const SET: u8 = 0x01;
    pub const ADD: u8 = 0x02;
    pub const REPLACE: u8 = 0x03;
    pub const DELETE: u8 = 0x04;
    pub const INCREMENT: u8 = 0x05;
    pub const DECREMENT: u8 = 0x06;
    pub const QUIT: u8 = 0x07;
    pub const FLUSH: u8 = 0x08;
    pub const GETQ: u8 = 0x09;
    pub const NOOP: u8 = 0x0A;
    pub const VERSION: u8 = 0x0B;
    pub const GETK: u8 = 0x0C;
    pub const GETKQ: u8 = 0x0D;
    pub const APPEND: u8 = 0x0E;
    pub const PREPEND: u8 = 0x0F;
    pub const SETQ: u8 = 0x11;
    pub const ADDQ: u8 = 0x12;
    pub const REPLACEQ: u8 = 0x13;
    pub const DELETEQ: u8 = 0x14;
    pub const INCREMENTQ: u8 = 0x15;
    pub const DECREMENTQ: u8 = 0x16;
    pub const QUITQ: u8 = 0x17;
    pub const FLUSHQ: u8 = 0x18;
    pub const APPENDQ: u8 = 0x19;
    pub const PREPENDQ: u8 = 0x1A;
    pub const TOUCH: u8 = 0x1C;
    pub const GAT: u8 = 0x1D;
    pub const GATQ: u8 = 0x1E;
    pub const SASL_LIST_MECHS: u8 = 0x20;
    pub const SASL_AUTH: u8 = 0x21;
    pub const SASL_STEP: u8 = 0x22;
}

fn command_name(opcode: u8) -> &'static str {
    use opcode::*;
    match opcode {
        GET | GETQ => "memcache_get",
        GETK | GETKQ => "memcache_getk",
        SET | SETQ => "memcache_set",
        ADD | ADDQ => "memcache_add",
        REPLACE | REPLACEQ => "memcache_replace",
        DELETE | DELETEQ => "memcache_delete",
        INCREMENT | INCREMENTQ => "memcache_incr",
        DECREMENT | DECREMENTQ => "memcache_decr",
        QUIT | QUITQ => "memcache_quit",
        FLUSH | FLUSHQ => "memcache_flush_all",
        NOOP => "memcache_noop",
        VERSION => "memcache_version",
        APPEND | APPENDQ => "memcache_append",
        PREPEND | PREPENDQ => "memcache_prepend",
        TOUCH => "memcache_touch",
        GAT | GATQ => "memcache_gat",
        SASL_LIST_MECHS => "memcache_sasl_list_mechs",
        SASL_AUTH => "memcache_sasl_auth",
        SASL_STEP => "memcache_sasl_step",
        _ => "memcache_unknown",
    }
}

/// Maps a quiet opcode to its non-quiet equivalent, and reports whether the
/// request was quiet.
fn normalize_quiet(opcode: u8) -> (u8, bool) {
    use opcode::*;
    match opcode {
        GETQ => (GET, true),
        GETKQ => (GETK, true),
        SETQ => (SET, true),
        ADDQ => (ADD, true),
        REPLACEQ => (REPLACE, true),
        DELETEQ => (DELETE, true),
        INCREMENTQ => (INCREMENT, true),
        DECREMENTQ => (DECREMENT, true),
        QUITQ => (QUIT, true),
        FLUSHQ => (FLUSH, true),
        APPENDQ => (APPEND, true),
        PREPENDQ => (PREPEND, true),
        GATQ => (GAT, true),
        other => (other, false),
    }
}

/// Binary-protocol context retained so a response can reproduce the
/// correct header (`opcode`, `opaque`, `cas`) and suppress replies for
/// quiet requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryContext {
    pub opcode: u8,
    pub opaque: u32,
    pub cas: u64,
    pub quiet: bool,
}

/// A decoded Memcached request: the uniform argv shape plus, for binary
/// requests, the header context needed to answer it.
#[derive(Debug, Clone, PartialEq)]
pub struct MemcachedRequest {
    pub argv: Vec<Bytes>,
    pub binary: Option<BinaryContext>,
}

/// Binary response status codes (network byte order on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Status {
    NoError = 0x0000,
    KeyNotFound = 0x0001,
    KeyExists = 0x0002,
    ValueTooLarge = 0x0003,
    InvalidArguments = 0x0004,
    ItemNotStored = 0x0005,
    NonNumeric = 0x0006,
    AuthError = 0x0020,
    UnknownCommand = 0x0081,
    OutOfMemory = 0x0082,
}

pub struct MemcachedCodec {
    options: Arc<ProtocolOptions>,
    is_binary: Option<bool>,
}

impl MemcachedCodec {
    pub fn new(options: Arc<ProtocolOptions>) -> Self {
        MemcachedCodec { options, is_binary: None }
    }

    pub fn is_binary(&self) -> Option<bool> {
        self.is_binary
    }

    pub fn decode_request(&mut self, buf: &mut ByteBuffer) -> Progress<MemcachedRequest> {
        if buf.is_empty() {
            return Progress::NeedMore;
        }
        let is_binary = buf.data()[0] == BINARY_REQUEST_MAGIC;
        self.is_binary = Some(is_binary);
        if is_binary {
            self.decode_binary(buf)
        } else {
            self.decode_text(buf)
        }
    }

    fn decode_text(&mut self, buf: &mut ByteBuffer) -> Progress<MemcachedRequest> {
        let eol = match buf.find_eol(0) {
            Some(p) => p,
            None => return Progress::NeedMore,
        };
        let mut line_end = eol;
        let mut linefeed_chars = 1usize;
        if line_end > 0 && buf.data()[line_end - 1] == b'\r' {
            line_end -= 1;
            linefeed_chars += 1;
        }
        let mut argv: Vec<Vec<u8>> = buf.data()[..line_end]
            .split(|&b| b == b' ')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_vec())
            .collect();
        if argv.is_empty() {
            return Progress::Failed(ProtocolError::MemcachedUnknownCommand);
        }
        if argv.len() >= 2 && argv[1].len() > KEY_MAX_LENGTH {
            return Progress::Failed(ProtocolError::MemcachedBadCommandLine);
        }
        let querylen = line_end;
        let mut datalen = 0usize;
        let cmd = String::from_utf8_lossy(&argv[0]).to_string();

        let is_storage = matches!(cmd.as_str(), "set" | "add" | "replace" | "append" | "prepend" | "cas");
        if is_storage {
            if argv.len() < 5 {
                return Progress::Failed(ProtocolError::MemcachedBadCommandLine);
            }
            let bytes_count: i64 = match std::str::from_utf8(&argv[4]).ok().and_then(|s| s.parse().ok()) {
                Some(n) if n >= 0 => n,
                _ => return Progress::Failed(ProtocolError::MemcachedBadCommandLine),
            };
            let dataline = match buf.find_eol(eol + 1) {
                Some(p) => p,
                None => return Progress::NeedMore,
            };
            if dataline as i64 - eol as i64 - 2 != bytes_count {
                return Progress::Failed(ProtocolError::MemcachedBadDataChunk);
            }
            datalen = bytes_count as usize;
            if datalen > self.options.memcached_max_item_size() {
                return Progress::Failed(ProtocolError::MemcachedObjectTooLarge);
            }
            let value = buf.data()[eol + 1..eol + 1 + datalen].to_vec();
            argv.push(value);
        } else if cmd == "mscan" {
            if argv.len() < 6 {
                return Progress::Failed(ProtocolError::MemcachedBadCommandLine);
            }
            let bytes_count: i64 = match std::str::from_utf8(&argv[5]).ok().and_then(|s| s.parse().ok()) {
                Some(n) if n >= 0 => n,
                _ => return Progress::Failed(ProtocolError::MemcachedBadCommandLine),
            };
            let dataline = match buf.find_eol(eol + 1) {
                Some(p) => p,
                None => return Progress::NeedMore,
            };
            if dataline as i64 - eol as i64 - 2 != bytes_count {
                return Progress::Failed(ProtocolError::MemcachedBadDataChunk);
            }
            datalen = bytes_count as usize;
            let value = buf.data()[eol + 1..eol + 1 + datalen].to_vec();
            argv.push(value);
        } else if cmd == "incr" || cmd == "decr" {
            argv.push(b"0".to_vec());
            argv.push(b"0".to_vec());
        }

        if matches!(
            cmd.as_str(),
            "set" | "add" | "replace" | "append" | "prepend" | "incr" | "decr" | "delete"
        ) {
            argv.push(b"-1".to_vec());
        }
        argv[0] = format!("memcache_{cmd}").into_bytes();

        let packet_len = querylen + linefeed_chars + datalen;
        buf.skip(packet_len + 2);
        Progress::Done(MemcachedRequest {
            argv: argv.into_iter().map(Bytes::from).collect(),
            binary: None,
        })
    }

    fn decode_binary(&mut self, buf: &mut ByteBuffer) -> Progress<MemcachedRequest> {
        if buf.readable_bytes() < HEADER_LEN {
            return Progress::NeedMore;
        }
        let h = buf.data();
        let opcode_raw = h[1];
        let keylen = u16::from_be_bytes([h[2], h[3]]) as usize;
        let extlen = h[4] as usize;
        let bodylen = u32::from_be_bytes([h[8], h[9], h[10], h[11]]) as usize;
        let opaque = u32::from_be_bytes([h[12], h[13], h[14], h[15]]);
        let cas = u64::from_be_bytes([h[16], h[17], h[18], h[19], h[20], h[21], h[22], h[23]]);

        if keylen > KEY_MAX_LENGTH {
            return Progress::Failed(ProtocolError::MemcachedBadCommandLine);
        }
        if buf.readable_bytes() < HEADER_LEN + bodylen {
            return Progress::NeedMore;
        }

        let (norm_opcode, quiet) = normalize_quiet(opcode_raw);
        let body = &buf.data()[HEADER_LEN..HEADER_LEN + bodylen];
        let name = command_name(norm_opcode).as_bytes().to_vec();

        let mut argv: Vec<Vec<u8>> = Vec::new();
        let mut ok = true;
        match norm_opcode {
            opcode::VERSION | opcode::QUIT | opcode::NOOP | opcode::SASL_LIST_MECHS => {
                if extlen == 0 && keylen == 0 && bodylen == 0 {
                    argv.push(name);
                } else {
                    ok = false;
                }
            }
            opcode::FLUSH => {
                if extlen == 4 && keylen == 0 && bodylen == 4 {
                    let expire = u32::from_be_bytes(body[0..4].try_into().unwrap());
                    argv.push(name);
                    if expire != 0 {
                        argv.push(expire.to_string().into_bytes());
                    }
                } else {
                    ok = false;
                }
            }
            opcode::SET | opcode::ADD | opcode::REPLACE => {
                if extlen == 8 && keylen != 0 {
                    let value_len = bodylen - keylen - extlen;
                    if value_len > self.options.memcached_max_item_size() {
                        return Progress::Failed(ProtocolError::MemcachedObjectTooLarge);
                    }
                    let key = body[extlen..extlen + keylen].to_vec();
                    let flags = u32::from_be_bytes(body[0..4].try_into().unwrap());
                    let expire = u32::from_be_bytes(body[4..8].try_into().unwrap());
                    let value = body[extlen + keylen..].to_vec();
                    argv.push(name);
                    argv.push(key);
                    argv.push(flags.to_string().into_bytes());
                    argv.push(expire.to_string().into_bytes());
                    argv.push(value_len.to_string().into_bytes());
                    argv.push(value);
                    argv.push(cas.to_string().into_bytes());
                } else {
                    ok = false;
                }
            }
            opcode::APPEND | opcode::PREPEND => {
                if keylen > 0 && extlen == 0 {
                    let key = body[..keylen].to_vec();
                    let value = body[keylen..].to_vec();
                    argv.push(name);
                    argv.push(key);
                    argv.push(b"0".to_vec());
                    argv.push(b"0".to_vec());
                    argv.push((bodylen - keylen).to_string().into_bytes());
                    argv.push(value);
                    argv.push(cas.to_string().into_bytes());
                } else {
                    ok = false;
                }
            }
            opcode::DELETE => {
                if extlen == 0 && bodylen == keylen && keylen > 0 {
                    let key = body[..keylen].to_vec();
                    argv.push(name);
                    argv.push(key);
                    argv.push(cas.to_string().into_bytes());
                } else {
                    ok = false;
                }
            }
            opcode::GET | opcode::GETK => {
                if extlen == 0 && bodylen == keylen && keylen > 0 {
                    let key = body[..keylen].to_vec();
                    argv.push(name);
                    argv.push(key);
                } else {
                    ok = false;
                }
            }
            opcode::INCREMENT | opcode::DECREMENT => {
                if keylen > 0 && extlen == 20 && bodylen == keylen + extlen {
                    let delta = u64::from_be_bytes(body[0..8].try_into().unwrap());
                    let initial = u64::from_be_bytes(body[8..16].try_into().unwrap());
                    let expire = u32::from_be_bytes(body[16..20].try_into().unwrap());
                    let key = body[extlen..extlen + keylen].to_vec();
                    argv.push(name);
                    argv.push(key);
                    argv.push(delta.to_string().into_bytes());
                    argv.push(initial.to_string().into_bytes());
                    argv.push(expire.to_string().into_bytes());
                    argv.push(cas.to_string().into_bytes());
                } else {
                    ok = false;
                }
            }
            opcode::SASL_AUTH | opcode::SASL_STEP => {
                if extlen == 0 && keylen != 0 {
                    let key = body[..keylen].to_vec();
                    let value = body[keylen..].to_vec();
                    argv.push(name);
                    argv.push(key);
                    argv.push(value);
                } else {
                    ok = false;
                }
            }
            opcode::TOUCH | opcode::GAT => {
                if extlen == 4 && keylen > 0 && extlen + keylen == bodylen {
                    let expire = u32::from_be_bytes(body[0..4].try_into().unwrap());
                    let key = body[extlen..extlen + keylen].to_vec();
                    argv.push(name);
                    argv.push(key);
                    argv.push(expire.to_string().into_bytes());
                } else {
                    ok = false;
                }
            }
            _ => return Progress::Failed(ProtocolError::MemcachedUnknownCommand),
        }

        if !ok {
            return Progress::Failed(ProtocolError::MemcachedBadCommandLine);
        }

        buf.skip(HEADER_LEN + bodylen);
        Progress::Done(MemcachedRequest {
            argv: argv.into_iter().map(Bytes::from).collect(),
            binary: Some(BinaryContext { opcode: opcode_raw, opaque, cas, quiet }),
        })
    }

    /// Encode a reply in the dialect the request arrived in. Bulk/value
    /// responses carrying key metadata (`VALUE key flags bytes`) are the
    /// façade's concern; this encodes the status-line and scalar shapes the
    /// core is responsible for.
    pub fn encode_response_text(buf: &mut ByteBuffer, packet: &Packet) {
        match packet {
            Packet::SimpleString(s) => {
                buf.append(s.as_bytes());
                buf.append(b"\r\n");
            }
            Packet::Error(s) => {
                buf.append(s.as_bytes());
                buf.append(b"\r\n");
            }
            Packet::Integer(n) => {
                buf.append_number_as_text(*n);
                buf.append(b"\r\n");
            }
            Packet::BulkString(Some(b)) => {
                buf.append(b);
                buf.append(b"\r\n");
            }
            Packet::BulkString(None) => buf.append(b"END\r\n"),
            _ => buf.append(b"SERVER_ERROR unsupported response\r\n"),
        }
    }

    pub fn encode_response_binary(buf: &mut ByteBuffer, ctx: &BinaryContext, status: Status, body: &[u8]) {
        if ctx.quiet && status == Status::NoError {
            return;
        }
        buf.append(&[BINARY_RESPONSE_MAGIC, ctx.opcode]);
        buf.append(&0u16.to_be_bytes()); // keylen
        buf.append(&[0u8, 0u8]); // extlen, datatype
        buf.append(&(status as u16).to_be_bytes());
        buf.append(&(body.len() as u32).to_be_bytes());
        buf.append(&ctx.opaque.to_be_bytes());
        buf.append(&ctx.cas.to_be_bytes());
        buf.append(body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> MemcachedCodec {
        MemcachedCodec::new(Arc::new(ProtocolOptions::default()))
    }

    #[test]
    fn text_set_rewrites_argv() {
        let mut c = codec();
        let mut buf = ByteBuffer::new();
        buf.append(b"set K 0 0 5\r\nhello\r\n");
        match c.decode_request(&mut buf) {
            Progress::Done(req) => {
                let argv: Vec<&[u8]> = req.argv.iter().map(|b| &b[..]).collect();
                assert_eq!(
                    argv,
                    vec![
                        b"memcache_set".as_ref(),
                        b"K",
                        b"0",
                        b"0",
                        b"5",
                        b"hello",
                        b"-1"
                    ]
                );
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn binary_get_produces_key_argv() {
        let mut c = codec();
        let mut buf = ByteBuffer::new();
        let key = b"foo";
        let mut header = vec![0x80, opcode::GET, 0x00, 0x03, 0, 0, 0, 0];
        header.extend_from_slice(&(key.len() as u32).to_be_bytes());
        header.extend_from_slice(&0u32.to_be_bytes());
        header.extend_from_slice(&0u64.to_be_bytes());
        buf.append(&header);
        buf.append(key);
        match c.decode_request(&mut buf) {
            Progress::Done(req) => {
                assert_eq!(&req.argv[0][..], b"memcache_get");
                assert_eq!(&req.argv[1][..], b"foo");
                assert!(!req.binary.unwrap().quiet);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn binary_getq_is_marked_quiet() {
        let mut c = codec();
        let mut buf = ByteBuffer::new();
        let key = b"foo";
        let mut header = vec![0x80, opcode::GETQ, 0x00, 0x03, 0, 0, 0, 0];
        header.extend_from_slice(&(key.len() as u32).to_be_bytes());
        header.extend_from_slice(&0u32.to_be_bytes());
        header.extend_from_slice(&0u64.to_be_bytes());
        buf.append(&header);
        buf.append(key);
        match c.decode_request(&mut buf) {
            Progress::Done(req) => {
                assert_eq!(&req.argv[0][..], b"memcache_get");
                assert!(req.binary.unwrap().quiet);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
