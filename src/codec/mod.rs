//! Shared codec plumbing: protocol dialect, process-wide tunables grouped
//! into a configuration struct (per the source's global
//! `ProtoOptions::proto_max_bulk_len` / `memcached_max_item_size`), and the
//! `Progress` type every resumable decoder reports through.

pub mod memcached;
pub mod resp;

use std::sync::atomic::{AtomicUsize, Ordering};

/// Which RESP dialect a connection has negotiated. Affects both which wire
/// types are legal to decode and how RESP3-only types get projected on
/// encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Resp2,
    Resp3,
}

/// Fixed protocol limits, mirroring the source's `IMMUTABLE_CONFIG` block.
pub const PROTO_RESP_INLINE_MAX_SIZE: usize = 64 * 1024;
pub const PROTO_RESP_MBULK_BIG_ARG: usize = 32 * 1024;
pub const PROTO_RESP_DECODE_REQUEST_SIZE_LIMIT: i64 = i32::MAX as i64;
pub const PROTO_MEMCACHED_KEY_MAX_LENGTH: usize = 250;

/// Process-wide, dynamically modifiable protocol tunables. Grouped into a
/// struct passed by reference to codecs at construction instead of the
/// source's bare global atomics.
#[derive(Debug)]
pub struct ProtocolOptions {
    proto_max_bulk_len: AtomicUsize,
    memcached_max_item_size: AtomicUsize,
}

impl Default for ProtocolOptions {
    fn default() -> Self {
        ProtocolOptions {
            proto_max_bulk_len: AtomicUsize::new(512 * 1024 * 1024),
            memcached_max_item_size: AtomicUsize::new(1024 * 1024),
        }
    }
}

impl ProtocolOptions {
    pub fn proto_max_bulk_len(&self) -> usize {
        self.proto_max_bulk_len.load(Ordering::Relaxed)
    }

    pub fn set_proto_max_bulk_len(&self, n: usize) {
        self.proto_max_bulk_len.store(n, Ordering::Relaxed);
    }

    pub fn memcached_max_item_size(&self) -> usize {
        self.memcached_max_item_size.load(Ordering::Relaxed)
    }

    pub fn set_memcached_max_item_size(&self, n: usize) {
        self.memcached_max_item_size.store(n, Ordering::Relaxed);
    }
}

/// Outcome of one resumable decode step.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress<T> {
    Done(T),
    NeedMore,
    Failed(crate::error::ProtocolError),
}

impl<T> Progress<T> {
    pub fn is_need_more(&self) -> bool {
        matches!(self, Progress::NeedMore)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Progress<U> {
        match self {
            Progress::Done(v) => Progress::Done(f(v)),
            Progress::NeedMore => Progress::NeedMore,
            Progress::Failed(e) => Progress::Failed(e),
        }
    }
}
