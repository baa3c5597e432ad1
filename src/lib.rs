//! slotwire: the wire-protocol and cluster-routing core shared by a
//! Redis (RESP2/RESP3) and Memcached (text + binary) client.
//!
//! Two subsystems live here: a resumable streaming codec built on a typed
//! packet model ([`packet`], [`codec`]), and a cluster-side slot table and
//! command dispatcher ([`cluster`]). Connection bring-up, the user-facing
//! command façade, logging, and configuration loading are deliberately
//! someone else's problem — see [`io::Connection`] for the seam.

pub mod buffer;
pub mod cluster;
pub mod codec;
pub mod config;
pub mod error;
pub mod hash;
pub mod io;
pub mod packet;

pub use buffer::ByteBuffer;
pub use codec::{memcached::MemcachedCodec, resp::RespCodec, Dialect, Progress, ProtocolOptions};
pub use packet::Packet;

/// Default standalone listen address used by the demo client and docs.
pub const DEFAULT_ADDR: &str = "127.0.0.1:6379";
