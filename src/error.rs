//! Error taxonomy for the codec and cluster-routing core.

use thiserror::Error;

/// Errors raised while decoding or encoding a wire packet.
///
/// These are the protocol-local errors described by the RESP and Memcached
/// codecs. They are fatal for the connection they occurred on: the caller is
/// expected to close and, depending on configuration, reconnect.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("expected '{expected}', got '{got}'")]
    UnexpectedByte { expected: char, got: char },

    #[error("not found array size")]
    MissingArraySize,

    #[error("not found bulkstring len")]
    MissingBulkLen,

    #[error("too big count string")]
    TooBigCountString,

    #[error("too big inline request")]
    TooBigInlineRequest,

    #[error("unbalanced quotes in request")]
    UnbalancedQuotes,

    #[error("integer format error")]
    IntegerFormat,

    #[error("invalid bulk length")]
    InvalidBulkLength,

    #[error("invalid multibulk length")]
    InvalidMultibulkLength,

    #[error("unknown packet type: '{0}'")]
    UnknownPacketType(char),

    #[error("double format error")]
    DoubleFormat,

    #[error("unbalanced aggregate null in non-null-capable variant")]
    UnbalancedAggregateNull,

    #[error("ERROR")]
    MemcachedUnknownCommand,

    #[error("CLIENT_ERROR bad command line format")]
    MemcachedBadCommandLine,

    #[error("CLIENT_ERROR bad data chunk")]
    MemcachedBadDataChunk,

    #[error("SERVER_ERROR object too large for cache")]
    MemcachedObjectTooLarge,
}

/// Routing errors, returned synchronously before any I/O takes place.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("not-initialized")]
    NotInitialized,

    #[error("cluster-not-supported")]
    ClusterNotSupported,

    #[error("not-in-same-slot")]
    NotInSameSlot,

    #[error("params-empty")]
    ParamsEmpty,

    #[error("no-such-slot")]
    NoSuchSlot,
}

/// Connection-lifecycle errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("disconnected")]
    Disconnected,

    #[error("connect-failed")]
    ConnectFailed,

    #[error("timeout")]
    Timeout,
}

/// Failures that can occur while initializing a cluster client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClusterInitError {
    #[error("connect to server failed")]
    ConnectFailed,

    #[error("get cluster nodes info failed")]
    GetNodesInfoFailed,

    #[error("parse cluster nodes info failed")]
    ParseNodesInfoFailed,

    #[error("some slots are not initialized")]
    SlotsNotInitialized,

    #[error("cluster-nodes call failed")]
    ClusterNodesCallFailed,

    #[error("sentinel mode is not supported")]
    SentinelNotSupported,
}

/// Top-level error type covering every failure mode the core can surface.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    ClusterInit(#[from] ClusterInitError),
}
