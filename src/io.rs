//! The minimal I/O trait the core is defined against. Connection bring-up,
//! reconnection, keep-alive and authentication handshakes are the host's
//! responsibility; the core only ever sends bytes, receives bytes, and
//! reacts to disconnection.

/// A handle to one network connection, supplied by the host application.
/// The core never opens a socket itself — it is handed connections that
/// already exist and speaks the wire protocol over them.
pub trait Connection {
    /// Queue `bytes` for writing. Non-blocking: actual transmission happens
    /// on whatever event loop the host runs.
    fn send(&self, bytes: &[u8]);

    /// Register the callback invoked whenever new bytes arrive. The core
    /// calls this once at setup; the host is expected to forward every
    /// read into the callback, in order, exactly once per byte.
    fn register_on_bytes(&self, callback: Box<dyn FnMut(&[u8]) + Send>);

    /// Register the callback invoked when the connection is torn down,
    /// for any reason (peer close, I/O error, explicit `close()`).
    fn on_disconnect(&self, callback: Box<dyn FnOnce() + Send>);

    /// Tear down the connection. Idempotent.
    fn close(&self);
}
