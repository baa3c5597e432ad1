//! The caller-visible configuration surface (§6). Every option has a
//! default matching the source; `proto_max_bulk_len` and
//! `memcached_max_item_size` are modifiable at runtime through
//! [`crate::codec::ProtocolOptions`] rather than bare process globals.

use std::time::Duration;

/// Deployment topology. `Sentinel` is parsed only so it can be rejected
/// explicitly at init, per the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Standalone,
    Cluster,
    Sentinel,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub mode: Mode,
    /// Non-empty; exactly one entry when `mode == Standalone`.
    pub server_addrs: Vec<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub connecting_timeout: Duration,
    /// `None` means immediate retry (the source's `-1` sentinel).
    pub reconnect_interval: Option<Duration>,
    pub auto_reconnect: bool,
    pub keep_alive: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            mode: Mode::Standalone,
            server_addrs: Vec::new(),
            user: None,
            password: None,
            connecting_timeout: Duration::from_millis(2000),
            reconnect_interval: None,
            auto_reconnect: true,
            keep_alive: Duration::from_secs(60),
        }
    }
}

impl ClientConfig {
    /// Validate the configuration shape the source checks at init, before
    /// any connection is attempted.
    pub fn validate(&self) -> Result<(), crate::error::ClusterInitError> {
        if self.mode == Mode::Sentinel {
            return Err(crate::error::ClusterInitError::SentinelNotSupported);
        }
        if self.server_addrs.is_empty() {
            return Err(crate::error::ClusterInitError::ConnectFailed);
        }
        if self.mode == Mode::Standalone && self.server_addrs.len() != 1 {
            return Err(crate::error::ClusterInitError::ConnectFailed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_mode_is_rejected() {
        let cfg = ClientConfig {
            mode: Mode::Sentinel,
            server_addrs: vec!["127.0.0.1:6379".into()],
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn standalone_requires_exactly_one_address() {
        let cfg = ClientConfig {
            mode: Mode::Standalone,
            server_addrs: vec!["a:1".into(), "b:2".into()],
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
