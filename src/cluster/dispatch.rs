//! Per-command slot derivation, same-slot enforcement, and single-node vs.
//! fan-out execution. Grounded on `TairClusterAsyncClient::calcCommandSlot`
//! and the handful of hand-written fan-out methods (`keys`, `scriptLoad`,
//! `scriptFlush`, `scriptKill`, `flushAll`, `quit`) in the source — the
//! hundreds of thin single-key façade methods around them are the
//! out-of-scope command surface; only the routing decision they all funnel
//! through lives here.

use crate::cluster::slots::SlotTable;
use crate::error::{ConnectionError, CoreError, RoutingError};
use crate::packet::Packet;
use bytes::Bytes;

/// How a command's arguments fan out across the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// Route by the single key at the derived key index.
    SingleKey,
    /// Multiple keys must share a slot; route by the first.
    MultiKeySameSlot,
    /// A destination key plus a key list; all must share the destination's
    /// slot (`pfmerge`, `zrangestore`, `rename`, `renamenx`, `sort` store
    /// form, `copy`, `bitop`).
    DestinationPinned,
    FanOut(FanOutKind),
    /// Rejected locally, no I/O attempted.
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOutKind {
    Keys,
    ScriptLoad,
    ScriptFlush,
    ScriptKill,
    FlushAll,
    Quit,
}

impl FanOutKind {
    /// `true` if a single shard failure fails the whole aggregate.
    pub fn fails_fast(self) -> bool {
        !matches!(self, FanOutKind::Quit)
    }
}

fn ascii_lower(s: &[u8]) -> Vec<u8> {
    s.iter().map(|b| b.to_ascii_lowercase()).collect()
}

/// Commands explicitly rejected in cluster mode regardless of key layout.
fn is_rejected(cmd: &[u8], argc: usize) -> bool {
    matches!(cmd, b"mget" | b"mset" | b"msetnx")
        || (matches!(cmd, b"del" | b"unlink" | b"exists" | b"touch") && argc > 2)
}

/// Classify a command by its argv, deciding how the dispatcher routes it.
/// Mirrors the source's per-command special cases; anything not matched
/// falls through to the default single-key path.
pub fn classify(argv: &[Bytes]) -> Execution {
    if argv.is_empty() {
        return Execution::Rejected;
    }
    let cmd = ascii_lower(&argv[0]);
    if is_rejected(&cmd, argv.len()) {
        return Execution::Rejected;
    }
    match cmd.as_slice() {
        b"keys" => return Execution::FanOut(FanOutKind::Keys),
        b"flushall" => return Execution::FanOut(FanOutKind::FlushAll),
        b"quit" => return Execution::FanOut(FanOutKind::Quit),
        b"script" => {
            if let Some(sub) = argv.get(1).map(|a| ascii_lower(a)) {
                return match sub.as_slice() {
                    b"load" => Execution::FanOut(FanOutKind::ScriptLoad),
                    b"flush" => Execution::FanOut(FanOutKind::ScriptFlush),
                    b"kill" => Execution::FanOut(FanOutKind::ScriptKill),
                    _ => Execution::SingleKey,
                };
            }
            return Execution::SingleKey;
        }
        b"pfmerge" | b"zrangestore" | b"rename" | b"renamenx" | b"sortstore" | b"copy" | b"bitop" => {
            return Execution::DestinationPinned;
        }
        _ => {}
    }
    Execution::SingleKey
}

/// Derive the argv position of the routing key, per `calcCommandSlot`.
/// Returns `None` when the command carries no routable key (out-of-bounds
/// index, or an `xread`/`xreadgroup` with no `streams` token).
pub fn derive_key_index(argv: &[Bytes]) -> Option<usize> {
    if argv.is_empty() {
        return None;
    }
    let mut cmd_index = 0usize;
    let mut key_index = 1usize;

    // Undocumented in the source; mirrored bit-for-bit per the design
    // notes, flagged here rather than silently dropped.
    if ascii_lower(&argv[0]) == b"ars" {
        cmd_index += 2;
        key_index += 2;
    }

    let cmd = ascii_lower(argv.get(cmd_index)?);
    match cmd.as_slice() {
        b"bitop" | b"xgroup" => key_index = cmd_index + 2,
        b"xread" | b"xreadgroup" => {
            let pos = argv.iter().position(|a| ascii_lower(a) == b"streams")?;
            key_index = pos + 1;
        }
        _ => {}
    }

    if key_index < argv.len() {
        Some(key_index)
    } else {
        None
    }
}

/// Connects slot derivation + same-slot validation + execution for one
/// cluster client. Generic over `H`, the connection handle type.
pub struct Dispatcher<H: Clone> {
    slots: SlotTable<H>,
}

impl<H: Clone> Dispatcher<H> {
    pub fn new(slots: SlotTable<H>) -> Self {
        Dispatcher { slots }
    }

    pub fn slots(&self) -> &SlotTable<H> {
        &self.slots
    }

    /// Resolve which connection owns a non-fan-out command. Multi-key and
    /// destination-pinned shapes are validated for same-slot membership
    /// before any connection is chosen.
    pub fn route(&self, argv: &[Bytes]) -> Result<&H, RoutingError> {
        match classify(argv) {
            Execution::Rejected => Err(RoutingError::ClusterNotSupported),
            Execution::FanOut(_) => Err(RoutingError::ClusterNotSupported),
            Execution::MultiKeySameSlot => {
                let keys = &argv[1..];
                SlotTable::<H>::all_same_slot(keys)?;
                self.route_key(&argv[1])
            }
            Execution::DestinationPinned => {
                let keys = &argv[1..];
                let slot = SlotTable::<H>::all_same_slot(keys)?;
                self.slots.route_slot(slot).ok_or(RoutingError::NoSuchSlot)
            }
            Execution::SingleKey => {
                let key_index = derive_key_index(argv).ok_or(RoutingError::NoSuchSlot)?;
                self.route_key(&argv[key_index])
            }
        }
    }

    fn route_key(&self, key: &[u8]) -> Result<&H, RoutingError> {
        self.slots.route(key).ok_or(RoutingError::NoSuchSlot)
    }
}

/// Aggregate a fan-out command's per-shard results per its kind's combine
/// rule. `results` is in arbitrary completion order, one entry per known
/// connection, each already a `Result` from that shard.
pub fn aggregate(
    kind: FanOutKind,
    results: Vec<Result<Packet, ConnectionError>>,
) -> Result<Packet, CoreError> {
    match kind {
        FanOutKind::Keys => {
            let mut all = Vec::new();
            for r in results {
                match r {
                    Ok(Packet::Array(Some(items))) => all.extend(items),
                    Ok(_) => return Err(CoreError::Routing(RoutingError::ClusterNotSupported)),
                    Err(e) => return Err(CoreError::Connection(e)),
                }
            }
            Ok(Packet::Array(Some(all)))
        }
        FanOutKind::ScriptLoad | FanOutKind::ScriptFlush | FanOutKind::ScriptKill | FanOutKind::FlushAll => {
            for r in results {
                if let Err(e) = r {
                    return Err(CoreError::Connection(e));
                }
            }
            Ok(Packet::ok())
        }
        FanOutKind::Quit => Ok(Packet::ok()),
    }
}

/// Runs a fan-out command against every known connection concurrently,
/// waiting for all of them (the count-down-latch pattern from the source).
/// The caller-supplied `exec` closure performs the actual I/O; this
/// function only owns the concurrency and aggregation shape. MUST NOT be
/// called from the I/O thread that owns the connections' buffers — it
/// blocks the calling thread until every shard answers.
pub fn fan_out<H, F>(dispatcher: &Dispatcher<H>, kind: FanOutKind, argv: &[Bytes], exec: F) -> Result<Packet, CoreError>
where
    H: Clone + Sync,
    F: Fn(&H, &[Bytes]) -> Result<Packet, ConnectionError> + Sync,
{
    let handles: Vec<&H> = dispatcher.slots().connections().collect();
    log::debug!("Dispatcher::fan_out: {kind:?} across {} shard(s)", handles.len());
    let (tx, rx) = crossbeam::channel::bounded(handles.len().max(1));
    std::thread::scope(|scope| {
        for handle in &handles {
            let tx = tx.clone();
            let exec = &exec;
            scope.spawn(move || {
                let _ = tx.send(exec(handle, argv));
            });
        }
        drop(tx);
        let mut results = Vec::with_capacity(handles.len());
        for _ in 0..handles.len() {
            if let Ok(r) = rx.recv() {
                if let Err(e) = &r {
                    log::warn!("Dispatcher::fan_out: shard failed during {kind:?}: {e}");
                }
                results.push(r);
            }
        }
        aggregate(kind, results)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(words: &[&str]) -> Vec<Bytes> {
        words.iter().map(|w| Bytes::copy_from_slice(w.as_bytes())).collect()
    }

    #[test]
    fn default_key_index_is_one() {
        assert_eq!(derive_key_index(&argv(&["get", "foo"])), Some(1));
    }

    #[test]
    fn bitop_keys_at_index_two() {
        assert_eq!(derive_key_index(&argv(&["bitop", "and", "dest"])), Some(2));
    }

    #[test]
    fn xgroup_keys_at_index_two() {
        assert_eq!(derive_key_index(&argv(&["xgroup", "create", "stream", "group"])), Some(2));
    }

    #[test]
    fn xread_scans_for_streams_token() {
        assert_eq!(
            derive_key_index(&argv(&["xread", "count", "2", "streams", "s1", "0"])),
            Some(4)
        );
    }

    #[test]
    fn xread_without_streams_token_is_unroutable() {
        assert_eq!(derive_key_index(&argv(&["xread", "count", "2"])), None);
    }

    #[test]
    fn ars_prefix_shifts_indices_by_two() {
        assert_eq!(derive_key_index(&argv(&["ars", "x", "get", "foo"])), Some(3));
    }

    #[test]
    fn mget_is_rejected_outright() {
        assert_eq!(classify(&argv(&["mget", "a", "b"])), Execution::Rejected);
    }

    #[test]
    fn del_with_multiple_keys_is_rejected_even_same_slot() {
        assert_eq!(
            classify(&argv(&["del", "{t}a", "{t}b"])),
            Execution::Rejected
        );
    }

    #[test]
    fn del_with_one_key_routes_normally() {
        assert_eq!(classify(&argv(&["del", "a"])), Execution::SingleKey);
    }

    #[test]
    fn script_load_fans_out() {
        assert_eq!(
            classify(&argv(&["script", "load", "return 1"])),
            Execution::FanOut(FanOutKind::ScriptLoad)
        );
    }

    #[test]
    fn aggregate_keys_concatenates_results() {
        let results = vec![
            Ok(Packet::Array(Some(vec![Packet::bulk("a")]))),
            Ok(Packet::Array(Some(vec![Packet::bulk("b")]))),
        ];
        let out = aggregate(FanOutKind::Keys, results).unwrap();
        assert_eq!(out, Packet::Array(Some(vec![Packet::bulk("a"), Packet::bulk("b")])));
    }

    #[test]
    fn aggregate_quit_ignores_individual_errors() {
        let results = vec![Err(ConnectionError::Disconnected), Ok(Packet::ok())];
        assert_eq!(aggregate(FanOutKind::Quit, results).unwrap(), Packet::ok());
    }

    #[test]
    fn aggregate_flushall_fails_if_any_shard_fails() {
        let results = vec![Ok(Packet::ok()), Err(ConnectionError::Timeout)];
        assert!(aggregate(FanOutKind::FlushAll, results).is_err());
    }
}
