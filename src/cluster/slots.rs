//! Cluster slot table: parses `CLUSTER NODES`, maintains the 16384-entry
//! slot→connection mapping, and answers routing queries. Built once at
//! cluster-client init; read-only afterwards. A topology change requires
//! reinitialization (see the open questions in the design notes — live
//! refresh is intentionally not in scope).

use crate::error::{ClusterInitError, RoutingError};
use crate::hash::{self, SLOTS_NUM};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// A 16384-entry slot table plus an address→handle intern map. Generic
/// over `H`, a cheaply-cloneable handle to a connection (an `Arc<dyn
/// Connection>`, an index into a pool, or similar) — the slot table
/// itself has no opinion on what a connection is.
pub struct SlotTable<H: Clone> {
    slots: Vec<Option<H>>,
    by_addr: HashMap<String, H>,
}

impl<H: Clone> Default for SlotTable<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Clone> SlotTable<H> {
    pub fn new() -> Self {
        SlotTable {
            slots: vec![None; SLOTS_NUM as usize],
            by_addr: HashMap::new(),
        }
    }

    /// Build a slot table from a `CLUSTER NODES` text reply. `make_handle`
    /// is invoked once per distinct master address, in encounter order; the
    /// resulting handle is interned and reused for every slot it owns.
    pub fn from_cluster_nodes<F>(text: &str, mut make_handle: F) -> Result<Self, ClusterInitError>
    where
        F: FnMut(&str) -> H,
    {
        let mut table = SlotTable::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((addr, ranges)) = parse_master_line(line) else {
                continue;
            };
            let is_new = !table.by_addr.contains_key(&addr);
            let handle = table
                .by_addr
                .entry(addr.clone())
                .or_insert_with(|| make_handle(&addr))
                .clone();
            if is_new {
                log::debug!("SlotTable::from_cluster_nodes: interned connection for {addr}");
            }
            for (start, end) in ranges {
                for slot in start..=end {
                    if (slot as usize) < table.slots.len() {
                        table.slots[slot as usize] = Some(handle.clone());
                    } else {
                        log::warn!(
                            "SlotTable::from_cluster_nodes: slot {slot} from {addr} is out of range, ignoring"
                        );
                    }
                }
            }
        }
        if table.slots.iter().any(Option::is_none) {
            return Err(ClusterInitError::SlotsNotInitialized);
        }
        Ok(table)
    }

    pub fn route(&self, key: &[u8]) -> Option<&H> {
        self.slots[hash::slot(key) as usize].as_ref()
    }

    pub fn route_slot(&self, slot: u16) -> Option<&H> {
        self.slots.get(slot as usize).and_then(|s| s.as_ref())
    }

    /// Pick some live connection without regard to which key it owns. The
    /// source uses `time(NULL) % SLOTS_NUM`; any reasonable source of
    /// variance is acceptable, so the selection is exposed as a pure
    /// function of a seconds counter for testability.
    pub fn route_random(&self) -> Option<&H> {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.route_slot(random_slot_from_seconds(secs))
    }

    pub fn connections(&self) -> impl Iterator<Item = &H> {
        self.by_addr.values()
    }

    /// Every key must hash to the same slot, or routing fails locally
    /// without touching the network.
    pub fn all_same_slot(keys: &[impl AsRef<[u8]>]) -> Result<u16, RoutingError> {
        let mut iter = keys.iter();
        let Some(first) = iter.next() else {
            return Err(RoutingError::ParamsEmpty);
        };
        let slot = hash::slot(first.as_ref());
        for key in iter {
            if hash::slot(key.as_ref()) != slot {
                return Err(RoutingError::NotInSameSlot);
            }
        }
        Ok(slot)
    }
}

pub fn random_slot_from_seconds(secs: u64) -> u16 {
    (secs % SLOTS_NUM as u64) as u16
}

/// Parse one `CLUSTER NODES` line. Returns `None` for non-master lines or
/// malformed ones (fewer than 9 whitespace-separated fields).
fn parse_master_line(line: &str) -> Option<(String, Vec<(u16, u16)>)> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 9 {
        return None;
    }
    let flags = fields[2];
    if !flags.split(',').any(|f| f == "master") {
        return None;
    }
    let addr_field = fields[1];
    let addr = addr_field.split('@').next().unwrap_or(addr_field).to_string();

    let mut ranges = Vec::new();
    for tok in &fields[8..] {
        if tok.starts_with('[') {
            break;
        }
        if let Some((a, b)) = tok.split_once('-') {
            if let (Ok(a), Ok(b)) = (a.parse::<u16>(), b.parse::<u16>()) {
                ranges.push((a, b));
            }
        } else if let Ok(n) = tok.parse::<u16>() {
            ranges.push((n, n));
        }
    }
    Some((addr, ranges))
}
