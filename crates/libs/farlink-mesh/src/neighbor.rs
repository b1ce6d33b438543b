//! Neighbor table fed by Hello beacons. Link quality is an EWMA over
//! an RSSI-derived sample so a single weak reading doesn't immediately
//! tank a route; entries age out if beacons stop arriving.

use std::collections::HashMap;

pub const BEACON_INTERVAL_MS: u64 = 30_000;
pub const NEIGHBOR_TIMEOUT_MS: u64 = 5 * 60_000;
const QUALITY_ALPHA_NUM: i32 = 1;
const QUALITY_ALPHA_DEN: i32 = 4;
const RSSI_FLOOR_DBM: i32 = -110;
const RSSI_CEIL_DBM: i32 = -50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighborEntry {
    pub address: u32,
    pub rssi_dbm: i16,
    pub snr_db: i8,
    pub quality: u8,
    pub last_seen_ms: u64,
}

/// Maps an RSSI sample linearly into `[0,255]` over `[-110 dBm, -50 dBm]`.
pub fn rssi_to_quality_sample(rssi_dbm: i16) -> u8 {
    let clamped = (rssi_dbm as i32).clamp(RSSI_FLOOR_DBM, RSSI_CEIL_DBM);
    let span = RSSI_CEIL_DBM - RSSI_FLOOR_DBM;
    (((clamped - RSSI_FLOOR_DBM) * 255) / span) as u8
}

fn ewma(old: u8, sample: u8) -> u8 {
    let old = old as i32;
    let sample = sample as i32;
    let next = (QUALITY_ALPHA_NUM * sample + (QUALITY_ALPHA_DEN - QUALITY_ALPHA_NUM) * old) / QUALITY_ALPHA_DEN;
    next.clamp(0, 255) as u8
}

#[derive(Default)]
pub struct NeighborTable {
    entries: HashMap<u32, NeighborEntry>,
}

impl NeighborTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a beacon (or any received frame usable for link quality).
    /// Returns `true` if this neighbor was previously unknown.
    pub fn on_beacon(&mut self, address: u32, rssi_dbm: i16, snr_db: i8, now_ms: u64) -> bool {
        let sample = rssi_to_quality_sample(rssi_dbm);
        match self.entries.get_mut(&address) {
            Some(entry) => {
                entry.rssi_dbm = rssi_dbm;
                entry.snr_db = snr_db;
                entry.quality = ewma(entry.quality, sample);
                entry.last_seen_ms = now_ms;
                false
            }
            None => {
                self.entries.insert(
                    address,
                    NeighborEntry { address, rssi_dbm, snr_db, quality: sample, last_seen_ms: now_ms },
                );
                true
            }
        }
    }

    pub fn get(&self, address: u32) -> Option<&NeighborEntry> {
        self.entries.get(&address)
    }

    pub fn contains(&self, address: u32) -> bool {
        self.entries.contains_key(&address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NeighborEntry> {
        self.entries.values()
    }

    /// Removes entries strictly older than [`NEIGHBOR_TIMEOUT_MS`],
    /// returning the pruned addresses. An entry exactly at the timeout
    /// boundary is kept.
    pub fn prune(&mut self, now_ms: u64) -> Vec<u32> {
        let stale: Vec<u32> = self
            .entries
            .values()
            .filter(|e| now_ms.saturating_sub(e.last_seen_ms) > NEIGHBOR_TIMEOUT_MS)
            .map(|e| e.address)
            .collect();
        for addr in &stale {
            self.entries.remove(addr);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_beacon_creates_entry_with_sample_as_quality() {
        let mut table = NeighborTable::new();
        let is_new = table.on_beacon(1, -50, 5, 0);
        assert!(is_new);
        assert_eq!(table.get(1).unwrap().quality, 255);
    }

    #[test]
    fn ewma_blends_toward_new_sample() {
        let mut table = NeighborTable::new();
        table.on_beacon(1, -110, 0, 0); // quality 0
        table.on_beacon(1, -50, 0, 1_000); // sample 255, alpha 1/4
        assert_eq!(table.get(1).unwrap().quality, 63); // (255 + 0*3)/4
    }

    #[test]
    fn prune_boundary_is_exclusive() {
        let mut table = NeighborTable::new();
        table.on_beacon(1, -60, 0, 0);
        assert!(table.prune(NEIGHBOR_TIMEOUT_MS).is_empty(), "exactly at timeout must be kept");
        assert_eq!(table.prune(NEIGHBOR_TIMEOUT_MS + 1), vec![1]);
        assert!(table.is_empty());
    }
}
