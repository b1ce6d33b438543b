//! Geographic routing: greedy forwarding toward a destination's last
//! known position, falling back to a simplified perimeter mode, plus
//! geocast delivery to a circular region.

use std::collections::HashMap;

use crate::traits::GpsFix;

pub const LOCATION_BEACON_INTERVAL_MS: u64 = 60_000;
pub const LOCATION_TIMEOUT_MS: u64 = 10 * 60_000;
pub const LOCATION_TABLE_CAPACITY: usize = 32;
const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationBeacon {
    pub addr: u32,
    pub lat_e7: i32,
    pub lon_e7: i32,
    pub alt_m: i32,
    pub heading_deg: u16,
    pub speed_cms: u16,
    pub sats: u8,
    pub fix: GpsFix,
}

impl LocationBeacon {
    /// Not part of the fixed wire formats in spec §6; travels as the
    /// payload of a [`farlink_wire::PacketType::Location`] packet.
    pub const LEN: usize = 4 + 4 + 4 + 4 + 2 + 2 + 1 + 1;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[0..4].copy_from_slice(&self.addr.to_le_bytes());
        buf[4..8].copy_from_slice(&self.lat_e7.to_le_bytes());
        buf[8..12].copy_from_slice(&self.lon_e7.to_le_bytes());
        buf[12..16].copy_from_slice(&self.alt_m.to_le_bytes());
        buf[16..18].copy_from_slice(&self.heading_deg.to_le_bytes());
        buf[18..20].copy_from_slice(&self.speed_cms.to_le_bytes());
        buf[20] = self.sats;
        buf[21] = match self.fix {
            GpsFix::NoFix => 0,
            GpsFix::Fix2d => 1,
            GpsFix::Fix3d => 2,
        };
        buf
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < Self::LEN {
            return None;
        }
        let fix = match data[21] {
            1 => GpsFix::Fix2d,
            2 => GpsFix::Fix3d,
            _ => GpsFix::NoFix,
        };
        Some(Self {
            addr: u32::from_le_bytes(data[0..4].try_into().unwrap()),
            lat_e7: i32::from_le_bytes(data[4..8].try_into().unwrap()),
            lon_e7: i32::from_le_bytes(data[8..12].try_into().unwrap()),
            alt_m: i32::from_le_bytes(data[12..16].try_into().unwrap()),
            heading_deg: u16::from_le_bytes(data[16..18].try_into().unwrap()),
            speed_cms: u16::from_le_bytes(data[18..20].try_into().unwrap()),
            sats: data[20],
            fix,
        })
    }
}

/// Header carried by a [`farlink_wire::PacketType::Geocast`] packet,
/// ahead of the application payload: the circular region and the node
/// that originated the geocast (for dedup/reply addressing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeocastHeader {
    pub origin: u32,
    pub center_lat_e7: i32,
    pub center_lon_e7: i32,
    pub radius_cm: u32,
}

impl GeocastHeader {
    pub const LEN: usize = 4 + 4 + 4 + 4;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[0..4].copy_from_slice(&self.origin.to_le_bytes());
        buf[4..8].copy_from_slice(&self.center_lat_e7.to_le_bytes());
        buf[8..12].copy_from_slice(&self.center_lon_e7.to_le_bytes());
        buf[12..16].copy_from_slice(&self.radius_cm.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < Self::LEN {
            return None;
        }
        Some(Self {
            origin: u32::from_le_bytes(data[0..4].try_into().unwrap()),
            center_lat_e7: i32::from_le_bytes(data[4..8].try_into().unwrap()),
            center_lon_e7: i32::from_le_bytes(data[8..12].try_into().unwrap()),
            radius_cm: u32::from_le_bytes(data[12..16].try_into().unwrap()),
        })
    }

    pub fn radius_m(&self) -> f64 {
        self.radius_cm as f64 / 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct LocationEntry {
    beacon: LocationBeacon,
    last_seen_ms: u64,
}

/// Great-circle distance in meters between two `*1e7`-scaled coordinates.
pub fn haversine_m(lat1_e7: i32, lon1_e7: i32, lat2_e7: i32, lon2_e7: i32) -> f64 {
    let lat1 = (lat1_e7 as f64 / 1e7).to_radians();
    let lat2 = (lat2_e7 as f64 / 1e7).to_radians();
    let dlat = lat2 - lat1;
    let dlon = ((lon2_e7 as f64 / 1e7) - (lon1_e7 as f64 / 1e7)).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_M * c
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ForwardDecision {
    /// No known position for the destination or for ourselves.
    NoLocation,
    /// No neighbor makes progress; nothing left to try.
    NoProgress,
    Greedy { next_hop: u32 },
    /// Perimeter fallback: carry via the strongest-RSSI neighbor
    /// (simplified heuristic, not a full planar-graph right-hand rule;
    /// see `DESIGN.md`).
    Perimeter { next_hop: u32 },
}

#[derive(Default)]
pub struct LocationTable {
    entries: HashMap<u32, LocationEntry>,
}

impl LocationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_beacon(&mut self, beacon: LocationBeacon, now_ms: u64) {
        if self.entries.len() >= LOCATION_TABLE_CAPACITY && !self.entries.contains_key(&beacon.addr) {
            if let Some(oldest) = self.entries.values().min_by_key(|e| e.last_seen_ms).map(|e| e.beacon.addr) {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(beacon.addr, LocationEntry { beacon, last_seen_ms: now_ms });
    }

    pub fn get(&self, addr: u32) -> Option<LocationBeacon> {
        self.entries.get(&addr).map(|e| e.beacon)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn prune(&mut self, now_ms: u64) -> Vec<u32> {
        let stale: Vec<u32> =
            self.entries.values().filter(|e| now_ms.saturating_sub(e.last_seen_ms) > LOCATION_TIMEOUT_MS).map(|e| e.beacon.addr).collect();
        for addr in &stale {
            self.entries.remove(addr);
        }
        stale
    }

    /// Greedy-forwards toward `destination`: picks the neighbor whose
    /// distance to the destination is strictly less than our own.
    /// Falls back to perimeter mode (strongest-RSSI neighbor) if
    /// `gpsr_enabled` and no neighbor makes progress.
    pub fn forward(
        &self,
        own: LocationBeacon,
        destination: u32,
        neighbors_with_rssi: &[(u32, i16)],
        gpsr_enabled: bool,
    ) -> ForwardDecision {
        let Some(dest) = self.get(destination) else {
            return ForwardDecision::NoLocation;
        };
        let own_distance = haversine_m(own.lat_e7, own.lon_e7, dest.lat_e7, dest.lon_e7);

        let mut best: Option<(u32, f64)> = None;
        for &(addr, _) in neighbors_with_rssi {
            let Some(loc) = self.get(addr) else { continue };
            let d = haversine_m(loc.lat_e7, loc.lon_e7, dest.lat_e7, dest.lon_e7);
            if d < own_distance && best.is_none_or(|(_, best_d)| d < best_d) {
                best = Some((addr, d));
            }
        }
        if let Some((next_hop, _)) = best {
            return ForwardDecision::Greedy { next_hop };
        }
        if gpsr_enabled {
            if let Some((next_hop, _)) = neighbors_with_rssi.iter().max_by_key(|(_, rssi)| *rssi) {
                return ForwardDecision::Perimeter { next_hop: *next_hop };
            }
        }
        ForwardDecision::NoProgress
    }

    /// Geocast: a neighbor's distance to the region center under
    /// `2*radius_m` is eligible to carry the packet onward.
    pub fn geocast_candidates(&self, center_lat_e7: i32, center_lon_e7: i32, radius_m: f64, neighbors: &[u32]) -> Vec<u32> {
        neighbors
            .iter()
            .filter(|&&addr| {
                self.get(addr).is_some_and(|loc| haversine_m(loc.lat_e7, loc.lon_e7, center_lat_e7, center_lon_e7) < 2.0 * radius_m)
            })
            .copied()
            .collect()
    }

    /// Whether `own` sits inside the geocast region (distance to center `<= radius_m`).
    pub fn is_within_region(own: LocationBeacon, center_lat_e7: i32, center_lon_e7: i32, radius_m: f64) -> bool {
        haversine_m(own.lat_e7, own.lon_e7, center_lat_e7, center_lon_e7) <= radius_m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beacon(addr: u32, lat_e7: i32, lon_e7: i32) -> LocationBeacon {
        LocationBeacon { addr, lat_e7, lon_e7, alt_m: 0, heading_deg: 0, speed_cms: 0, sats: 6, fix: GpsFix::Fix3d }
    }

    #[test]
    fn haversine_zero_distance_for_identical_points() {
        assert_eq!(haversine_m(407_128_000, -740_060_000, 407_128_000, -740_060_000), 0.0);
    }

    #[test]
    fn greedy_picks_neighbor_strictly_closer_to_destination() {
        let mut table = LocationTable::new();
        let own = beacon(1, 0, 0);
        table.on_beacon(beacon(9, 0, 1_000_000), 0); // destination, 1e7-scaled far east
        table.on_beacon(beacon(2, 0, 500_000), 0); // neighbor halfway there
        table.on_beacon(beacon(3, 0, -500_000), 0); // neighbor moving away

        let neighbors = [(2, -60i16), (3, -60i16)];
        match table.forward(own, 9, &neighbors, false) {
            ForwardDecision::Greedy { next_hop } => assert_eq!(next_hop, 2),
            other => panic!("expected Greedy, got {other:?}"),
        }
    }

    #[test]
    fn perimeter_fallback_picks_strongest_rssi_when_no_progress() {
        let mut table = LocationTable::new();
        let own = beacon(1, 0, 1_000_000);
        table.on_beacon(beacon(9, 0, 1_000_000), 0);
        table.on_beacon(beacon(2, 0, 2_000_000), 0); // farther from destination than own

        let neighbors = [(2, -40i16)];
        match table.forward(own, 9, &neighbors, true) {
            ForwardDecision::Perimeter { next_hop } => assert_eq!(next_hop, 2),
            other => panic!("expected Perimeter, got {other:?}"),
        }
    }

    #[test]
    fn no_progress_without_gpsr_when_greedy_fails() {
        let mut table = LocationTable::new();
        let own = beacon(1, 0, 1_000_000);
        table.on_beacon(beacon(9, 0, 1_000_000), 0);
        table.on_beacon(beacon(2, 0, 2_000_000), 0);
        assert_eq!(table.forward(own, 9, &[(2, -40)], false), ForwardDecision::NoProgress);
    }

    #[test]
    fn geocast_includes_neighbors_within_twice_radius() {
        let mut table = LocationTable::new();
        table.on_beacon(beacon(2, 100, 100), 0);
        table.on_beacon(beacon(3, 500_000_000, 500_000_000), 0);
        let candidates = table.geocast_candidates(0, 0, 50_000.0, &[2, 3]);
        assert_eq!(candidates, vec![2]);
    }

    #[test]
    fn location_prune_respects_timeout() {
        let mut table = LocationTable::new();
        table.on_beacon(beacon(1, 0, 0), 0);
        assert!(table.prune(LOCATION_TIMEOUT_MS).is_empty());
        assert_eq!(table.prune(LOCATION_TIMEOUT_MS + 1), vec![1]);
    }

    #[test]
    fn location_beacon_roundtrips() {
        let b = beacon(7, 407_128_000, -740_060_000);
        let decoded = LocationBeacon::decode(&b.encode()).unwrap();
        assert_eq!(decoded, b);
    }

    #[test]
    fn geocast_header_roundtrips() {
        let h = GeocastHeader { origin: 3, center_lat_e7: 1, center_lon_e7: -1, radius_cm: 500_000 };
        let decoded = GeocastHeader::decode(&h.encode()).unwrap();
        assert_eq!(decoded, h);
        assert_eq!(decoded.radius_m(), 5000.0);
    }
}
