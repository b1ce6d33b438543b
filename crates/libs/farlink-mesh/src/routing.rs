//! AODV-like reactive routing: RREQ floods with duplicate suppression,
//! RREP installs routes along the reverse path, RERR invalidates them.
//!
//! The RREQ/RREP/RERR payload layouts aren't part of the fixed wire
//! formats in spec §6 (only the packet header and the handshake/bundle/
//! SOS/time-sync bodies are); they travel as the payload of a
//! [`farlink_wire::PacketType::Rreq`]/`Rrep`/`Rerr` packet, encoded here.

use std::collections::{HashMap, VecDeque};

pub const ROUTE_TIMEOUT_MS: u64 = 300_000;
const SEEN_RREQ_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    pub destination: u32,
    pub next_hop: u32,
    pub hop_count: u8,
    pub quality: u8,
    pub last_used_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RreqPayload {
    pub request_id: u32,
    pub origin: u32,
    pub destination: u32,
    pub hop_count: u8,
}

impl RreqPayload {
    pub const LEN: usize = 4 + 4 + 4 + 1;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[0..4].copy_from_slice(&self.request_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.origin.to_le_bytes());
        buf[8..12].copy_from_slice(&self.destination.to_le_bytes());
        buf[12] = self.hop_count;
        buf
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < Self::LEN {
            return None;
        }
        Some(Self {
            request_id: u32::from_le_bytes(data[0..4].try_into().unwrap()),
            origin: u32::from_le_bytes(data[4..8].try_into().unwrap()),
            destination: u32::from_le_bytes(data[8..12].try_into().unwrap()),
            hop_count: data[12],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RrepPayload {
    pub request_id: u32,
    pub origin: u32,
    pub destination: u32,
    pub hop_count: u8,
    pub min_quality: u8,
}

impl RrepPayload {
    pub const LEN: usize = 4 + 4 + 4 + 1 + 1;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[0..4].copy_from_slice(&self.request_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.origin.to_le_bytes());
        buf[8..12].copy_from_slice(&self.destination.to_le_bytes());
        buf[12] = self.hop_count;
        buf[13] = self.min_quality;
        buf
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < Self::LEN {
            return None;
        }
        Some(Self {
            request_id: u32::from_le_bytes(data[0..4].try_into().unwrap()),
            origin: u32::from_le_bytes(data[4..8].try_into().unwrap()),
            destination: u32::from_le_bytes(data[8..12].try_into().unwrap()),
            hop_count: data[12],
            min_quality: data[13],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RerrPayload {
    pub broken_next_hop: u32,
    pub unreachable_dest: u32,
}

impl RerrPayload {
    pub const LEN: usize = 8;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[0..4].copy_from_slice(&self.broken_next_hop.to_le_bytes());
        buf[4..8].copy_from_slice(&self.unreachable_dest.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < Self::LEN {
            return None;
        }
        Some(Self {
            broken_next_hop: u32::from_le_bytes(data[0..4].try_into().unwrap()),
            unreachable_dest: u32::from_le_bytes(data[4..8].try_into().unwrap()),
        })
    }
}

/// What the caller should do with a received RREQ.
pub enum RreqOutcome {
    Duplicate,
    /// We are the destination: send this RREP back the way it came.
    AnswerWithRrep(RrepPayload),
    /// Not the destination and not seen before: rebroadcast with an
    /// incremented hop count (`None` if the new hop count would hit `max_ttl`).
    Forward(Option<RreqPayload>),
}

pub struct RoutingTable {
    routes: HashMap<u32, RouteEntry>,
    seen_rreq: VecDeque<(u32, u32)>,
    /// Predecessor hop for each RREQ seen, keyed by `(origin, request_id)`,
    /// so a RREP can retrace the reverse path without a full route entry
    /// toward the origin existing yet.
    reverse_path: HashMap<(u32, u32), u32>,
    next_request_id: u32,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingTable {
    pub fn new() -> Self {
        Self { routes: HashMap::new(), seen_rreq: VecDeque::new(), reverse_path: HashMap::new(), next_request_id: 1 }
    }

    pub fn reverse_next_hop(&self, origin: u32, request_id: u32) -> Option<u32> {
        self.reverse_path.get(&(origin, request_id)).copied()
    }

    pub fn route_for(&self, destination: u32) -> Option<&RouteEntry> {
        self.routes.get(&destination)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.routes.values()
    }

    pub fn touch(&mut self, destination: u32, now_ms: u64) {
        if let Some(entry) = self.routes.get_mut(&destination) {
            entry.last_used_ms = now_ms;
        }
    }

    pub fn originate_rreq(&mut self, origin: u32, destination: u32) -> RreqPayload {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.mark_seen(origin, request_id);
        RreqPayload { request_id, origin, destination, hop_count: 0 }
    }

    fn mark_seen(&mut self, origin: u32, request_id: u32) -> bool {
        let key = (origin, request_id);
        if self.seen_rreq.contains(&key) {
            return false;
        }
        if self.seen_rreq.len() >= SEEN_RREQ_CAPACITY {
            self.seen_rreq.pop_front();
        }
        self.seen_rreq.push_back(key);
        true
    }

    pub fn on_rreq(&mut self, own_addr: u32, req: &RreqPayload, received_from: u32, max_ttl: u8) -> RreqOutcome {
        if !self.mark_seen(req.origin, req.request_id) {
            return RreqOutcome::Duplicate;
        }
        self.reverse_path.insert((req.origin, req.request_id), received_from);
        if req.destination == own_addr {
            return RreqOutcome::AnswerWithRrep(RrepPayload {
                request_id: req.request_id,
                origin: req.origin,
                destination: req.destination,
                hop_count: 0,
                min_quality: 255,
            });
        }
        let next_hop_count = req.hop_count + 1;
        if next_hop_count >= max_ttl {
            return RreqOutcome::Forward(None);
        }
        RreqOutcome::Forward(Some(RreqPayload { hop_count: next_hop_count, ..*req }))
    }

    /// Installs/refreshes a route to `rrep.destination` via `received_from`,
    /// applying the "shorter hop count, then higher quality" tie-break.
    /// Returns `true` if the route table changed.
    pub fn on_rrep(&mut self, rrep: &RrepPayload, received_from: u32, link_quality: u8, now_ms: u64) -> bool {
        let hop_count = rrep.hop_count + 1;
        let quality = rrep.min_quality.min(link_quality);
        let candidate = RouteEntry { destination: rrep.destination, next_hop: received_from, hop_count, quality, last_used_ms: now_ms };
        match self.routes.get(&rrep.destination) {
            Some(existing) if existing.hop_count < hop_count => false,
            Some(existing) if existing.hop_count == hop_count && existing.quality >= quality => false,
            _ => {
                self.routes.insert(rrep.destination, candidate);
                true
            }
        }
    }

    /// RERR: removes every route whose next hop is the failed node,
    /// returning the unreachable destinations.
    pub fn on_rerr(&mut self, broken_next_hop: u32) -> Vec<u32> {
        let dead: Vec<u32> =
            self.routes.values().filter(|r| r.next_hop == broken_next_hop).map(|r| r.destination).collect();
        for dest in &dead {
            self.routes.remove(dest);
        }
        dead
    }

    pub fn expire(&mut self, now_ms: u64) -> Vec<u32> {
        let stale: Vec<u32> = self
            .routes
            .values()
            .filter(|r| now_ms.saturating_sub(r.last_used_ms) > ROUTE_TIMEOUT_MS)
            .map(|r| r.destination)
            .collect();
        for dest in &stale {
            self.routes.remove(dest);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rreq_then_rrep_installs_route_then_rerr_removes_it() {
        let mut table = RoutingTable::new();
        let req = table.originate_rreq(1, 3);
        assert_eq!(req.hop_count, 0);

        let rrep = RrepPayload { request_id: req.request_id, origin: 1, destination: 3, hop_count: 1, min_quality: 200 };
        assert!(table.on_rrep(&rrep, 2, 220, 1_000));
        let route = table.route_for(3).unwrap();
        assert_eq!(route.next_hop, 2);
        assert_eq!(route.hop_count, 2);

        let removed = table.on_rerr(2);
        assert_eq!(removed, vec![3]);
        assert!(table.route_for(3).is_none());
    }

    #[test]
    fn duplicate_rreq_is_suppressed() {
        let mut table = RoutingTable::new();
        let req = RreqPayload { request_id: 42, origin: 1, destination: 9, hop_count: 0 };
        assert!(matches!(table.on_rreq(5, &req, 2, 15), RreqOutcome::Forward(Some(_))));
        assert!(matches!(table.on_rreq(5, &req, 2, 15), RreqOutcome::Duplicate));
    }

    #[test]
    fn destination_answers_with_rrep_instead_of_forwarding() {
        let mut table = RoutingTable::new();
        let req = RreqPayload { request_id: 1, origin: 1, destination: 5, hop_count: 2 };
        assert!(matches!(table.on_rreq(5, &req, 2, 15), RreqOutcome::AnswerWithRrep(_)));
    }

    #[test]
    fn shorter_hop_count_wins_over_existing_route() {
        let mut table = RoutingTable::new();
        let far = RrepPayload { request_id: 1, origin: 1, destination: 9, hop_count: 3, min_quality: 100 };
        table.on_rrep(&far, 2, 100, 0);
        let near = RrepPayload { request_id: 2, origin: 1, destination: 9, hop_count: 0, min_quality: 50 };
        assert!(table.on_rrep(&near, 7, 50, 0));
        assert_eq!(table.route_for(9).unwrap().next_hop, 7);
    }

    #[test]
    fn equal_hop_count_prefers_higher_quality() {
        let mut table = RoutingTable::new();
        let low = RrepPayload { request_id: 1, origin: 1, destination: 9, hop_count: 0, min_quality: 50 };
        table.on_rrep(&low, 2, 50, 0);
        let high = RrepPayload { request_id: 2, origin: 1, destination: 9, hop_count: 0, min_quality: 200 };
        assert!(table.on_rrep(&high, 3, 200, 0));
        assert_eq!(table.route_for(9).unwrap().next_hop, 3);
    }

    #[test]
    fn route_expires_after_inactivity_window() {
        let mut table = RoutingTable::new();
        let rrep = RrepPayload { request_id: 1, origin: 1, destination: 9, hop_count: 0, min_quality: 200 };
        table.on_rrep(&rrep, 2, 200, 0);
        assert!(table.expire(ROUTE_TIMEOUT_MS).is_empty());
        assert_eq!(table.expire(ROUTE_TIMEOUT_MS + 1), vec![9]);
    }
}
