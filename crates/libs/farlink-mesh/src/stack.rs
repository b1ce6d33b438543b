//! The mesh core: owns every subsystem behind one radio and dispatches
//! received frames to them, replacing the source's single monolithic
//! receive loop with a typed [`NodeStack::handle_inbound`]/[`NodeStack::tick`]
//! pair that returns [`MeshEvent`]s instead of invoking callbacks.
//!
//! # Packet header addressing convention
//!
//! [`farlink_wire::PacketHeader`] carries `source`/`destination`/`next_hop`,
//! but their meaning is type-dependent:
//!
//! - Point-to-point types (`Data`, `Ack`, `LinkRequest`, `LinkAccept`,
//!   `LinkData`, `Dtn`, unicast `Rrep`/`Rerr`): `source`/`destination` are
//!   the fixed logical endpoints; `next_hop` is the specific neighbor
//!   chosen for this hop, and a receiver ignores the frame unless
//!   `next_hop == own address` (or the destination is broadcast).
//! - Flooded `Rreq`: `destination` is `ADDRESS_BROADCAST` for the whole
//!   flood, but `source` is overloaded to mean "whoever is transmitting
//!   this specific copy" (it changes at every rebroadcast) — the origin
//!   and request id travel in [`crate::routing::RreqPayload`] instead.
//!   This lets [`crate::routing::RoutingTable::reverse_next_hop`] learn
//!   which neighbor to hand the eventual `Rrep` back to, something
//!   nothing else in the header would otherwise carry.
//! - Single-hop `Hello`/`Beacon`/`TimeSync`: never forwarded, `source`
//!   is simply the beaconing node.
//! - Broadcast `Sos`/`Data`/`Dtn` epidemic copies: `source` is the fixed
//!   true origin (needed for the seen-set dedup below); relays leave it
//!   untouched and only bump `hop_count`.

use std::collections::{HashMap, VecDeque};

use farlink_crypto::{CryptoError, Session, SessionState};
use farlink_wire::{
    BundleFlags, BundleHeader, BundlePriority, LinkAccept, LinkDataHeader, LinkRequest, Packet,
    PacketFlags, PacketHeader, PacketType, SosMessage, TimeSyncMessage, ADDRESS_BROADCAST,
};
use rand_core::OsRng;

use crate::config::MeshConfig;
use crate::dtn::{BundleEvent, CustodySignal, DtnTable, DTN_FRAGMENT_SIZE};
use crate::error::{MeshError, MeshResult};
use crate::events::MeshEvent;
use crate::geo::{GeocastHeader, LocationBeacon, LocationTable};
use crate::mac::{Mac, MacAction};
use crate::neighbor::NeighborTable;
use crate::routing::{RerrPayload, RoutingTable, RreqOutcome, RreqPayload, RrepPayload};
use crate::sos::SosSubsystem;
use crate::store_forward::StoreForwardQueue;
use crate::time_sync::TimeAuthority;
use crate::traits::{GpsFix, GpsReading, RadioDevice};

/// Highest: emergency traffic preempts everything else.
pub const PRIO_EMERGENCY: u8 = 3;
pub const PRIO_ROUTING: u8 = 2;
pub const PRIO_DATA: u8 = 1;
pub const PRIO_BACKGROUND: u8 = 0;

/// Spec names `LINK_HANDSHAKE_TIMEOUT` without pinning a number; set in
/// the same order of magnitude as the crypto layer's own keepalive.
pub const LINK_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
/// Lower bound from spec §4.5 ("seen-set, ≥256 entries, LRU eviction").
pub const SEEN_SET_CAPACITY: usize = 256;
/// Spec §7's `AuthFailure` policy ("on repeated failures within a
/// window, close the link") without pinning a count; set to the same
/// order of magnitude as `max_retries`.
pub const LINK_AUTH_FAILURE_LIMIT: u8 = 3;
pub const LINK_AUTH_FAILURE_WINDOW_SECS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AckPayload {
    packet_id: u16,
}

impl AckPayload {
    const LEN: usize = 2;

    fn encode(self) -> [u8; Self::LEN] {
        self.packet_id.to_le_bytes()
    }

    fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < Self::LEN {
            return None;
        }
        Some(Self { packet_id: u16::from_le_bytes(data[0..2].try_into().unwrap()) })
    }
}

struct PendingAck {
    destination: u32,
    packet_id: u16,
    frame: Vec<u8>,
    sent_at_ms: u64,
    retries: u8,
}

struct PendingHandshake {
    request: LinkRequest,
    requested_at_ms: u64,
    retries: u8,
}

/// Counts `LinkData` auth failures from one peer within a sliding window,
/// so `on_link_data` can close the link once they pile up instead of
/// logging forever (spec §7's `AuthFailure` policy).
struct AuthFailureWindow {
    count: u8,
    window_start_secs: u32,
}

/// Everything behind one radio: MAC, neighbor/routing tables,
/// store-and-forward, DTN, geographic routing, SOS and encrypted
/// sessions. One instance per physical node.
pub struct NodeStack<R: RadioDevice> {
    config: MeshConfig,
    radio: R,
    neighbors: NeighborTable,
    routing: RoutingTable,
    mac: Mac,
    time: TimeAuthority,
    store_forward: StoreForwardQueue,
    dtn: DtnTable,
    geo: LocationTable,
    sos: SosSubsystem,
    sessions: HashMap<u32, Session>,
    pending_handshakes: HashMap<u32, PendingHandshake>,
    pending_acks: Vec<PendingAck>,
    auth_failures: HashMap<u32, AuthFailureWindow>,
    own_location: Option<LocationBeacon>,
    battery_pct: u8,
    seen: VecDeque<(u32, u16)>,
    next_packet_id: u16,
    next_beacon_due_ms: u64,
    next_location_beacon_due_ms: u64,
}

impl<R: RadioDevice> NodeStack<R> {
    pub fn new(config: MeshConfig, radio: R) -> Self {
        let own_addr = config.node_address;
        let tdma_enabled = config.tdma_enabled;
        Self {
            mac: Mac::new(own_addr, tdma_enabled),
            time: TimeAuthority::new(own_addr),
            config,
            radio,
            neighbors: NeighborTable::new(),
            routing: RoutingTable::new(),
            store_forward: StoreForwardQueue::new(),
            dtn: DtnTable::new(),
            geo: LocationTable::new(),
            sos: SosSubsystem::new(),
            sessions: HashMap::new(),
            pending_handshakes: HashMap::new(),
            pending_acks: Vec::new(),
            auth_failures: HashMap::new(),
            own_location: None,
            battery_pct: 100,
            seen: VecDeque::new(),
            next_packet_id: 0,
            next_beacon_due_ms: 0,
            next_location_beacon_due_ms: 0,
        }
    }

    pub fn own_address(&self) -> u32 {
        self.config.node_address
    }

    pub fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    pub fn dtn(&self) -> &DtnTable {
        &self.dtn
    }

    pub fn sos(&self) -> &SosSubsystem {
        &self.sos
    }

    pub fn set_battery_pct(&mut self, pct: u8) {
        self.battery_pct = pct;
    }

    /// Feeds a fresh GPS fix in; used for outgoing location beacons,
    /// geographic-routing decisions and the position carried in our
    /// own SOS broadcasts.
    pub fn update_location(&mut self, reading: GpsReading) {
        self.own_location = Some(LocationBeacon {
            addr: self.own_address(),
            lat_e7: reading.lat_e7,
            lon_e7: reading.lon_e7,
            alt_m: reading.alt_m,
            heading_deg: 0,
            speed_cms: 0,
            sats: reading.sats,
            fix: reading.fix,
        });
    }

    fn next_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = self.next_packet_id.wrapping_add(1);
        id
    }

    fn mark_seen(&mut self, source: u32, packet_id: u16) -> bool {
        let key = (source, packet_id);
        if self.seen.contains(&key) {
            return false;
        }
        if self.seen.len() >= SEEN_SET_CAPACITY {
            self.seen.pop_front();
        }
        self.seen.push_back(key);
        true
    }

    fn enqueue(&mut self, priority: u8, packet: Packet) {
        self.mac.enqueue(priority, packet.encode());
    }

    #[allow(clippy::too_many_arguments)]
    fn build_header(
        &mut self,
        packet_type: PacketType,
        flags: PacketFlags,
        source: u32,
        destination: u32,
        next_hop: u32,
        hop_count: u8,
        payload_length: u16,
    ) -> MeshResult<PacketHeader> {
        let packet_id = self.next_id();
        PacketHeader::new(
            packet_type,
            self.config.max_ttl,
            flags,
            packet_id,
            source,
            destination,
            next_hop,
            hop_count,
            0,
            payload_length,
        )
        .map_err(MeshError::MalformedFrame)
    }

    // ---- control surface -------------------------------------------------

    /// Sends application data to `destination`. Uses the encrypted
    /// session if one is active and forward secrecy is enabled,
    /// otherwise a routed plaintext `Data` packet; falls back to
    /// store-and-forward plus a handshake/route kickoff when neither a
    /// session nor a route exists yet.
    pub fn send(&mut self, destination: u32, payload: &[u8], reliable: bool, now_ms: u64, now_secs: u32) -> MeshResult<()> {
        if payload.len() > self.config.max_payload {
            return Err(MeshError::RadioError("payload exceeds max_payload".into()));
        }

        if self.config.forward_secrecy_enabled {
            if let Some(session) = self.sessions.get_mut(&destination) {
                if session.state() == SessionState::Active {
                    let (link_header, body) = session.encrypt(payload).map_err(MeshError::AuthFailure)?;
                    let mut frame = link_header.encode().to_vec();
                    frame.extend_from_slice(&body);
                    let next_hop = self.routing.route_for(destination).map(|r| r.next_hop).unwrap_or(destination);
                    let header = self.build_header(
                        PacketType::LinkData,
                        PacketFlags::ENCRYPTED,
                        self.own_address(),
                        destination,
                        next_hop,
                        0,
                        frame.len() as u16,
                    )?;
                    self.enqueue(PRIO_DATA, Packet::new(header, frame)?);
                    return Ok(());
                }
            }
        }

        let routed_hop = if destination == ADDRESS_BROADCAST {
            Some(ADDRESS_BROADCAST)
        } else if self.neighbors.contains(destination) {
            Some(destination)
        } else {
            self.routing.route_for(destination).map(|r| r.next_hop).or_else(|| self.geo_next_hop(destination))
        };
        let Some(next_hop) = routed_hop else {
            self.store_forward
                .enqueue(destination, PRIO_DATA, payload.to_vec(), now_ms)
                .map_err(|_| MeshError::CapacityExhausted { table: "store_forward" })?;
            if self.config.forward_secrecy_enabled && !self.sessions.contains_key(&destination) {
                self.request_link(destination, now_ms, now_secs)?;
            } else {
                self.originate_rreq(destination);
            }
            return Ok(());
        };
        let mut flags = PacketFlags::empty();
        if reliable && destination != ADDRESS_BROADCAST {
            flags |= PacketFlags::ACK_REQUESTED;
        }
        let header = self.build_header(
            PacketType::Data,
            flags,
            self.own_address(),
            destination,
            next_hop,
            0,
            payload.len() as u16,
        )?;
        if reliable && destination != ADDRESS_BROADCAST {
            self.pending_acks.push(PendingAck {
                destination,
                packet_id: header.packet_id,
                frame: Packet::new(header, payload.to_vec())?.encode(),
                sent_at_ms: now_ms,
                retries: 0,
            });
        }
        self.enqueue(PRIO_DATA, Packet::new(header, payload.to_vec())?);
        Ok(())
    }

    pub fn broadcast(&mut self, payload: &[u8], now_ms: u64, now_secs: u32) -> MeshResult<()> {
        self.send(ADDRESS_BROADCAST, payload, false, now_ms, now_secs)
    }

    fn originate_rreq(&mut self, destination: u32) {
        let req = self.routing.originate_rreq(self.own_address(), destination);
        self.flood_rreq(req);
    }

    fn flood_rreq(&mut self, req: RreqPayload) {
        let payload = req.encode().to_vec();
        let header = match self.build_header(
            PacketType::Rreq,
            PacketFlags::empty(),
            self.own_address(),
            ADDRESS_BROADCAST,
            ADDRESS_BROADCAST,
            req.hop_count,
            payload.len() as u16,
        ) {
            Ok(h) => h,
            Err(_) => return,
        };
        if let Ok(packet) = Packet::new(header, payload) {
            self.enqueue(PRIO_ROUTING, packet);
        }
    }

    fn send_rrep(&mut self, rrep: RrepPayload, next_hop: u32) {
        let payload = rrep.encode().to_vec();
        let header = match self.build_header(
            PacketType::Rrep,
            PacketFlags::empty(),
            self.own_address(),
            rrep.origin,
            next_hop,
            0,
            payload.len() as u16,
        ) {
            Ok(h) => h,
            Err(_) => return,
        };
        if let Ok(packet) = Packet::new(header, payload) {
            self.enqueue(PRIO_ROUTING, packet);
        }
    }

    fn send_rerr(&mut self, target: u32, next_hop: u32, rerr: RerrPayload) {
        let payload = rerr.encode().to_vec();
        let header = match self.build_header(
            PacketType::Rerr,
            PacketFlags::empty(),
            self.own_address(),
            target,
            next_hop,
            0,
            payload.len() as u16,
        ) {
            Ok(h) => h,
            Err(_) => return,
        };
        if let Ok(packet) = Packet::new(header, payload) {
            self.enqueue(PRIO_ROUTING, packet);
        }
    }

    fn send_ack(&mut self, destination: u32, packet_id: u16) {
        let payload = AckPayload { packet_id }.encode().to_vec();
        let next_hop = self.routing.route_for(destination).map(|r| r.next_hop).unwrap_or(destination);
        let header = match self.build_header(
            PacketType::Ack,
            PacketFlags::empty(),
            self.own_address(),
            destination,
            next_hop,
            0,
            payload.len() as u16,
        ) {
            Ok(h) => h,
            Err(_) => return,
        };
        if let Ok(packet) = Packet::new(header, payload) {
            self.enqueue(PRIO_DATA, packet);
        }
    }

    /// Begins an encrypted session handshake with `peer`, sending a
    /// `LinkRequest` and arming the retry timer.
    pub fn request_link(&mut self, peer: u32, now_ms: u64, now_secs: u32) -> MeshResult<()> {
        let (session, request) = Session::initiate(self.own_address(), peer, now_secs);
        self.sessions.insert(peer, session);
        self.pending_handshakes.insert(peer, PendingHandshake { request: request.clone(), requested_at_ms: now_ms, retries: 0 });
        self.send_link_request(peer, &request)
    }

    /// Drops any session/handshake state toward `peer`. The host is
    /// responsible for surfacing `MeshEvent::LinkClosed` if it cares.
    pub fn close_link(&mut self, peer: u32) -> bool {
        let had_session = self.sessions.remove(&peer).is_some();
        let had_handshake = self.pending_handshakes.remove(&peer).is_some();
        had_session || had_handshake
    }

    fn send_link_request(&mut self, peer: u32, request: &LinkRequest) -> MeshResult<()> {
        let payload = request.encode().to_vec();
        let header = self.build_header(
            PacketType::LinkRequest,
            PacketFlags::empty(),
            self.own_address(),
            peer,
            peer,
            0,
            payload.len() as u16,
        )?;
        self.enqueue(PRIO_ROUTING, Packet::new(header, payload)?);
        Ok(())
    }

    // ---- SOS ---------------------------------------------------------

    pub fn activate_sos(&mut self, sos_type: farlink_wire::SosType, flags: u8, message_text: String, now_ms: u64) -> bool {
        self.sos.activate(sos_type, flags, message_text, now_ms)
    }

    pub fn cancel_sos(&mut self) {
        self.sos.cancel();
        self.radio.set_emergency_mode(false);
    }

    pub fn sos_ack(&mut self, src: u32) -> bool {
        self.sos.ack(src)
    }

    // ---- DTN -----------------------------------------------------------

    /// Splits `payload` into bundle fragments and enqueues them all. A
    /// unicast bundle with `custody` set is parked in `CustodyWait` until
    /// the next hop signals acceptance (or `custody_timeout_tick` gives up
    /// and retries it).
    pub fn send_bundle(
        &mut self,
        destination: u32,
        payload: &[u8],
        priority: BundlePriority,
        custody: bool,
        now_ms: u64,
        now_secs: u32,
    ) -> MeshResult<()> {
        let epidemic = self.config.epidemic_enabled && destination == ADDRESS_BROADCAST;
        let frames = self
            .dtn
            .create_bundle(self.own_address(), destination, payload, priority, custody, epidemic, self.config.max_ttl, now_secs)
            .map_err(|_| MeshError::CapacityExhausted { table: "dtn" })?;
        let next_hop = if destination == ADDRESS_BROADCAST {
            ADDRESS_BROADCAST
        } else {
            self.routing.route_for(destination).map(|r| r.next_hop).unwrap_or(destination)
        };
        if custody && destination != ADDRESS_BROADCAST {
            if let Some((header, _)) = frames.first() {
                self.dtn.mark_custody_wait(header.bundle_id, now_ms);
            }
        }
        for (header, chunk) in frames {
            self.send_bundle_frame(&header, &chunk, next_hop);
        }
        Ok(())
    }

    fn send_bundle_frame(&mut self, header: &BundleHeader, chunk: &[u8], next_hop: u32) {
        let mut frame = header.encode().to_vec();
        frame.extend_from_slice(chunk);
        let pkt_header = match self.build_header(
            PacketType::Dtn,
            PacketFlags::empty(),
            self.own_address(),
            header.destination,
            next_hop,
            header.hop_count,
            frame.len() as u16,
        ) {
            Ok(h) => h,
            Err(_) => return,
        };
        if let Ok(packet) = Packet::new(pkt_header, frame) {
            let prio = if header.priority == BundlePriority::Emergency { PRIO_EMERGENCY } else { PRIO_DATA };
            self.enqueue(prio, packet);
        }
    }

    /// Signals custody acceptance (or rejection) for `bundle_id` back to
    /// `custodian` — the node this bundle was just received from — over a
    /// `Dtn`-type packet carrying a [`CustodySignal`] instead of a bundle
    /// fragment, distinguished by `PacketFlags::CUSTODY_SIGNAL`.
    fn send_custody_signal(&mut self, custodian: u32, sig: CustodySignal) {
        let payload = sig.encode().to_vec();
        let pkt_header = match self.build_header(
            PacketType::Dtn,
            PacketFlags::CUSTODY_SIGNAL,
            self.own_address(),
            custodian,
            custodian,
            0,
            payload.len() as u16,
        ) {
            Ok(h) => h,
            Err(_) => return,
        };
        if let Ok(packet) = Packet::new(pkt_header, payload) {
            self.enqueue(PRIO_ROUTING, packet);
        }
    }

    /// Re-splits an already-reassembled bundle (received for relay or
    /// epidemic re-forward) into fresh on-air fragments under the same
    /// `bundle_id`.
    fn forward_bundle(&mut self, header: &BundleHeader, payload: &[u8], next_hop: u32) {
        let chunks: Vec<&[u8]> = if payload.is_empty() { vec![&payload[..]] } else { payload.chunks(DTN_FRAGMENT_SIZE).collect() };
        let frag_count = chunks.len() as u8;
        for (i, chunk) in chunks.into_iter().enumerate() {
            let frag_header = BundleHeader {
                frag_offset: i as u8,
                frag_count,
                payload_length: chunk.len() as u16,
                ..*header
            };
            self.send_bundle_frame(&frag_header, chunk, next_hop);
        }
    }

    // ---- inbound dispatch ----------------------------------------------

    /// Decodes and dispatches one received radio frame, returning every
    /// event the host application should see.
    pub fn handle_inbound(&mut self, raw: &[u8], rssi_dbm: i16, snr_db: i8, now_ms: u64, now_secs: u32) -> Vec<MeshEvent> {
        let packet = match Packet::decode(raw) {
            Ok(p) => p,
            Err(e) => {
                log::debug!("node({:#010x}): dropping malformed frame: {e}", self.own_address());
                return Vec::new();
            }
        };
        let header = packet.header;
        if header.source == self.own_address() {
            return Vec::new();
        }
        if !self.mark_seen(header.source, header.packet_id) {
            return Vec::new();
        }

        let mut events = Vec::new();
        match header.packet_type {
            PacketType::Hello | PacketType::Beacon => {
                let is_new = self.neighbors.on_beacon(header.source, rssi_dbm, snr_db, now_ms);
                if is_new {
                    self.store_forward.on_neighbor_discovered(header.source);
                }
            }
            PacketType::TimeSync => {
                if let Ok(msg) = TimeSyncMessage::decode(&packet.payload) {
                    self.time.accept(&msg, now_ms);
                }
            }
            PacketType::Rreq => self.on_rreq(&header, &packet.payload),
            PacketType::Rrep => self.on_rrep(&header, &packet.payload, now_ms),
            PacketType::Rerr => self.on_rerr(&header, &packet.payload),
            PacketType::Ack => self.on_ack(&header, &packet.payload),
            PacketType::Data => self.on_data(&header, &packet.payload, rssi_dbm, snr_db, &mut events),
            PacketType::Sos => self.on_sos(&header, &packet.payload, rssi_dbm, now_ms, &mut events),
            PacketType::Geocast => self.on_geocast(&header, &packet.payload, rssi_dbm, snr_db, now_ms, &mut events),
            PacketType::Location => {
                if let Some(beacon) = LocationBeacon::decode(&packet.payload) {
                    self.geo.on_beacon(beacon, now_ms);
                }
            }
            PacketType::LinkRequest => self.on_link_request(&header, &packet.payload, now_secs, &mut events),
            PacketType::LinkAccept => self.on_link_accept(&header, &packet.payload, now_secs, &mut events),
            PacketType::LinkData => self.on_link_data(&header, &packet.payload, now_secs, rssi_dbm, snr_db, &mut events),
            PacketType::Dtn => self.on_dtn(&header, &packet.payload, now_secs, &mut events),
            PacketType::Telemetry => {}
        }
        events
    }

    fn on_rreq(&mut self, header: &PacketHeader, payload: &[u8]) {
        let Some(req) = RreqPayload::decode(payload) else { return };
        match self.routing.on_rreq(self.own_address(), &req, header.source, self.config.max_ttl) {
            RreqOutcome::Duplicate => {}
            RreqOutcome::AnswerWithRrep(rrep) => {
                if let Some(next_hop) = self.routing.reverse_next_hop(rrep.origin, rrep.request_id) {
                    self.send_rrep(rrep, next_hop);
                }
            }
            RreqOutcome::Forward(Some(next_req)) => self.flood_rreq(next_req),
            RreqOutcome::Forward(None) => {}
        }
    }

    fn on_rrep(&mut self, header: &PacketHeader, payload: &[u8], now_ms: u64) {
        let Some(rrep) = RrepPayload::decode(payload) else { return };
        let link_quality = self.neighbors.get(header.source).map(|n| n.quality).unwrap_or(128);
        self.routing.on_rrep(&rrep, header.source, link_quality, now_ms);
        if rrep.origin != self.own_address() {
            if let Some(next_hop) = self.routing.reverse_next_hop(rrep.origin, rrep.request_id) {
                self.send_rrep(RrepPayload { hop_count: rrep.hop_count + 1, ..rrep }, next_hop);
            }
        }
    }

    fn on_rerr(&mut self, header: &PacketHeader, payload: &[u8]) {
        let Some(rerr) = RerrPayload::decode(payload) else { return };
        self.routing.on_rerr(rerr.broken_next_hop);
        if header.destination != self.own_address() {
            if let Some(route) = self.routing.route_for(header.destination) {
                self.send_rerr(header.destination, route.next_hop, rerr);
            }
        }
    }

    fn on_ack(&mut self, header: &PacketHeader, payload: &[u8]) {
        if header.destination != self.own_address() {
            return;
        }
        let Some(ack) = AckPayload::decode(payload) else { return };
        self.pending_acks.retain(|p| !(p.destination == header.source && p.packet_id == ack.packet_id));
        self.store_forward.on_ack(ack.packet_id as u32);
    }

    fn on_data(&mut self, header: &PacketHeader, payload: &[u8], rssi_dbm: i16, snr_db: i8, events: &mut Vec<MeshEvent>) {
        let is_broadcast = header.is_broadcast();
        if !is_broadcast && header.next_hop != self.own_address() {
            return;
        }
        if header.destination == self.own_address() || is_broadcast {
            events.push(MeshEvent::Message { src: header.source, payload: payload.to_vec(), rssi: rssi_dbm, snr: snr_db });
            if header.flags.contains(PacketFlags::ACK_REQUESTED) && !is_broadcast {
                self.send_ack(header.source, header.packet_id);
            }
        }
        if is_broadcast {
            if header.hop_count + 1 < self.config.max_ttl {
                self.forward_broadcast(header, payload, PRIO_DATA);
            }
        } else if header.destination != self.own_address() {
            self.forward_unicast(header, payload);
        }
    }

    fn forward_broadcast(&mut self, header: &PacketHeader, payload: &[u8], priority: u8) {
        let new_header = match self.build_header(
            header.packet_type,
            header.flags,
            header.source,
            ADDRESS_BROADCAST,
            self.own_address(),
            header.hop_count + 1,
            payload.len() as u16,
        ) {
            Ok(h) => PacketHeader { packet_id: header.packet_id, ..h },
            Err(_) => return,
        };
        if let Ok(packet) = Packet::new(new_header, payload.to_vec()) {
            self.enqueue(priority, packet);
        }
    }

    fn forward_unicast(&mut self, header: &PacketHeader, payload: &[u8]) {
        if header.hop_count + 1 >= self.config.max_ttl {
            self.send_rerr_toward_source(header);
            return;
        }
        let next_hop = self.routing.route_for(header.destination).map(|r| r.next_hop).or_else(|| self.geo_next_hop(header.destination));
        match next_hop {
            Some(next_hop) => {
                let new_header = match self.build_header(
                    header.packet_type,
                    header.flags,
                    header.source,
                    header.destination,
                    next_hop,
                    header.hop_count + 1,
                    payload.len() as u16,
                ) {
                    Ok(h) => PacketHeader { packet_id: header.packet_id, ..h },
                    Err(_) => return,
                };
                if let Ok(packet) = Packet::new(new_header, payload.to_vec()) {
                    self.enqueue(PRIO_DATA, packet);
                }
            }
            None => self.send_rerr_toward_source(header),
        }
    }

    /// Greedy/perimeter geographic forwarding, used when AODV has no
    /// route at all (spec §4.10 is a fallback mode, not the primary router).
    fn geo_next_hop(&self, destination: u32) -> Option<u32> {
        let own = self.own_location?;
        let neighbors_with_rssi: Vec<(u32, i16)> = self.neighbors.iter().map(|n| (n.address, n.rssi_dbm)).collect();
        match self.geo.forward(own, destination, &neighbors_with_rssi, self.config.gpsr_enabled) {
            crate::geo::ForwardDecision::Greedy { next_hop } | crate::geo::ForwardDecision::Perimeter { next_hop } => Some(next_hop),
            crate::geo::ForwardDecision::NoLocation | crate::geo::ForwardDecision::NoProgress => None,
        }
    }

    /// TTL exhausted (or no route) while relaying a unicast frame:
    /// hands a `Rerr` back toward `header.source`, per spec §4.4.
    fn send_rerr_toward_source(&mut self, header: &PacketHeader) {
        if let Some(route) = self.routing.route_for(header.source) {
            let rerr = RerrPayload { broken_next_hop: self.own_address(), unreachable_dest: header.destination };
            self.send_rerr(header.source, route.next_hop, rerr);
        }
    }

    fn on_sos(&mut self, header: &PacketHeader, payload: &[u8], rssi_dbm: i16, now_ms: u64, events: &mut Vec<MeshEvent>) {
        let Ok(msg) = SosMessage::decode(payload) else { return };
        self.sos.on_received(header.source, msg.clone(), rssi_dbm, now_ms);
        events.push(MeshEvent::SosReceived { src: header.source, sos_type: msg.sos_type, message: msg.message.clone(), rssi: rssi_dbm });
        if header.is_broadcast() && header.hop_count + 1 < self.config.max_ttl {
            self.forward_broadcast(header, payload, PRIO_EMERGENCY);
        }
    }

    fn on_geocast(
        &mut self,
        header: &PacketHeader,
        payload: &[u8],
        rssi_dbm: i16,
        snr_db: i8,
        now_ms: u64,
        events: &mut Vec<MeshEvent>,
    ) {
        let Some(geo_header) = GeocastHeader::decode(payload) else { return };
        let body = &payload[GeocastHeader::LEN..];
        if let Some(own) = self.own_location {
            if LocationTable::is_within_region(own, geo_header.center_lat_e7, geo_header.center_lon_e7, geo_header.radius_m()) {
                events.push(MeshEvent::Message { src: geo_header.origin, payload: body.to_vec(), rssi: rssi_dbm, snr: snr_db });
            }
        }
        if header.hop_count + 1 < self.config.max_ttl {
            let in_range = self
                .own_location
                .map(|own| {
                    crate::geo::haversine_m(own.lat_e7, own.lon_e7, geo_header.center_lat_e7, geo_header.center_lon_e7)
                        < 2.0 * geo_header.radius_m()
                })
                .unwrap_or(true);
            if in_range {
                self.forward_broadcast(header, payload, PRIO_ROUTING);
            }
        }
        let _ = now_ms;
    }

    fn on_link_request(&mut self, header: &PacketHeader, payload: &[u8], now_secs: u32, events: &mut Vec<MeshEvent>) {
        if header.destination != self.own_address() {
            return;
        }
        let Ok(req) = LinkRequest::decode(payload) else { return };
        let (session, accept) = Session::respond(self.own_address(), header.source, &req, now_secs);
        self.sessions.insert(header.source, session);
        let response_payload = accept.encode().to_vec();
        let pkt_header = match self.build_header(
            PacketType::LinkAccept,
            PacketFlags::empty(),
            self.own_address(),
            header.source,
            header.source,
            0,
            response_payload.len() as u16,
        ) {
            Ok(h) => h,
            Err(_) => return,
        };
        if let Ok(packet) = Packet::new(pkt_header, response_payload) {
            self.enqueue(PRIO_ROUTING, packet);
        }
        events.push(MeshEvent::LinkEstablished { peer: header.source });
    }

    fn on_link_accept(&mut self, header: &PacketHeader, payload: &[u8], now_secs: u32, events: &mut Vec<MeshEvent>) {
        if header.destination != self.own_address() {
            return;
        }
        let Ok(accept) = LinkAccept::decode(payload) else { return };
        let Some(session) = self.sessions.get_mut(&header.source) else { return };
        match session.complete(&accept, now_secs) {
            Ok(()) => {
                self.pending_handshakes.remove(&header.source);
                events.push(MeshEvent::LinkEstablished { peer: header.source });
            }
            Err(e) => log::warn!("node({:#010x}): link handshake with {:#010x} failed: {e}", self.own_address(), header.source),
        }
    }

    fn on_link_data(
        &mut self,
        header: &PacketHeader,
        payload: &[u8],
        now_secs: u32,
        rssi_dbm: i16,
        snr_db: i8,
        events: &mut Vec<MeshEvent>,
    ) {
        if header.destination != self.own_address() {
            return;
        }
        let Ok(link_header) = LinkDataHeader::decode(payload) else { return };
        let body = &payload[farlink_wire::link::LINK_DATA_HEADER_LEN..];
        let Some(session) = self.sessions.get_mut(&header.source) else { return };
        match session.decrypt(&link_header, body, now_secs) {
            Ok(plaintext) => {
                self.auth_failures.remove(&header.source);
                events.push(MeshEvent::Message { src: header.source, payload: plaintext, rssi: rssi_dbm, snr: snr_db });
            }
            Err(CryptoError::Replay { .. }) => self.note_auth_failure(header.source, now_secs, events),
            Err(e) => {
                log::warn!("node({:#010x}): decrypt from {:#010x} failed: {e}", self.own_address(), header.source);
                self.note_auth_failure(header.source, now_secs, events);
            }
        }
    }

    /// Records one `LinkData` auth failure from `peer`; once
    /// `LINK_AUTH_FAILURE_LIMIT` pile up inside `LINK_AUTH_FAILURE_WINDOW_SECS`,
    /// closes the link rather than keep decrypting forever.
    fn note_auth_failure(&mut self, peer: u32, now_secs: u32, events: &mut Vec<MeshEvent>) {
        let window = self.auth_failures.entry(peer).or_insert(AuthFailureWindow { count: 0, window_start_secs: now_secs });
        if now_secs.saturating_sub(window.window_start_secs) > LINK_AUTH_FAILURE_WINDOW_SECS {
            window.count = 0;
            window.window_start_secs = now_secs;
        }
        window.count += 1;
        if window.count >= LINK_AUTH_FAILURE_LIMIT {
            self.auth_failures.remove(&peer);
            if self.close_link(peer) {
                log::warn!("node({:#010x}): closing link to {:#010x} after repeated auth failures", self.own_address(), peer);
                events.push(MeshEvent::LinkClosed { peer });
            }
        }
    }

    fn on_dtn(&mut self, header: &PacketHeader, payload: &[u8], now_secs: u32, events: &mut Vec<MeshEvent>) {
        if header.flags.contains(PacketFlags::CUSTODY_SIGNAL) {
            if let Some(sig) = CustodySignal::decode(payload) {
                self.dtn.on_custody_signal(&sig);
            }
            return;
        }
        let Ok(bundle_header) = BundleHeader::decode(payload) else { return };
        let chunk = &payload[farlink_wire::bundle::BUNDLE_HEADER_LEN..];
        // The custodian carried in the received header is whoever held
        // custody before us; we signal back to them once we accept it.
        let takes_custody =
            bundle_header.flags.contains(BundleFlags::CUSTODY) && bundle_header.destination != ADDRESS_BROADCAST;
        let prev_custodian = bundle_header.custodian;
        let bundle_id = bundle_header.bundle_id;
        match self.dtn.on_frame(&bundle_header, chunk, self.own_address(), now_secs) {
            BundleEvent::Delivered { bundle_id, payload } => {
                events.push(MeshEvent::BundleDelivered { bundle_id, payload });
                if takes_custody {
                    self.send_custody_signal(prev_custodian, CustodySignal { bundle_id, accepted: true });
                }
            }
            BundleEvent::DeliveredAndForward { header: bh, payload } => {
                events.push(MeshEvent::BundleDelivered { bundle_id: bh.bundle_id, payload: payload.clone() });
                if self.config.epidemic_enabled && self.dtn.record_epidemic_copy(bh.bundle_id) {
                    self.forward_bundle(&bh, &payload, ADDRESS_BROADCAST);
                }
            }
            BundleEvent::Forward { header: bh, payload } => {
                if bh.destination == ADDRESS_BROADCAST {
                    if self.config.epidemic_enabled && self.dtn.record_epidemic_copy(bh.bundle_id) {
                        self.forward_bundle(&bh, &payload, ADDRESS_BROADCAST);
                    }
                } else if let Some(route) = self.routing.route_for(bh.destination) {
                    self.forward_bundle(&bh, &payload, route.next_hop);
                }
                if takes_custody {
                    self.send_custody_signal(prev_custodian, CustodySignal { bundle_id, accepted: true });
                }
            }
            BundleEvent::Duplicate
            | BundleEvent::Expired
            | BundleEvent::HopLimitExceeded
            | BundleEvent::CapacityExhausted
            | BundleEvent::AwaitingFragments => {}
        }
        let _ = header;
    }

    /// Drains every frame currently queued on the radio, dispatching each
    /// through [`Self::handle_inbound`]. The host calls this (and [`Self::tick`])
    /// on its own schedule — nothing in this crate polls the radio on its own.
    pub fn poll_inbound(&mut self, now_ms: u64, now_secs: u32) -> Vec<MeshEvent> {
        let mut events = Vec::new();
        while let Some((frame, rssi_dbm, snr_db)) = self.radio.poll() {
            events.extend(self.handle_inbound(&frame, rssi_dbm, snr_db, now_ms, now_secs));
        }
        events
    }

    // ---- periodic tick ---------------------------------------------------

    /// Drains due periodic work: beaconing, table pruning, store-forward
    /// and DTN-custody retries, SOS/time-sync ticks, and the MAC's own
    /// transmit scheduling.
    pub fn tick(&mut self, now_ms: u64, now_secs: u32) -> Vec<MeshEvent> {
        let events = Vec::new();

        if now_ms >= self.next_beacon_due_ms {
            self.next_beacon_due_ms = now_ms + self.config.beacon_interval_ms as u64;
            self.send_hello();
        }
        if let Some(own) = self.own_location {
            if now_ms >= self.next_location_beacon_due_ms {
                self.next_location_beacon_due_ms = now_ms + crate::geo::LOCATION_BEACON_INTERVAL_MS;
                self.send_location_beacon(own);
            }
        }
        if let Some(msg) = self.time.tick(now_ms) {
            self.send_time_sync(msg);
        }
        if let Some(msg) = self.sos_tick(now_ms) {
            self.radio.set_emergency_mode(true);
            self.send_sos(msg);
        } else if !self.sos.is_active() {
            self.radio.set_emergency_mode(false);
        }

        self.neighbors.prune(now_ms);
        self.routing.expire(now_ms);
        self.geo.prune(now_ms);

        self.retry_acks(now_ms);
        self.retry_handshakes(now_ms);
        self.drain_store_forward(now_ms, now_secs);
        self.retry_dtn_custody(now_ms);

        let time_synced = self.time.is_synced(now_ms);
        let rssi = self.radio.rssi_now();
        match self.mac.tick(now_ms, time_synced, rssi, &mut OsRng) {
            MacAction::Transmit(bytes) => {
                self.radio.send(&bytes);
            }
            MacAction::CollisionDrop => log::warn!("node({:#010x}): frame dropped after CCA retries exhausted", self.own_address()),
            MacAction::Idle => {}
        }
        events
    }

    fn sos_tick(&mut self, now_ms: u64) -> Option<SosMessage> {
        let (lat, lon, alt) = self.own_location.map(|b| (b.lat_e7, b.lon_e7, b.alt_m)).unwrap_or((0, 0, 0));
        self.sos.tick(self.own_address(), lat, lon, alt, self.battery_pct, now_ms)
    }

    fn send_hello(&mut self) {
        let header = match self.build_header(
            PacketType::Hello,
            PacketFlags::empty(),
            self.own_address(),
            ADDRESS_BROADCAST,
            ADDRESS_BROADCAST,
            0,
            0,
        ) {
            Ok(h) => h,
            Err(_) => return,
        };
        if let Ok(packet) = Packet::new(header, Vec::new()) {
            self.enqueue(PRIO_BACKGROUND, packet);
        }
    }

    fn send_location_beacon(&mut self, beacon: LocationBeacon) {
        let payload = beacon.encode().to_vec();
        let header = match self.build_header(
            PacketType::Location,
            PacketFlags::empty(),
            self.own_address(),
            ADDRESS_BROADCAST,
            ADDRESS_BROADCAST,
            0,
            payload.len() as u16,
        ) {
            Ok(h) => h,
            Err(_) => return,
        };
        if let Ok(packet) = Packet::new(header, payload) {
            self.enqueue(PRIO_BACKGROUND, packet);
        }
    }

    fn send_time_sync(&mut self, msg: TimeSyncMessage) {
        let payload = msg.encode().to_vec();
        let header = match self.build_header(
            PacketType::TimeSync,
            PacketFlags::empty(),
            self.own_address(),
            ADDRESS_BROADCAST,
            ADDRESS_BROADCAST,
            0,
            payload.len() as u16,
        ) {
            Ok(h) => h,
            Err(_) => return,
        };
        if let Ok(packet) = Packet::new(header, payload) {
            self.enqueue(PRIO_BACKGROUND, packet);
        }
    }

    fn send_sos(&mut self, msg: SosMessage) {
        let payload = msg.encode().to_vec();
        let header = match self.build_header(
            PacketType::Sos,
            PacketFlags::empty(),
            self.own_address(),
            ADDRESS_BROADCAST,
            ADDRESS_BROADCAST,
            0,
            payload.len() as u16,
        ) {
            Ok(h) => h,
            Err(_) => return,
        };
        if let Ok(packet) = Packet::new(header, payload) {
            self.enqueue(PRIO_EMERGENCY, packet);
        }
    }

    fn retry_acks(&mut self, now_ms: u64) {
        let timeout = self.config.ack_timeout_ms as u64;
        let max_retries = self.config.max_retries;
        let mut still_pending = Vec::with_capacity(self.pending_acks.len());
        for mut pending in self.pending_acks.drain(..) {
            if now_ms.saturating_sub(pending.sent_at_ms) < timeout {
                still_pending.push(pending);
                continue;
            }
            if pending.retries >= max_retries {
                log::warn!(
                    "node({:#010x}): giving up on ack from {:#010x} after {} retries",
                    self.own_address(),
                    pending.destination,
                    pending.retries
                );
                continue;
            }
            pending.retries += 1;
            pending.sent_at_ms = now_ms;
            if let Ok(mut packet) = Packet::decode(&pending.frame) {
                packet.header.flags |= PacketFlags::RETRANSMISSION;
                pending.frame = packet.encode();
            }
            self.mac.enqueue(PRIO_DATA, pending.frame.clone());
            still_pending.push(pending);
        }
        self.pending_acks = still_pending;
    }

    fn retry_handshakes(&mut self, now_ms: u64) {
        let due: Vec<u32> = self
            .pending_handshakes
            .iter()
            .filter(|(_, p)| now_ms.saturating_sub(p.requested_at_ms) >= LINK_HANDSHAKE_TIMEOUT_MS)
            .map(|(peer, _)| *peer)
            .collect();
        for peer in due {
            let Some(pending) = self.pending_handshakes.get(&peer) else { continue };
            if pending.retries >= self.config.max_retries {
                self.pending_handshakes.remove(&peer);
                self.sessions.remove(&peer);
                continue;
            }
            let request = pending.request.clone();
            let _ = self.send_link_request(peer, &request);
            if let Some(p) = self.pending_handshakes.get_mut(&peer) {
                p.retries += 1;
                p.requested_at_ms = now_ms;
            }
        }
    }

    fn drain_store_forward(&mut self, now_ms: u64, now_secs: u32) {
        let routing = &self.routing;
        let neighbors = &self.neighbors;
        let due = self.store_forward.due_for_delivery(now_ms, |addr| {
            addr == ADDRESS_BROADCAST || neighbors.contains(addr) || routing.route_for(addr).is_some()
        });
        for msg in due {
            let _ = self.send(msg.destination, &msg.payload, true, now_ms, now_secs);
        }
    }

    fn retry_dtn_custody(&mut self, now_ms: u64) {
        for bundle_id in self.dtn.custody_timeout_tick(now_ms) {
            let Some(record) = self.dtn.get(bundle_id) else { continue };
            let header = record.header;
            let payload = record.payload.clone();
            let next_hop = if header.destination == ADDRESS_BROADCAST {
                ADDRESS_BROADCAST
            } else if let Some(route) = self.routing.route_for(header.destination) {
                route.next_hop
            } else {
                continue;
            };
            self.forward_bundle(&header, &payload, next_hop);
            self.dtn.mark_custody_wait(bundle_id, now_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque as Fifo;

    struct LoopbackRadio {
        outbox: Fifo<Vec<u8>>,
        rssi: i16,
    }

    impl LoopbackRadio {
        fn new() -> Self {
            Self { outbox: Fifo::new(), rssi: -90 }
        }
    }

    impl RadioDevice for LoopbackRadio {
        fn send(&mut self, frame: &[u8]) -> bool {
            self.outbox.push_back(frame.to_vec());
            true
        }

        fn poll(&mut self) -> Option<(Vec<u8>, i16, i8)> {
            self.outbox.pop_front().map(|f| (f, -60, 5))
        }

        fn rssi_now(&self) -> i16 {
            self.rssi
        }

        fn sleep(&mut self) {}
        fn wake(&mut self) {}
    }

    fn node(addr: u32) -> NodeStack<LoopbackRadio> {
        let config = MeshConfig { node_address: addr, forward_secrecy_enabled: false, tdma_enabled: false, ..Default::default() };
        NodeStack::new(config, LoopbackRadio::new())
    }

    fn pump(from: &mut NodeStack<LoopbackRadio>, to: &mut NodeStack<LoopbackRadio>, now_ms: u64, now_secs: u32) -> Vec<MeshEvent> {
        from.tick(now_ms, now_secs);
        let mut events = Vec::new();
        while let Some((frame, rssi, snr)) = from.radio.poll() {
            events.extend(to.handle_inbound(&frame, rssi, snr, now_ms, now_secs));
        }
        events
    }

    #[test]
    fn broadcast_hello_is_learned_as_a_neighbor() {
        let mut a = node(1);
        let mut b = node(2);
        pump(&mut a, &mut b, 0, 0);
        assert!(b.neighbors().contains(1));
    }

    #[test]
    fn unreachable_destination_is_queued_for_store_and_forward() {
        let mut a = node(1);
        a.send(9, b"hi", false, 0, 0).unwrap();
        assert_eq!(a.store_forward.len(), 1);
    }

    #[test]
    fn direct_neighbor_broadcast_delivers_as_a_message_event() {
        let mut a = node(1);
        let mut b = node(2);
        pump(&mut a, &mut b, 0, 0); // a's Hello makes b learn a as a neighbor
        pump(&mut b, &mut a, 100, 0); // b's Hello makes a learn b

        a.send(ADDRESS_BROADCAST, b"hello mesh", false, 200, 0).unwrap();
        let events = pump(&mut a, &mut b, 200, 0);
        assert!(events.iter().any(|e| matches!(e, MeshEvent::Message { payload, .. } if payload == b"hello mesh")));
    }

    #[test]
    fn sos_activation_produces_a_broadcastable_message_on_tick() {
        let mut a = node(1);
        a.activate_sos(farlink_wire::SosType::Medical, 0, "help".into(), 0);
        let msg = a.sos_tick(0);
        assert!(msg.is_some());
    }
}
