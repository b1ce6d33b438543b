//! Delay/disruption-tolerant bundle protocol: custody transfer,
//! fragmentation/reassembly, and epidemic broadcast replication.

use std::collections::HashMap;

use farlink_wire::{BundleFlags, BundleHeader, BundlePriority, ADDRESS_BROADCAST};

pub const DTN_FRAGMENT_SIZE: usize = 200;
pub const DTN_MAX_COPIES: u8 = 3;
pub const DTN_CUSTODY_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_BUNDLE_TTL_SECS: u32 = 24 * 3600;
/// Bounded bundle table; large enough for the scenarios in spec §8,
/// small enough to keep reassembly state bounded per invariant #4/§5.
pub const BUNDLE_TABLE_CAPACITY: usize = 64;
/// Reassembly uses a `u64` completion bitmask, so a bundle can't
/// fragment into more than 64 pieces (12.8 KB at `DTN_FRAGMENT_SIZE`).
pub const MAX_FRAGMENTS: u8 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleStatus {
    Pending,
    InTransit,
    CustodyWait,
    Delivered,
    Expired,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleRecord {
    pub header: BundleHeader,
    pub payload: Vec<u8>,
    pub status: BundleStatus,
    pub custody_wait_since: Option<u64>,
    pub epidemic_copies_sent: u8,
}

struct Reassembly {
    count: u8,
    mask: u64,
    fragments: Vec<Option<Vec<u8>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CustodySignal {
    pub bundle_id: u32,
    pub accepted: bool,
}

impl CustodySignal {
    pub const LEN: usize = 5;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[0..4].copy_from_slice(&self.bundle_id.to_le_bytes());
        buf[4] = self.accepted as u8;
        buf
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < Self::LEN {
            return None;
        }
        Some(Self { bundle_id: u32::from_le_bytes(data[0..4].try_into().unwrap()), accepted: data[4] != 0 })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleEvent {
    Duplicate,
    Expired,
    HopLimitExceeded,
    CapacityExhausted,
    AwaitingFragments,
    Delivered { bundle_id: u32, payload: Vec<u8> },
    Forward { header: BundleHeader, payload: Vec<u8> },
    /// Deliver-locally AND the sender should forward further copies
    /// (epidemic broadcast with custody undefined, per spec §9).
    DeliveredAndForward { header: BundleHeader, payload: Vec<u8> },
}

#[derive(Default)]
pub struct DtnTable {
    bundles: HashMap<u32, BundleRecord>,
    reassembly: HashMap<u32, Reassembly>,
    next_id: u32,
}

impl DtnTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, bundle_id: u32) -> Option<&BundleRecord> {
        self.bundles.get(&bundle_id)
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BundleRecord> {
        self.bundles.values()
    }

    /// Splits `payload` into `ceil(len / DTN_FRAGMENT_SIZE)` fragments
    /// (one, un-set `FRAGMENT` flag, if it fits in a single piece),
    /// returning the wire frames to send and recording the logical
    /// bundle in the table.
    #[allow(clippy::too_many_arguments)]
    pub fn create_bundle(
        &mut self,
        own_addr: u32,
        destination: u32,
        payload: &[u8],
        priority: BundlePriority,
        custody: bool,
        epidemic: bool,
        max_hops: u8,
        now_secs: u32,
    ) -> Result<Vec<(BundleHeader, Vec<u8>)>, BundleEvent> {
        if self.bundles.len() >= BUNDLE_TABLE_CAPACITY {
            return Err(BundleEvent::CapacityExhausted);
        }
        let frag_count = if payload.is_empty() { 1 } else { payload.len().div_ceil(DTN_FRAGMENT_SIZE) };
        if frag_count > MAX_FRAGMENTS as usize {
            return Err(BundleEvent::CapacityExhausted);
        }
        let frag_count = frag_count as u8;

        let bundle_id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let mut flags = BundleFlags::empty();
        if frag_count > 1 {
            flags |= BundleFlags::FRAGMENT;
        }
        if custody {
            flags |= BundleFlags::CUSTODY;
        }
        if epidemic && destination == ADDRESS_BROADCAST {
            flags |= BundleFlags::EPIDEMIC;
        }
        if priority == BundlePriority::Emergency || priority == BundlePriority::Expedited {
            flags |= BundleFlags::PRIORITY;
        }

        let mut frames = Vec::with_capacity(frag_count as usize);
        for i in 0..frag_count {
            let start = i as usize * DTN_FRAGMENT_SIZE;
            let end = (start + DTN_FRAGMENT_SIZE).min(payload.len());
            let chunk = payload[start..end].to_vec();
            let header = BundleHeader {
                bundle_id,
                source: own_addr,
                destination,
                custodian: own_addr,
                creation_time: now_secs,
                ttl: DEFAULT_BUNDLE_TTL_SECS,
                payload_length: chunk.len() as u16,
                flags,
                priority,
                frag_offset: i,
                frag_count,
                hop_count: 0,
                max_hops,
            };
            frames.push((header, chunk));
        }

        let whole_header = BundleHeader {
            payload_length: payload.len() as u16,
            frag_offset: 0,
            ..frames[0].0
        };
        self.bundles.insert(
            bundle_id,
            BundleRecord {
                header: whole_header,
                payload: payload.to_vec(),
                status: BundleStatus::Pending,
                custody_wait_since: None,
                epidemic_copies_sent: 0,
            },
        );
        Ok(frames)
    }

    /// Feeds one received fragment in; returns the reassembled payload
    /// once every fragment has arrived (immediately, for unfragmented
    /// bundles).
    fn reassemble(&mut self, header: &BundleHeader, chunk: &[u8]) -> Option<Vec<u8>> {
        if !header.flags.contains(BundleFlags::FRAGMENT) {
            return Some(chunk.to_vec());
        }
        if header.frag_count == 0 || header.frag_count > MAX_FRAGMENTS || header.frag_offset >= header.frag_count {
            return None;
        }
        let entry = self.reassembly.entry(header.bundle_id).or_insert_with(|| Reassembly {
            count: header.frag_count,
            mask: 0,
            fragments: vec![None; header.frag_count as usize],
        });
        entry.fragments[header.frag_offset as usize] = Some(chunk.to_vec());
        entry.mask |= 1u64 << header.frag_offset;

        let complete_mask = if entry.count == 64 { u64::MAX } else { (1u64 << entry.count) - 1 };
        if entry.mask != complete_mask {
            return None;
        }
        let entry = self.reassembly.remove(&header.bundle_id).unwrap();
        let mut full = Vec::new();
        for frag in entry.fragments {
            full.extend(frag.unwrap_or_default());
        }
        Some(full)
    }

    /// Processes one received fragment/bundle frame end to end:
    /// reassembly, dedup, TTL/hop checks, custody acceptance and local
    /// delivery.
    pub fn on_frame(&mut self, header: &BundleHeader, chunk: &[u8], own_addr: u32, now_secs: u32) -> BundleEvent {
        if self.bundles.contains_key(&header.bundle_id) && !self.reassembly.contains_key(&header.bundle_id) {
            return BundleEvent::Duplicate;
        }
        if header.creation_time.saturating_add(header.ttl) < now_secs {
            return BundleEvent::Expired;
        }
        if header.hop_count >= header.max_hops {
            return BundleEvent::HopLimitExceeded;
        }

        let payload = match self.reassemble(header, chunk) {
            Some(p) => p,
            None => return BundleEvent::AwaitingFragments,
        };
        if self.bundles.contains_key(&header.bundle_id) {
            return BundleEvent::Duplicate;
        }
        if self.bundles.len() >= BUNDLE_TABLE_CAPACITY {
            return BundleEvent::CapacityExhausted;
        }

        let is_broadcast = header.destination == ADDRESS_BROADCAST;
        let deliver_locally = header.destination == own_addr || is_broadcast;
        // Custody is undefined for broadcast bundles: never take custody, never signal.
        let takes_custody = header.flags.contains(BundleFlags::CUSTODY) && !is_broadcast;

        let mut stored_header = *header;
        stored_header.payload_length = payload.len() as u16;
        stored_header.frag_offset = 0;
        if takes_custody {
            stored_header.custodian = own_addr;
        }
        let status =
            if deliver_locally { BundleStatus::Delivered } else if takes_custody { BundleStatus::InTransit } else { BundleStatus::InTransit };

        self.bundles.insert(
            header.bundle_id,
            BundleRecord { header: stored_header, payload: payload.clone(), status, custody_wait_since: None, epidemic_copies_sent: 0 },
        );

        if deliver_locally {
            if is_broadcast && header.flags.contains(BundleFlags::EPIDEMIC) {
                BundleEvent::DeliveredAndForward { header: stored_header, payload }
            } else {
                BundleEvent::Delivered { bundle_id: header.bundle_id, payload }
            }
        } else {
            BundleEvent::Forward { header: stored_header, payload }
        }
    }

    /// Call after sending an epidemic broadcast copy onward; returns
    /// `true` while the per-bundle copy budget (`DTN_MAX_COPIES`) allows
    /// another re-forward.
    pub fn record_epidemic_copy(&mut self, bundle_id: u32) -> bool {
        if let Some(record) = self.bundles.get_mut(&bundle_id) {
            if record.epidemic_copies_sent < DTN_MAX_COPIES {
                record.epidemic_copies_sent += 1;
                return true;
            }
        }
        false
    }

    pub fn on_custody_signal(&mut self, sig: &CustodySignal) {
        if sig.accepted {
            self.bundles.remove(&sig.bundle_id);
        }
    }

    /// Marks a just-sent custody-flagged bundle as awaiting the next
    /// custodian's signal, arming `custody_timeout_tick`'s retry.
    pub fn mark_custody_wait(&mut self, bundle_id: u32, now_ms: u64) {
        if let Some(record) = self.bundles.get_mut(&bundle_id) {
            record.status = BundleStatus::CustodyWait;
            record.custody_wait_since = Some(now_ms);
        }
    }

    /// Bundles stuck in `CustodyWait` past the timeout revert to
    /// `Pending` for retry.
    pub fn custody_timeout_tick(&mut self, now_ms: u64) -> Vec<u32> {
        let mut reverted = Vec::new();
        for (id, record) in self.bundles.iter_mut() {
            if record.status == BundleStatus::CustodyWait {
                if let Some(since) = record.custody_wait_since {
                    if now_ms.saturating_sub(since) > DTN_CUSTODY_TIMEOUT_MS {
                        record.status = BundleStatus::Pending;
                        record.custody_wait_since = None;
                        reverted.push(*id);
                    }
                }
            }
        }
        reverted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_boundary_yields_exact_count_with_no_empty_fragment() {
        let mut table = DtnTable::new();
        let payload = vec![7u8; DTN_FRAGMENT_SIZE * 3];
        let frames = table.create_bundle(1, 2, &payload, BundlePriority::Normal, false, false, 15, 0).unwrap();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|(_, chunk)| chunk.len() == DTN_FRAGMENT_SIZE));
    }

    #[test]
    fn single_fragment_bundle_round_trips_without_fragment_flag() {
        let mut table = DtnTable::new();
        let frames = table.create_bundle(1, 2, b"hi", BundlePriority::Normal, false, false, 15, 0).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].0.flags.contains(BundleFlags::FRAGMENT));
    }

    #[test]
    fn reassembles_out_of_order_fragments() {
        let mut sender = DtnTable::new();
        let payload = vec![1u8; DTN_FRAGMENT_SIZE + 10];
        let frames = sender.create_bundle(1, 2, &payload, BundlePriority::Normal, false, false, 15, 0).unwrap();
        assert_eq!(frames.len(), 2);

        let mut receiver = DtnTable::new();
        let first = receiver.on_frame(&frames[1].0, &frames[1].1, 2, 0);
        assert_eq!(first, BundleEvent::AwaitingFragments);
        let second = receiver.on_frame(&frames[0].0, &frames[0].1, 2, 0);
        match second {
            BundleEvent::Delivered { payload: got, .. } => assert_eq!(got, payload),
            other => panic!("expected Delivered, got {other:?}"),
        }
    }

    #[test]
    fn expired_bundle_is_dropped() {
        let mut table = DtnTable::new();
        let frames = table.create_bundle(1, 2, b"late", BundlePriority::Normal, false, false, 15, 0).unwrap();
        let mut receiver = DtnTable::new();
        assert_eq!(receiver.on_frame(&frames[0].0, &frames[0].1, 2, DEFAULT_BUNDLE_TTL_SECS + 1), BundleEvent::Expired);
    }

    #[test]
    fn custody_flagged_unicast_is_accepted_and_custodian_updated() {
        let mut sender = DtnTable::new();
        let frames = sender.create_bundle(1, 2, b"parcel", BundlePriority::Normal, true, false, 15, 0).unwrap();
        let mut receiver = DtnTable::new();
        match receiver.on_frame(&frames[0].0, &frames[0].1, 2, 0) {
            BundleEvent::Delivered { .. } => {}
            other => panic!("expected Delivered, got {other:?}"),
        }
        assert_eq!(receiver.get(frames[0].0.bundle_id).unwrap().header.custodian, 2);
    }

    #[test]
    fn broadcast_with_custody_flag_never_takes_custody() {
        let mut sender = DtnTable::new();
        let frames = sender
            .create_bundle(1, ADDRESS_BROADCAST, b"parcel", BundlePriority::Normal, true, false, 15, 0)
            .unwrap();
        let mut receiver = DtnTable::new();
        receiver.on_frame(&frames[0].0, &frames[0].1, 9, 0);
        assert_eq!(receiver.get(frames[0].0.bundle_id).unwrap().header.custodian, 1);
    }
}
