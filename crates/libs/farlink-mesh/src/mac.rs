//! Hybrid TDMA/CSMA-CA medium access control.
//!
//! Frames are 1000 ms, split into 10 slots of 100 ms with a 5 ms guard
//! at the tail of each slot. Slot 0 is reserved for beacons/contention;
//! every other node owns a deterministic preferred slot. When the node
//! is time-synced and TDMA is enabled, it transmits in its own slot
//! without contention; otherwise it falls back to CSMA-CA.

use rand_core::RngCore;

pub const FRAME_MS: u64 = 1000;
pub const SLOT_MS: u64 = 100;
pub const GUARD_MS: u64 = 5;
pub const SLOTS_PER_FRAME: u8 = 10;
pub const CCA_BUSY_RSSI_DBM: i16 = -90;
pub const MAX_BACKOFF_WINDOW: u32 = 32;
pub const MAX_CSMA_RETRIES: u8 = 5;

pub fn preferred_slot(addr: u32) -> u8 {
    ((addr % 9) + 1) as u8
}

pub fn slot_for(now_ms: u64) -> u8 {
    ((now_ms % FRAME_MS) / SLOT_MS) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CsmaState {
    Idle,
    Backoff { remaining_slots: u32 },
}

struct QueuedFrame {
    priority: u8,
    seq: u64,
    bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacAction {
    Idle,
    Transmit(Vec<u8>),
    /// Frame dropped after `MAX_CSMA_RETRIES` failed CCA attempts.
    CollisionDrop,
}

pub struct Mac {
    preferred_slot: u8,
    tdma_enabled: bool,
    last_slot: Option<u8>,
    csma_state: CsmaState,
    backoff_window: u32,
    retry_count: u8,
    next_seq: u64,
    queue: Vec<QueuedFrame>,
}

impl Mac {
    pub fn new(own_addr: u32, tdma_enabled: bool) -> Self {
        Self {
            preferred_slot: preferred_slot(own_addr),
            tdma_enabled,
            last_slot: None,
            csma_state: CsmaState::Idle,
            backoff_window: 1,
            retry_count: 0,
            next_seq: 0,
            queue: Vec::new(),
        }
    }

    pub fn enqueue(&mut self, priority: u8, bytes: Vec<u8>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(QueuedFrame { priority, seq, bytes });
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    fn pop_highest(&mut self) -> Vec<u8> {
        let idx = self
            .queue
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)))
            .map(|(i, _)| i)
            .expect("queue checked non-empty by caller");
        self.queue.remove(idx).bytes
    }

    /// Advances the MAC by one tick at wall-clock `now_ms`, given
    /// whether the node is currently time-synced and the radio's
    /// instantaneous RSSI (for CCA).
    pub fn tick(&mut self, now_ms: u64, time_synced: bool, rssi_dbm: i16, rng: &mut impl RngCore) -> MacAction {
        let slot = slot_for(now_ms);
        if self.last_slot != Some(slot) {
            if let CsmaState::Backoff { remaining_slots } = &mut self.csma_state {
                *remaining_slots = remaining_slots.saturating_sub(1);
            }
            self.last_slot = Some(slot);
        }

        if self.queue.is_empty() {
            return MacAction::Idle;
        }

        let slot_offset_ms = now_ms % SLOT_MS;
        if slot_offset_ms >= SLOT_MS - GUARD_MS {
            return MacAction::Idle;
        }

        if self.tdma_enabled && time_synced && slot != 0 && slot == self.preferred_slot {
            return MacAction::Transmit(self.pop_highest());
        }

        if let CsmaState::Backoff { remaining_slots } = self.csma_state {
            if remaining_slots > 0 {
                return MacAction::Idle;
            }
        }

        if rssi_dbm > CCA_BUSY_RSSI_DBM {
            self.retry_count += 1;
            if self.retry_count > MAX_CSMA_RETRIES {
                self.pop_highest();
                self.retry_count = 0;
                self.backoff_window = 1;
                self.csma_state = CsmaState::Idle;
                return MacAction::CollisionDrop;
            }
            self.backoff_window = (self.backoff_window * 2).min(MAX_BACKOFF_WINDOW);
            let draw = 1 + (rng.next_u32() % self.backoff_window);
            self.csma_state = CsmaState::Backoff { remaining_slots: draw };
            MacAction::Idle
        } else {
            self.retry_count = 0;
            self.backoff_window = 1;
            self.csma_state = CsmaState::Idle;
            MacAction::Transmit(self.pop_highest())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn preferred_slot_is_deterministic_and_never_zero() {
        for addr in 0u32..50 {
            let slot = preferred_slot(addr);
            assert!((1..=9).contains(&slot));
        }
    }

    #[test]
    fn slot_wraps_across_frame_boundary() {
        assert_eq!(slot_for(900), 9);
        assert_eq!(slot_for(999), 9);
        assert_eq!(slot_for(1000), 0);
        assert_eq!(slot_for(1100), 1);
    }

    #[test]
    fn tdma_transmits_exactly_in_own_slot_when_synced() {
        let mut mac = Mac::new(0, true); // preferred_slot = 1
        mac.enqueue(1, vec![0xAA]);
        let mut rng = OsRng;
        // Wrong slot: stays idle even though queue is non-empty.
        assert_eq!(mac.tick(0, true, -40, &mut rng), MacAction::Idle);
        // Own slot, synced, mid-slot: transmits via TDMA even with a hostile RSSI.
        let action = mac.tick(1150, true, -10, &mut rng);
        assert_eq!(action, MacAction::Transmit(vec![0xAA]));
    }

    #[test]
    fn guard_interval_blocks_transmission() {
        let mut mac = Mac::new(0, true); // preferred_slot = 1
        mac.enqueue(1, vec![1]);
        let mut rng = OsRng;
        // 96ms into slot 1 (1096) is within the final 5ms guard.
        assert_eq!(mac.tick(1096, true, -40, &mut rng), MacAction::Idle);
    }

    #[test]
    fn csma_transmits_when_channel_clear() {
        let mut mac = Mac::new(10, false);
        mac.enqueue(1, vec![9]);
        let mut rng = OsRng;
        assert_eq!(mac.tick(0, false, -95, &mut rng), MacAction::Transmit(vec![9]));
    }

    #[test]
    fn csma_drops_after_max_retries_on_busy_channel() {
        let mut mac = Mac::new(10, false);
        mac.enqueue(1, vec![9]);
        let mut rng = OsRng;
        let mut now = 0u64;
        let mut saw_drop = false;
        for _ in 0..200 {
            match mac.tick(now, false, -10, &mut rng) {
                MacAction::CollisionDrop => {
                    saw_drop = true;
                    break;
                }
                MacAction::Transmit(_) => panic!("should never clear CCA at -10 dBm"),
                MacAction::Idle => {}
            }
            now += SLOT_MS;
        }
        assert!(saw_drop);
        assert_eq!(mac.queue_len(), 0);
    }

    #[test]
    fn equal_priority_ties_break_fifo() {
        let mut mac = Mac::new(10, false);
        mac.enqueue(5, vec![1]);
        mac.enqueue(5, vec![2]);
        let mut rng = OsRng;
        assert_eq!(mac.tick(0, false, -95, &mut rng), MacAction::Transmit(vec![1]));
        assert_eq!(mac.tick(100, false, -95, &mut rng), MacAction::Transmit(vec![2]));
    }
}
