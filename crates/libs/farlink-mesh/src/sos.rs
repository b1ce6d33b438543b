//! Emergency broadcast: boosted-radio SOS activation/cancellation and
//! the bounded log of SOS messages received from others.

use std::collections::VecDeque;

use farlink_wire::{SosMessage, SosType};

pub const SOS_BROADCAST_INTERVAL_MS: u64 = 10_000;
pub const SOS_MAX_DURATION_MS: u64 = 3600 * 1000;
pub const SOS_LOG_CAPACITY: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct SosLogEntry {
    pub src: u32,
    pub message: SosMessage,
    pub rssi_dbm: i16,
    pub received_ms: u64,
    pub acked: bool,
}

/// Local SOS activation: what the node is currently broadcasting, if
/// anything.
pub struct SosActivation {
    sos_type: SosType,
    flags: u8,
    message_text: String,
    started_ms: u64,
    last_broadcast_ms: Option<u64>,
}

#[derive(Default)]
pub struct SosSubsystem {
    active: Option<SosActivation>,
    log: VecDeque<SosLogEntry>,
}

impl SosSubsystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Activates local SOS. Only one activation may be active at a
    /// time, except `EmergencyTest`, which may coexist with a real one.
    pub fn activate(&mut self, sos_type: SosType, flags: u8, message_text: String, now_ms: u64) -> bool {
        if let Some(existing) = &self.active {
            if existing.sos_type != SosType::EmergencyTest && sos_type != SosType::EmergencyTest {
                return false;
            }
        }
        self.active = Some(SosActivation { sos_type, flags, message_text, started_ms: now_ms, last_broadcast_ms: None });
        true
    }

    pub fn cancel(&mut self) {
        self.active = None;
    }

    /// Builds the next `SosMessage` to broadcast if one is due (either
    /// the broadcast interval elapsed or this is the first tick since
    /// activation), or auto-cancels after `SOS_MAX_DURATION_MS`.
    pub fn tick(
        &mut self,
        own_addr: u32,
        lat_e7: i32,
        lon_e7: i32,
        alt_m: i32,
        battery_pct: u8,
        now_ms: u64,
    ) -> Option<SosMessage> {
        let active = self.active.as_mut()?;
        if now_ms.saturating_sub(active.started_ms) > SOS_MAX_DURATION_MS {
            self.active = None;
            return None;
        }
        let due = match active.last_broadcast_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= SOS_BROADCAST_INTERVAL_MS,
        };
        if !due {
            return None;
        }
        active.last_broadcast_ms = Some(now_ms);
        let _ = own_addr;
        Some(SosMessage {
            sos_type: active.sos_type,
            flags: active.flags,
            lat_e7,
            lon_e7,
            alt_m,
            battery_pct,
            timestamp: (now_ms / 1000) as u32,
            message: active.message_text.clone(),
        })
    }

    /// Logs a received SOS, evicting the oldest entry if the log is full.
    pub fn on_received(&mut self, src: u32, message: SosMessage, rssi_dbm: i16, now_ms: u64) {
        if self.log.len() >= SOS_LOG_CAPACITY {
            self.log.pop_front();
        }
        self.log.push_back(SosLogEntry { src, message, rssi_dbm, received_ms: now_ms, acked: false });
    }

    /// Acknowledges the most recent log entry from `src`, if any.
    pub fn ack(&mut self, src: u32) -> bool {
        if let Some(entry) = self.log.iter_mut().rev().find(|e| e.src == src) {
            entry.acked = true;
            true
        } else {
            false
        }
    }

    pub fn log(&self) -> impl Iterator<Item = &SosLogEntry> {
        self.log.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_real_activation_is_rejected() {
        let mut sos = SosSubsystem::new();
        assert!(sos.activate(SosType::Medical, 0, "help".into(), 0));
        assert!(!sos.activate(SosType::Fire, 0, "fire too".into(), 0));
    }

    #[test]
    fn emergency_test_coexists_with_real_activation() {
        let mut sos = SosSubsystem::new();
        assert!(sos.activate(SosType::Medical, 0, "help".into(), 0));
        assert!(sos.activate(SosType::EmergencyTest, 0, "drill".into(), 0));
    }

    #[test]
    fn broadcasts_on_activation_then_every_interval() {
        let mut sos = SosSubsystem::new();
        sos.activate(SosType::Medical, 0, "help".into(), 0);
        assert!(sos.tick(1, 0, 0, 0, 90, 0).is_some());
        assert!(sos.tick(1, 0, 0, 0, 90, 1).is_none());
        assert!(sos.tick(1, 0, 0, 0, 90, SOS_BROADCAST_INTERVAL_MS).is_some());
    }

    #[test]
    fn auto_cancels_after_max_duration() {
        let mut sos = SosSubsystem::new();
        sos.activate(SosType::Medical, 0, "help".into(), 0);
        assert!(sos.tick(1, 0, 0, 0, 90, SOS_MAX_DURATION_MS + 1).is_none());
        assert!(!sos.is_active());
    }

    #[test]
    fn log_evicts_oldest_beyond_capacity() {
        let mut sos = SosSubsystem::new();
        let msg = SosMessage { sos_type: SosType::Medical, flags: 0, lat_e7: 0, lon_e7: 0, alt_m: 0, battery_pct: 0, timestamp: 0, message: String::new() };
        for src in 0..(SOS_LOG_CAPACITY as u32 + 1) {
            sos.on_received(src, msg.clone(), -60, src as u64);
        }
        assert_eq!(sos.log().count(), SOS_LOG_CAPACITY);
        assert!(sos.log().next().unwrap().src == 1);
    }

    #[test]
    fn ack_marks_most_recent_entry_from_sender() {
        let mut sos = SosSubsystem::new();
        let msg = SosMessage { sos_type: SosType::Medical, flags: 0, lat_e7: 0, lon_e7: 0, alt_m: 0, battery_pct: 0, timestamp: 0, message: String::new() };
        sos.on_received(5, msg, -60, 0);
        assert!(sos.ack(5));
        assert!(sos.log().next().unwrap().acked);
    }
}
