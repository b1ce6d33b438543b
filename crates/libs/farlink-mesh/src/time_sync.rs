//! Network time election: nodes defer to whichever source carries the
//! best provenance (`Crystal < Synced < Serial < NTP < GPS`), lower
//! stratum winning ties, and degrade back to their own crystal when a
//! source goes stale.

use farlink_wire::{TimeSourceType, TimeSyncMessage};

pub const REBROADCAST_INTERVAL_MS: u64 = 60_000;
pub const SOURCE_DEGRADE_MS: u64 = 10 * 60_000;
pub const SYNC_FRESHNESS_MS: u64 = 5 * 60_000;
const DEGRADED_STRATUM: u8 = 15;
/// Fixed estimate folded into `offset_us` on acceptance; the source
/// doesn't model per-hop propagation delay more precisely than this.
const PROPAGATION_ESTIMATE_US: i32 = 50_000;

fn base_quality(source: TimeSourceType) -> u8 {
    match source {
        TimeSourceType::Crystal => 20,
        TimeSourceType::Synced => 40,
        TimeSourceType::Serial => 60,
        TimeSourceType::Ntp => 80,
        TimeSourceType::Gps => 100,
    }
}

pub struct TimeAuthority {
    own_address: u32,
    source: TimeSourceType,
    stratum: u8,
    offset_us: i32,
    last_sync_ms: u64,
    last_rebroadcast_ms: u64,
}

impl TimeAuthority {
    pub fn new(own_address: u32) -> Self {
        Self {
            own_address,
            source: TimeSourceType::Crystal,
            stratum: DEGRADED_STRATUM,
            offset_us: 0,
            last_sync_ms: 0,
            last_rebroadcast_ms: 0,
        }
    }

    pub fn source(&self) -> TimeSourceType {
        self.source
    }

    pub fn stratum(&self) -> u8 {
        self.stratum
    }

    pub fn is_synced(&self, now_ms: u64) -> bool {
        self.source != TimeSourceType::Crystal && now_ms.saturating_sub(self.last_sync_ms) <= SYNC_FRESHNESS_MS
    }

    pub fn quality(&self, now_ms: u64) -> u8 {
        let minutes = (now_ms.saturating_sub(self.last_sync_ms) / 60_000) as i32;
        (base_quality(self.source) as i32 - minutes).clamp(0, 100) as u8
    }

    /// Evaluates an incoming `TimeSyncMessage`; accepts (and updates
    /// local state) if it carries a strictly better source, or the same
    /// source with a meaningfully lower stratum.
    pub fn accept(&mut self, msg: &TimeSyncMessage, now_ms: u64) -> bool {
        let better_source = msg.source_type > self.source;
        let better_stratum = msg.source_type == self.source && msg.stratum + 1 < self.stratum;
        if !better_source && !better_stratum {
            return false;
        }
        self.source = msg.source_type;
        self.stratum = msg.stratum + 1;
        self.offset_us = msg.offset_us + PROPAGATION_ESTIMATE_US;
        self.last_sync_ms = now_ms;
        true
    }

    /// Degrades back to `Crystal` if the source has gone stale, and
    /// returns a rebroadcast message if one is due.
    pub fn tick(&mut self, now_ms: u64) -> Option<TimeSyncMessage> {
        if self.source != TimeSourceType::Crystal && now_ms.saturating_sub(self.last_sync_ms) > SOURCE_DEGRADE_MS {
            self.source = TimeSourceType::Crystal;
            self.stratum = DEGRADED_STRATUM;
        }

        if self.source <= TimeSourceType::Synced {
            return None;
        }
        if now_ms.saturating_sub(self.last_rebroadcast_ms) < REBROADCAST_INTERVAL_MS {
            return None;
        }
        self.last_rebroadcast_ms = now_ms;
        Some(TimeSyncMessage {
            ts_sec: (now_ms / 1000) as u32,
            ts_usec: ((now_ms % 1000) * 1000) as u32,
            source_type: self.source,
            hop_count: 0,
            stratum: self.stratum,
            source_node: self.own_address,
            offset_us: self.offset_us,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(source_type: TimeSourceType, stratum: u8) -> TimeSyncMessage {
        TimeSyncMessage { ts_sec: 0, ts_usec: 0, source_type, hop_count: 0, stratum, source_node: 99, offset_us: 0 }
    }

    #[test]
    fn better_source_is_accepted() {
        let mut auth = TimeAuthority::new(1);
        assert!(auth.accept(&msg(TimeSourceType::Gps, 0), 0));
        assert_eq!(auth.source(), TimeSourceType::Gps);
        assert_eq!(auth.stratum(), 1);
    }

    #[test]
    fn worse_source_is_rejected() {
        let mut auth = TimeAuthority::new(1);
        auth.accept(&msg(TimeSourceType::Gps, 0), 0);
        assert!(!auth.accept(&msg(TimeSourceType::Serial, 0), 0));
        assert_eq!(auth.source(), TimeSourceType::Gps);
    }

    #[test]
    fn same_source_lower_stratum_is_accepted() {
        let mut auth = TimeAuthority::new(1);
        auth.accept(&msg(TimeSourceType::Ntp, 5), 0);
        assert_eq!(auth.stratum(), 6);
        assert!(auth.accept(&msg(TimeSourceType::Ntp, 1), 0));
        assert_eq!(auth.stratum(), 2);
    }

    #[test]
    fn degrades_to_crystal_after_stale_window() {
        let mut auth = TimeAuthority::new(1);
        auth.accept(&msg(TimeSourceType::Gps, 0), 0);
        auth.tick(SOURCE_DEGRADE_MS);
        assert_eq!(auth.source(), TimeSourceType::Crystal);
        assert_eq!(auth.stratum(), DEGRADED_STRATUM);
    }

    #[test]
    fn rebroadcasts_only_when_better_than_synced() {
        let mut auth = TimeAuthority::new(1);
        auth.accept(&msg(TimeSourceType::Synced, 0), 0);
        assert!(auth.tick(REBROADCAST_INTERVAL_MS).is_none());

        auth.accept(&msg(TimeSourceType::Serial, 0), REBROADCAST_INTERVAL_MS);
        let out = auth.tick(2 * REBROADCAST_INTERVAL_MS).unwrap();
        assert_eq!(out.source_type, TimeSourceType::Serial);
    }
}
