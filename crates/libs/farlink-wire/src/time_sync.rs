//! Time synchronization broadcast wire format.
//!
//! ```text
//! ts_sec(u32) | ts_usec(u32) | source_type(u8) | hop_count(u8)
//! | stratum(u8) | reserved(u8) | source_node(u32) | offset_us(i32)
//! ```

use crate::WireError;

pub const TIME_SYNC_LEN: usize = 4 + 4 + 1 + 1 + 1 + 1 + 4 + 4;

/// Time source ordering used by election: `Crystal < Synced < Serial < NTP < GPS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TimeSourceType {
    Crystal = 0,
    Synced = 1,
    Serial = 2,
    Ntp = 3,
    Gps = 4,
}

impl TimeSourceType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            1 => Self::Synced,
            2 => Self::Serial,
            3 => Self::Ntp,
            4 => Self::Gps,
            _ => Self::Crystal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSyncMessage {
    pub ts_sec: u32,
    pub ts_usec: u32,
    pub source_type: TimeSourceType,
    pub hop_count: u8,
    pub stratum: u8,
    pub source_node: u32,
    pub offset_us: i32,
}

impl TimeSyncMessage {
    pub fn encode(&self) -> [u8; TIME_SYNC_LEN] {
        let mut buf = [0u8; TIME_SYNC_LEN];
        let mut off = 0;
        buf[off..off + 4].copy_from_slice(&self.ts_sec.to_le_bytes());
        off += 4;
        buf[off..off + 4].copy_from_slice(&self.ts_usec.to_le_bytes());
        off += 4;
        buf[off] = self.source_type as u8;
        off += 1;
        buf[off] = self.hop_count;
        off += 1;
        buf[off] = self.stratum;
        off += 1;
        buf[off] = 0; // reserved
        off += 1;
        buf[off..off + 4].copy_from_slice(&self.source_node.to_le_bytes());
        off += 4;
        buf[off..off + 4].copy_from_slice(&self.offset_us.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < TIME_SYNC_LEN {
            return Err(WireError::TooShort { got: data.len(), need: TIME_SYNC_LEN });
        }
        let mut off = 0;
        let ts_sec = u32::from_le_bytes(data[off..off + 4].try_into().unwrap());
        off += 4;
        let ts_usec = u32::from_le_bytes(data[off..off + 4].try_into().unwrap());
        off += 4;
        let source_type = TimeSourceType::from_byte(data[off]);
        off += 1;
        let hop_count = data[off];
        off += 1;
        let stratum = data[off];
        off += 2; // skip reserved byte
        let source_node = u32::from_le_bytes(data[off..off + 4].try_into().unwrap());
        off += 4;
        let offset_us = i32::from_le_bytes(data[off..off + 4].try_into().unwrap());
        Ok(Self { ts_sec, ts_usec, source_type, hop_count, stratum, source_node, offset_us })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let msg = TimeSyncMessage {
            ts_sec: 1_700_000_000,
            ts_usec: 500_000,
            source_type: TimeSourceType::Gps,
            hop_count: 2,
            stratum: 1,
            source_node: 0xAABBCCDD,
            offset_us: -250,
        };
        assert_eq!(TimeSyncMessage::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn source_ordering() {
        assert!(TimeSourceType::Crystal < TimeSourceType::Synced);
        assert!(TimeSourceType::Synced < TimeSourceType::Serial);
        assert!(TimeSourceType::Serial < TimeSourceType::Ntp);
        assert!(TimeSourceType::Ntp < TimeSourceType::Gps);
    }
}
