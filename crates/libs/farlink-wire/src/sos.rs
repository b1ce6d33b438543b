//! Emergency (SOS) broadcast wire format.
//!
//! ```text
//! 0x53 0x4F | sosType(u8) | flags(u8) | lat(i32) | lon(i32) | alt(i32)
//!           | battery(u8) | timestamp(u32) | message[64]
//! ```
//! Latitude/longitude follow the same `*1e7`-scaled signed-integer
//! convention as the location beacons in [`crate`]'s geographic routing
//! payloads (defined alongside `farlink-mesh::geo`).

use crate::WireError;

pub const SOS_MAGIC: [u8; 2] = [0x53, 0x4F];
pub const SOS_MESSAGE_TEXT_LEN: usize = 64;
pub const SOS_MESSAGE_LEN: usize = 1 + 1 + 4 + 4 + 4 + 1 + 4 + SOS_MESSAGE_TEXT_LEN;
pub const SOS_FRAME_LEN: usize = 2 + SOS_MESSAGE_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SosType {
    Medical = 0,
    Fire = 1,
    Security = 2,
    General = 3,
    /// Exercises the SOS path without alarming real responders; the
    /// only type allowed to coexist with another active SOS locally.
    EmergencyTest = 0xFF,
}

impl SosType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0 => Self::Medical,
            1 => Self::Fire,
            2 => Self::Security,
            0xFF => Self::EmergencyTest,
            _ => Self::General,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SosMessage {
    pub sos_type: SosType,
    pub flags: u8,
    pub lat_e7: i32,
    pub lon_e7: i32,
    pub alt_m: i32,
    pub battery_pct: u8,
    pub timestamp: u32,
    /// UTF-8 text, truncated/zero-padded to [`SOS_MESSAGE_TEXT_LEN`] bytes.
    pub message: String,
}

impl SosMessage {
    /// Encodes `0x53 0x4F` followed by the fixed-size message body.
    pub fn encode(&self) -> [u8; SOS_FRAME_LEN] {
        let mut buf = [0u8; SOS_FRAME_LEN];
        buf[0..2].copy_from_slice(&SOS_MAGIC);
        let mut off = 2;
        buf[off] = self.sos_type as u8;
        off += 1;
        buf[off] = self.flags;
        off += 1;
        buf[off..off + 4].copy_from_slice(&self.lat_e7.to_le_bytes());
        off += 4;
        buf[off..off + 4].copy_from_slice(&self.lon_e7.to_le_bytes());
        off += 4;
        buf[off..off + 4].copy_from_slice(&self.alt_m.to_le_bytes());
        off += 4;
        buf[off] = self.battery_pct;
        off += 1;
        buf[off..off + 4].copy_from_slice(&self.timestamp.to_le_bytes());
        off += 4;
        let text = self.message.as_bytes();
        let n = text.len().min(SOS_MESSAGE_TEXT_LEN);
        buf[off..off + n].copy_from_slice(&text[..n]);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < SOS_FRAME_LEN {
            return Err(WireError::TooShort { got: data.len(), need: SOS_FRAME_LEN });
        }
        if data[0..2] != SOS_MAGIC {
            return Err(WireError::UnknownPacketType(data[0]));
        }
        let mut off = 2;
        let sos_type = SosType::from_byte(data[off]);
        off += 1;
        let flags = data[off];
        off += 1;
        let lat_e7 = i32::from_le_bytes(data[off..off + 4].try_into().unwrap());
        off += 4;
        let lon_e7 = i32::from_le_bytes(data[off..off + 4].try_into().unwrap());
        off += 4;
        let alt_m = i32::from_le_bytes(data[off..off + 4].try_into().unwrap());
        off += 4;
        let battery_pct = data[off];
        off += 1;
        let timestamp = u32::from_le_bytes(data[off..off + 4].try_into().unwrap());
        off += 4;
        let text_bytes = &data[off..off + SOS_MESSAGE_TEXT_LEN];
        let end = text_bytes.iter().position(|&b| b == 0).unwrap_or(SOS_MESSAGE_TEXT_LEN);
        let message = String::from_utf8_lossy(&text_bytes[..end]).into_owned();

        Ok(Self { sos_type, flags, lat_e7, lon_e7, alt_m, battery_pct, timestamp, message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_with_magic_and_truncated_text() {
        let msg = SosMessage {
            sos_type: SosType::Medical,
            flags: 0,
            lat_e7: 407_128_000,
            lon_e7: -740_060_000,
            alt_m: 10,
            battery_pct: 42,
            timestamp: 1_700_000_000,
            message: "help".to_string(),
        };
        let encoded = msg.encode();
        assert_eq!(&encoded[0..2], &SOS_MAGIC);
        let decoded = SosMessage::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn rejects_missing_magic() {
        let data = [0u8; SOS_FRAME_LEN];
        assert!(SosMessage::decode(&data).is_err());
    }
}
