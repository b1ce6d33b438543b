//! The 20-byte FarLink packet header and its typed payload envelope.
//!
//! Layout (all multi-byte scalars little-endian, no padding):
//!
//! ```text
//! offset  size  field
//! 0       1     version:4 | type:4
//! 1       1     ttl:4 | hop_count:4
//! 2       1     flags
//! 3       2     packet_id
//! 5       4     source
//! 9       4     destination
//! 13      4     next_hop
//! 17      1     seq
//! 18      2     payload_length
//! 20      ..    payload (payload_length bytes, <= 255)
//! ```
//!
//! `ttl` and `hop_count` share a byte rather than each taking a full
//! `u8`: both are bounded by `MAX_TTL` (15), so four bits apiece is
//! exactly enough, and folding them in (the same trick already used for
//! `version`/`type`) is what gets the header down to exactly 20 bytes.

use crate::WireError;

/// Reserved broadcast destination/source sentinel.
pub const ADDRESS_BROADCAST: u32 = 0xFFFF_FFFF;
/// Reserved "unknown"/unassigned address.
pub const ADDRESS_UNKNOWN: u32 = 0;

/// Maximum hop/TTL value representable in the packed nibble.
pub const MAX_TTL: u8 = 15;
/// Maximum payload size in bytes.
pub const MAX_PAYLOAD: usize = 255;
/// Size of the fixed packet header in bytes.
pub const PACKET_HEADER_LEN: usize = 20;

/// Current wire protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Packet type carried in the low nibble of byte 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Data = 0x0,
    Ack = 0x1,
    Rreq = 0x2,
    Rrep = 0x3,
    Rerr = 0x4,
    Hello = 0x5,
    Telemetry = 0x6,
    Beacon = 0x7,
    TimeSync = 0x8,
    Sos = 0x9,
    Geocast = 0xA,
    Location = 0xB,
    LinkRequest = 0xC,
    LinkAccept = 0xD,
    LinkData = 0xE,
    Dtn = 0xF,
}

impl PacketType {
    pub fn from_nibble(nibble: u8) -> Result<Self, WireError> {
        Ok(match nibble {
            0x0 => Self::Data,
            0x1 => Self::Ack,
            0x2 => Self::Rreq,
            0x3 => Self::Rrep,
            0x4 => Self::Rerr,
            0x5 => Self::Hello,
            0x6 => Self::Telemetry,
            0x7 => Self::Beacon,
            0x8 => Self::TimeSync,
            0x9 => Self::Sos,
            0xA => Self::Geocast,
            0xB => Self::Location,
            0xC => Self::LinkRequest,
            0xD => Self::LinkAccept,
            0xE => Self::LinkData,
            0xF => Self::Dtn,
            other => return Err(WireError::UnknownPacketType(other)),
        })
    }

    pub fn to_nibble(self) -> u8 {
        self as u8
    }
}

bitflags::bitflags! {
    /// Header flag bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PacketFlags: u8 {
        const ACK_REQUESTED = 0b0000_0001;
        const ENCRYPTED     = 0b0000_0010;
        const BROADCAST     = 0b0000_0100;
        const RETRANSMISSION = 0b0000_1000;
        /// Set on a `Dtn`-type packet whose payload is a custody signal
        /// rather than a bundle fragment header.
        const CUSTODY_SIGNAL = 0b0001_0000;
    }
}

/// The fixed 20-byte FarLink packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub version: u8,
    pub packet_type: PacketType,
    pub ttl: u8,
    pub hop_count: u8,
    pub flags: PacketFlags,
    pub packet_id: u16,
    pub source: u32,
    pub destination: u32,
    pub next_hop: u32,
    pub seq: u8,
    pub payload_length: u16,
}

impl PacketHeader {
    /// Builds a header, enforcing the destination/broadcast-flag
    /// consistency invariant from the spec: `destination == BROADCAST`
    /// implies the `BROADCAST` flag is set and `ACK_REQUESTED` is clear.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        packet_type: PacketType,
        ttl: u8,
        mut flags: PacketFlags,
        packet_id: u16,
        source: u32,
        destination: u32,
        next_hop: u32,
        hop_count: u8,
        seq: u8,
        payload_length: u16,
    ) -> Result<Self, WireError> {
        if payload_length as usize > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge(payload_length as usize));
        }
        if hop_count >= MAX_TTL {
            return Err(WireError::HopCountExceeded { hop_count, max_ttl: MAX_TTL });
        }
        if destination == ADDRESS_BROADCAST {
            flags.insert(PacketFlags::BROADCAST);
            flags.remove(PacketFlags::ACK_REQUESTED);
        } else if flags.contains(PacketFlags::BROADCAST) {
            return Err(WireError::InconsistentBroadcastFlag);
        }

        Ok(Self {
            version: PROTOCOL_VERSION,
            packet_type,
            ttl,
            hop_count,
            flags,
            packet_id,
            source,
            destination,
            next_hop,
            seq,
            payload_length,
        })
    }

    pub fn is_broadcast(&self) -> bool {
        self.destination == ADDRESS_BROADCAST
    }

    /// Encodes the header to exactly [`PACKET_HEADER_LEN`] bytes.
    pub fn encode(&self) -> [u8; PACKET_HEADER_LEN] {
        let mut buf = [0u8; PACKET_HEADER_LEN];
        buf[0] = (self.version << 4) | (self.packet_type.to_nibble() & 0x0F);
        buf[1] = (self.ttl << 4) | (self.hop_count & 0x0F);
        buf[2] = self.flags.bits();
        buf[3..5].copy_from_slice(&self.packet_id.to_le_bytes());
        buf[5..9].copy_from_slice(&self.source.to_le_bytes());
        buf[9..13].copy_from_slice(&self.destination.to_le_bytes());
        buf[13..17].copy_from_slice(&self.next_hop.to_le_bytes());
        buf[17] = self.seq;
        buf[18..20].copy_from_slice(&self.payload_length.to_le_bytes());
        buf
    }

    /// Decodes a header from the first [`PACKET_HEADER_LEN`] bytes of
    /// `data`. Does not validate that `data` actually contains
    /// `payload_length` trailing bytes — use [`decode_packet`] for that.
    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < PACKET_HEADER_LEN {
            return Err(WireError::TooShort { got: data.len(), need: PACKET_HEADER_LEN });
        }

        let version = data[0] >> 4;
        if version != PROTOCOL_VERSION {
            return Err(WireError::UnsupportedVersion(version));
        }
        let packet_type = PacketType::from_nibble(data[0] & 0x0F)?;
        let ttl = data[1] >> 4;
        let hop_count = data[1] & 0x0F;
        if hop_count >= MAX_TTL {
            return Err(WireError::HopCountExceeded { hop_count, max_ttl: MAX_TTL });
        }
        let flags = PacketFlags::from_bits_truncate(data[2]);
        let packet_id = u16::from_le_bytes([data[3], data[4]]);
        let source = u32::from_le_bytes([data[5], data[6], data[7], data[8]]);
        let destination = u32::from_le_bytes([data[9], data[10], data[11], data[12]]);
        let next_hop = u32::from_le_bytes([data[13], data[14], data[15], data[16]]);
        let seq = data[17];
        let payload_length = u16::from_le_bytes([data[18], data[19]]);

        if payload_length as usize > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge(payload_length as usize));
        }
        if destination == ADDRESS_BROADCAST && !flags.contains(PacketFlags::BROADCAST) {
            return Err(WireError::InconsistentBroadcastFlag);
        }

        Ok(Self {
            version,
            packet_type,
            ttl,
            hop_count,
            flags,
            packet_id,
            source,
            destination,
            next_hop,
            seq,
            payload_length,
        })
    }
}

/// A full packet: header plus payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(mut header: PacketHeader, payload: Vec<u8>) -> Result<Self, WireError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge(payload.len()));
        }
        header.payload_length = payload.len() as u16;
        Ok(Self { header, payload })
    }

    /// Encodes to exactly `20 + payload_length` bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PACKET_HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.header.encode());
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let header = PacketHeader::decode(data)?;
        let end = PACKET_HEADER_LEN + header.payload_length as usize;
        if data.len() < end {
            return Err(WireError::PayloadOverrun { declared: header.payload_length as usize, available: data.len() - PACKET_HEADER_LEN });
        }
        let payload = data[PACKET_HEADER_LEN..end].to_vec();
        Ok(Self { header, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> PacketHeader {
        PacketHeader::new(
            PacketType::Data,
            15,
            PacketFlags::ACK_REQUESTED,
            0x1234,
            0x0000_0001,
            0x0000_0002,
            0x0000_0002,
            0,
            7,
            5,
        )
        .unwrap()
    }

    #[test]
    fn header_roundtrip() {
        let header = sample_header();
        let encoded = header.encode();
        assert_eq!(encoded.len(), PACKET_HEADER_LEN);
        let decoded = PacketHeader::decode(&encoded).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn packet_roundtrip_byte_for_byte() {
        let header = sample_header();
        let payload = vec![1, 2, 3, 4, 5];
        let packet = Packet::new(header, payload.clone()).unwrap();
        let encoded = packet.encode();
        assert_eq!(encoded.len(), PACKET_HEADER_LEN + payload.len());
        let decoded = Packet::decode(&encoded).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn broadcast_destination_forces_flag_and_clears_ack() {
        let header = PacketHeader::new(
            PacketType::Hello,
            15,
            PacketFlags::ACK_REQUESTED,
            1,
            1,
            ADDRESS_BROADCAST,
            ADDRESS_BROADCAST,
            0,
            0,
            0,
        )
        .unwrap();
        assert!(header.flags.contains(PacketFlags::BROADCAST));
        assert!(!header.flags.contains(PacketFlags::ACK_REQUESTED));
    }

    #[test]
    fn rejects_payload_length_exceeding_max() {
        let err = PacketHeader::new(
            PacketType::Data, 15, PacketFlags::empty(), 1, 1, 2, 2, 0, 0, 256,
        )
        .unwrap_err();
        assert_eq!(err, WireError::PayloadTooLarge(256));
    }

    #[test]
    fn rejects_hop_count_at_or_above_max_ttl() {
        let err = PacketHeader::new(
            PacketType::Data, 15, PacketFlags::empty(), 1, 1, 2, 2, MAX_TTL, 0, 0,
        )
        .unwrap_err();
        assert_eq!(err, WireError::HopCountExceeded { hop_count: MAX_TTL, max_ttl: MAX_TTL });
    }

    #[test]
    fn decode_rejects_truncated_frame() {
        let header = sample_header();
        let packet = Packet::new(header, vec![1, 2, 3, 4, 5]).unwrap();
        let mut encoded = packet.encode();
        encoded.truncate(encoded.len() - 2);
        assert!(matches!(Packet::decode(&encoded), Err(WireError::PayloadOverrun { .. })));
    }

    #[test]
    fn decode_rejects_unknown_version() {
        let header = sample_header();
        let mut encoded = header.encode();
        encoded[0] = (9 << 4) | (encoded[0] & 0x0F);
        assert_eq!(PacketHeader::decode(&encoded), Err(WireError::UnsupportedVersion(9)));
    }
}
