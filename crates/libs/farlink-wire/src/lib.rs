//! Little-endian wire framing for the FarLink mesh protocol.
//!
//! Every type in this crate is encoded/decoded byte-by-byte rather than
//! aliased over a raw buffer: there is no `#[repr(packed)]` struct read
//! directly off the radio. See [`packet::PacketHeader`] for the core
//! 20-byte frame header and the sibling modules for the payload formats
//! carried inside a packet of the matching [`packet::PacketType`].

pub mod bundle;
pub mod link;
pub mod packet;
pub mod ratchet;
pub mod sos;
pub mod time_sync;

pub use bundle::{BundleFlags, BundleHeader, BundlePriority, DeliveryReport};
pub use link::{LinkAccept, LinkDataHeader, LinkRequest};
pub use packet::{
    Packet, PacketFlags, PacketHeader, PacketType, ADDRESS_BROADCAST, ADDRESS_UNKNOWN, MAX_PAYLOAD,
    MAX_TTL, PACKET_HEADER_LEN,
};
pub use ratchet::RatchetHeader;
pub use sos::{SosMessage, SosType};
pub use time_sync::{TimeSourceType, TimeSyncMessage};

use thiserror::Error;

/// Errors raised while decoding a wire-format frame.
///
/// These are deliberately narrow: a `WireError` never carries the bytes
/// that produced it, only enough context to log and drop.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("frame too short: got {got} bytes, need at least {need}")]
    TooShort { got: usize, need: usize },

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown packet type 0x{0:x}")]
    UnknownPacketType(u8),

    #[error("payload_length {declared} exceeds {available} bytes actually present")]
    PayloadOverrun { declared: usize, available: usize },

    #[error("payload_length {0} exceeds MAX_PAYLOAD (255)")]
    PayloadTooLarge(usize),

    #[error("broadcast flag inconsistent with destination address")]
    InconsistentBroadcastFlag,

    #[error("hop_count {hop_count} must be < max_ttl ({max_ttl})")]
    HopCountExceeded { hop_count: u8, max_ttl: u8 },
}
