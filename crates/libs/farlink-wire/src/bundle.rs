//! DTN bundle header wire format.
//!
//! ```text
//! bundle_id(u32) | source(u32) | destination(u32) | custodian(u32)
//! | creation_time(u32) | ttl(u32) | payload_length(u16) | flags(u8)
//! | priority(u8) | frag_offset(u8) | frag_count(u8) | hop_count(u8)
//! | max_hops(u8)
//! ```
//! 32 bytes total. `status` (`Empty`/`Pending`/`InTransit`/`CustodyWait`/
//! `Delivered`/`Expired`/`Failed`) is node-local bookkeeping, not carried
//! on the wire.

use crate::WireError;

pub const BUNDLE_HEADER_LEN: usize = 4 * 6 + 2 + 1 * 6;

pub const BUNDLE_FLAG_FRAGMENT: u8 = 0x01;
pub const BUNDLE_FLAG_CUSTODY: u8 = 0x02;
pub const BUNDLE_FLAG_PRIORITY: u8 = 0x04;
pub const BUNDLE_FLAG_EPIDEMIC: u8 = 0x08;
/// Resolves the spec's open question on delivery reports: implemented,
/// not left as a TODO. A bundle whose payload is
/// `{reported_id:u32, delivered_at:u32}` sets this bit.
pub const BUNDLE_FLAG_REPORT_DELIV: u8 = 0x40;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BundleFlags: u8 {
        const FRAGMENT      = BUNDLE_FLAG_FRAGMENT;
        const CUSTODY       = BUNDLE_FLAG_CUSTODY;
        const PRIORITY      = BUNDLE_FLAG_PRIORITY;
        const EPIDEMIC      = BUNDLE_FLAG_EPIDEMIC;
        const REPORT_DELIV  = BUNDLE_FLAG_REPORT_DELIV;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BundlePriority {
    Bulk = 0,
    Normal = 1,
    Expedited = 2,
    Emergency = 3,
}

impl BundlePriority {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0 => Self::Bulk,
            2 => Self::Expedited,
            3 => Self::Emergency,
            _ => Self::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleHeader {
    pub bundle_id: u32,
    pub source: u32,
    pub destination: u32,
    pub custodian: u32,
    pub creation_time: u32,
    pub ttl: u32,
    pub payload_length: u16,
    pub flags: BundleFlags,
    pub priority: BundlePriority,
    pub frag_offset: u8,
    pub frag_count: u8,
    pub hop_count: u8,
    pub max_hops: u8,
}

impl BundleHeader {
    pub fn encode(&self) -> [u8; BUNDLE_HEADER_LEN] {
        let mut buf = [0u8; BUNDLE_HEADER_LEN];
        let mut off = 0;
        macro_rules! put_u32 {
            ($v:expr) => {
                buf[off..off + 4].copy_from_slice(&$v.to_le_bytes());
                off += 4;
            };
        }
        put_u32!(self.bundle_id);
        put_u32!(self.source);
        put_u32!(self.destination);
        put_u32!(self.custodian);
        put_u32!(self.creation_time);
        put_u32!(self.ttl);
        buf[off..off + 2].copy_from_slice(&self.payload_length.to_le_bytes());
        off += 2;
        buf[off] = self.flags.bits();
        off += 1;
        buf[off] = self.priority as u8;
        off += 1;
        buf[off] = self.frag_offset;
        off += 1;
        buf[off] = self.frag_count;
        off += 1;
        buf[off] = self.hop_count;
        off += 1;
        buf[off] = self.max_hops;
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < BUNDLE_HEADER_LEN {
            return Err(WireError::TooShort { got: data.len(), need: BUNDLE_HEADER_LEN });
        }
        let mut off = 0;
        macro_rules! get_u32 {
            () => {{
                let v = u32::from_le_bytes(data[off..off + 4].try_into().unwrap());
                off += 4;
                v
            }};
        }
        let bundle_id = get_u32!();
        let source = get_u32!();
        let destination = get_u32!();
        let custodian = get_u32!();
        let creation_time = get_u32!();
        let ttl = get_u32!();
        let payload_length = u16::from_le_bytes(data[off..off + 2].try_into().unwrap());
        off += 2;
        let flags = BundleFlags::from_bits_truncate(data[off]);
        off += 1;
        let priority = BundlePriority::from_byte(data[off]);
        off += 1;
        let frag_offset = data[off];
        off += 1;
        let frag_count = data[off];
        off += 1;
        let hop_count = data[off];
        off += 1;
        let max_hops = data[off];

        Ok(Self {
            bundle_id,
            source,
            destination,
            custodian,
            creation_time,
            ttl,
            payload_length,
            flags,
            priority,
            frag_offset,
            frag_count,
            hop_count,
            max_hops,
        })
    }
}

/// Delivery-confirmation report payload (spec §9 open question,
/// resolved): `{reported_id:u32, delivered_at:u32}`, carried as the
/// payload of a bundle whose header sets `BUNDLE_FLAG_REPORT_DELIV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub reported_id: u32,
    pub delivered_at: u32,
}

impl DeliveryReport {
    pub const LEN: usize = 8;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[0..4].copy_from_slice(&self.reported_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.delivered_at.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < Self::LEN {
            return Err(WireError::TooShort { got: data.len(), need: Self::LEN });
        }
        Ok(Self {
            reported_id: u32::from_le_bytes(data[0..4].try_into().unwrap()),
            delivered_at: u32::from_le_bytes(data[4..8].try_into().unwrap()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BundleHeader {
        BundleHeader {
            bundle_id: 1,
            source: 2,
            destination: 3,
            custodian: 2,
            creation_time: 1000,
            ttl: 3600,
            payload_length: 128,
            flags: BundleFlags::CUSTODY,
            priority: BundlePriority::Expedited,
            frag_offset: 0,
            frag_count: 1,
            hop_count: 0,
            max_hops: 8,
        }
    }

    #[test]
    fn roundtrip() {
        let header = sample();
        assert_eq!(BundleHeader::decode(&header.encode()).unwrap(), header);
    }

    #[test]
    fn header_is_exactly_32_bytes() {
        assert_eq!(BUNDLE_HEADER_LEN, 32);
    }

    #[test]
    fn delivery_report_roundtrip() {
        let report = DeliveryReport { reported_id: 77, delivered_at: 99 };
        assert_eq!(DeliveryReport::decode(&report.encode()).unwrap(), report);
    }
}
