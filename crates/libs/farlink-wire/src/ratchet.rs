//! Double Ratchet message header: `dh_pk(32) | prev_chain_len(u32) | msg_num(u32)`.
//!
//! Present in a `LinkData` frame's ciphertext only when
//! [`crate::link::LINK_FLAG_RATCHET`] is set.

use crate::WireError;

pub const RATCHET_HEADER_LEN: usize = 32 + 4 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatchetHeader {
    pub dh_pk: [u8; 32],
    pub prev_chain_len: u32,
    pub msg_num: u32,
}

impl RatchetHeader {
    pub fn encode(&self) -> [u8; RATCHET_HEADER_LEN] {
        let mut buf = [0u8; RATCHET_HEADER_LEN];
        buf[0..32].copy_from_slice(&self.dh_pk);
        buf[32..36].copy_from_slice(&self.prev_chain_len.to_le_bytes());
        buf[36..40].copy_from_slice(&self.msg_num.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < RATCHET_HEADER_LEN {
            return Err(WireError::TooShort { got: data.len(), need: RATCHET_HEADER_LEN });
        }
        let mut dh_pk = [0u8; 32];
        dh_pk.copy_from_slice(&data[0..32]);
        let prev_chain_len = u32::from_le_bytes(data[32..36].try_into().unwrap());
        let msg_num = u32::from_le_bytes(data[36..40].try_into().unwrap());
        Ok(Self { dh_pk, prev_chain_len, msg_num })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let header = RatchetHeader { dh_pk: [5; 32], prev_chain_len: 3, msg_num: 9 };
        assert_eq!(RatchetHeader::decode(&header.encode()).unwrap(), header);
    }
}
