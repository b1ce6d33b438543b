//! Link (session) handshake and transport-frame wire formats.
//!
//! ```text
//! LinkRequest = link_id(16) | pk(32) | identity(32) | ts(u32) | flags(u8)
//! LinkAccept  = link_id(16) | pk(32) | proof(16)
//! LinkData    = link_id(16) | seq(u32) | length(u16) | flags(u8) | ct..  | tag(16)
//! ```
//!
//! `LinkData`'s ciphertext and trailing 16-byte AEAD tag are opaque to
//! this crate; only the fixed prefix is framed here. `farlink-crypto`
//! owns the encrypt/decrypt side.

use crate::WireError;

pub const LINK_ID_LEN: usize = 16;
pub const PUBLIC_KEY_LEN: usize = 32;
pub const IDENTITY_HASH_LEN: usize = 32;
pub const PROOF_LEN: usize = 16;
pub const AEAD_TAG_LEN: usize = 16;

pub const LINK_REQUEST_LEN: usize = LINK_ID_LEN + PUBLIC_KEY_LEN + IDENTITY_HASH_LEN + 4 + 1;
pub const LINK_ACCEPT_LEN: usize = LINK_ID_LEN + PUBLIC_KEY_LEN + PROOF_LEN;
pub const LINK_DATA_HEADER_LEN: usize = LINK_ID_LEN + 4 + 2 + 1;

/// Bit set in [`LinkDataHeader::flags`] when the payload is ratcheted
/// (Double Ratchet ciphertext) rather than plain session-key AEAD.
pub const LINK_FLAG_RATCHET: u8 = 0x80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRequest {
    pub link_id: [u8; LINK_ID_LEN],
    pub public_key: [u8; PUBLIC_KEY_LEN],
    pub identity: [u8; IDENTITY_HASH_LEN],
    pub timestamp: u32,
    pub flags: u8,
}

impl LinkRequest {
    pub fn encode(&self) -> [u8; LINK_REQUEST_LEN] {
        let mut buf = [0u8; LINK_REQUEST_LEN];
        let mut off = 0;
        buf[off..off + LINK_ID_LEN].copy_from_slice(&self.link_id);
        off += LINK_ID_LEN;
        buf[off..off + PUBLIC_KEY_LEN].copy_from_slice(&self.public_key);
        off += PUBLIC_KEY_LEN;
        buf[off..off + IDENTITY_HASH_LEN].copy_from_slice(&self.identity);
        off += IDENTITY_HASH_LEN;
        buf[off..off + 4].copy_from_slice(&self.timestamp.to_le_bytes());
        off += 4;
        buf[off] = self.flags;
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < LINK_REQUEST_LEN {
            return Err(WireError::TooShort { got: data.len(), need: LINK_REQUEST_LEN });
        }
        let mut off = 0;
        let mut link_id = [0u8; LINK_ID_LEN];
        link_id.copy_from_slice(&data[off..off + LINK_ID_LEN]);
        off += LINK_ID_LEN;
        let mut public_key = [0u8; PUBLIC_KEY_LEN];
        public_key.copy_from_slice(&data[off..off + PUBLIC_KEY_LEN]);
        off += PUBLIC_KEY_LEN;
        let mut identity = [0u8; IDENTITY_HASH_LEN];
        identity.copy_from_slice(&data[off..off + IDENTITY_HASH_LEN]);
        off += IDENTITY_HASH_LEN;
        let timestamp = u32::from_le_bytes(data[off..off + 4].try_into().unwrap());
        off += 4;
        let flags = data[off];
        Ok(Self { link_id, public_key, identity, timestamp, flags })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkAccept {
    pub link_id: [u8; LINK_ID_LEN],
    pub public_key: [u8; PUBLIC_KEY_LEN],
    pub proof: [u8; PROOF_LEN],
}

impl LinkAccept {
    pub fn encode(&self) -> [u8; LINK_ACCEPT_LEN] {
        let mut buf = [0u8; LINK_ACCEPT_LEN];
        let mut off = 0;
        buf[off..off + LINK_ID_LEN].copy_from_slice(&self.link_id);
        off += LINK_ID_LEN;
        buf[off..off + PUBLIC_KEY_LEN].copy_from_slice(&self.public_key);
        off += PUBLIC_KEY_LEN;
        buf[off..off + PROOF_LEN].copy_from_slice(&self.proof);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < LINK_ACCEPT_LEN {
            return Err(WireError::TooShort { got: data.len(), need: LINK_ACCEPT_LEN });
        }
        let mut off = 0;
        let mut link_id = [0u8; LINK_ID_LEN];
        link_id.copy_from_slice(&data[off..off + LINK_ID_LEN]);
        off += LINK_ID_LEN;
        let mut public_key = [0u8; PUBLIC_KEY_LEN];
        public_key.copy_from_slice(&data[off..off + PUBLIC_KEY_LEN]);
        off += PUBLIC_KEY_LEN;
        let mut proof = [0u8; PROOF_LEN];
        proof.copy_from_slice(&data[off..off + PROOF_LEN]);
        Ok(Self { link_id, public_key, proof })
    }
}

/// Fixed prefix of an encrypted `LinkData` transport frame. The
/// ciphertext (and trailing 16-byte tag) follow immediately after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkDataHeader {
    pub link_id: [u8; LINK_ID_LEN],
    pub seq: u32,
    pub length: u16,
    pub flags: u8,
}

impl LinkDataHeader {
    pub fn is_ratchet(&self) -> bool {
        self.flags & LINK_FLAG_RATCHET != 0
    }

    pub fn encode(&self) -> [u8; LINK_DATA_HEADER_LEN] {
        let mut buf = [0u8; LINK_DATA_HEADER_LEN];
        let mut off = 0;
        buf[off..off + LINK_ID_LEN].copy_from_slice(&self.link_id);
        off += LINK_ID_LEN;
        buf[off..off + 4].copy_from_slice(&self.seq.to_le_bytes());
        off += 4;
        buf[off..off + 2].copy_from_slice(&self.length.to_le_bytes());
        off += 2;
        buf[off] = self.flags;
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < LINK_DATA_HEADER_LEN {
            return Err(WireError::TooShort { got: data.len(), need: LINK_DATA_HEADER_LEN });
        }
        let mut off = 0;
        let mut link_id = [0u8; LINK_ID_LEN];
        link_id.copy_from_slice(&data[off..off + LINK_ID_LEN]);
        off += LINK_ID_LEN;
        let seq = u32::from_le_bytes(data[off..off + 4].try_into().unwrap());
        off += 4;
        let length = u16::from_le_bytes(data[off..off + 2].try_into().unwrap());
        off += 2;
        let flags = data[off];
        Ok(Self { link_id, seq, length, flags })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_request_roundtrip() {
        let req = LinkRequest {
            link_id: [1; LINK_ID_LEN],
            public_key: [2; PUBLIC_KEY_LEN],
            identity: [3; IDENTITY_HASH_LEN],
            timestamp: 123_456,
            flags: 0x01,
        };
        let decoded = LinkRequest::decode(&req.encode()).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn link_accept_roundtrip() {
        let acc = LinkAccept { link_id: [9; LINK_ID_LEN], public_key: [8; PUBLIC_KEY_LEN], proof: [7; PROOF_LEN] };
        let decoded = LinkAccept::decode(&acc.encode()).unwrap();
        assert_eq!(decoded, acc);
    }

    #[test]
    fn link_data_header_roundtrip_and_ratchet_flag() {
        let header = LinkDataHeader { link_id: [4; LINK_ID_LEN], seq: 42, length: 16, flags: LINK_FLAG_RATCHET };
        let decoded = LinkDataHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.is_ratchet());
    }
}
