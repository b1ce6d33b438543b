//! Node identity: an opaque 32-bit mesh address plus the BLAKE2b hash
//! of that address carried in the link handshake. There is no
//! certificate PKI and no long-term signing key here — every link
//! uses a fresh X25519 ephemeral keypair (see [`crate::session`]).

use crate::primitives::hash256;

/// Computes the `identity` field carried in a [`farlink_wire::LinkRequest`]:
/// `BLAKE2b-256(address.to_le_bytes())`.
pub fn address_identity_hash(address: u32) -> [u8; 32] {
    hash256(&[&address.to_le_bytes()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_deterministic_and_address_sensitive() {
        let a = address_identity_hash(42);
        let b = address_identity_hash(42);
        let c = address_identity_hash(43);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
