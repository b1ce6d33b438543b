//! BLAKE2b hashing/KDF helpers shared by the handshake, transport AEAD
//! and Double Ratchet. Centralized here so the digest output sizes
//! (16/32/64 bytes) are only picked once.

use blake2::digest::consts::{U16, U32, U64};
use blake2::{Blake2b, Digest};

pub type Blake2b128 = Blake2b<U16>;
pub type Blake2b256 = Blake2b<U32>;
pub type Blake2b512 = Blake2b<U64>;

pub fn hash256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    for p in parts {
        hasher.update(p);
    }
    hasher.finalize().into()
}

pub fn hash128(parts: &[&[u8]]) -> [u8; 16] {
    let mut hasher = Blake2b128::new();
    for p in parts {
        hasher.update(p);
    }
    hasher.finalize().into()
}

pub fn hash512(parts: &[&[u8]]) -> [u8; 64] {
    let mut hasher = Blake2b512::new();
    for p in parts {
        hasher.update(p);
    }
    hasher.finalize().into()
}

/// `KDF_RK(root, dh_out) -> (new_root, chain_key)`: mixes the current
/// root key with a fresh DH output and splits the 64-byte digest in
/// half. Used on every Double Ratchet DH-ratchet step.
pub fn kdf_root(root: &[u8; 32], dh_out: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let wide = hash512(&[root, dh_out]);
    let mut new_root = [0u8; 32];
    let mut chain_key = [0u8; 32];
    new_root.copy_from_slice(&wide[0..32]);
    chain_key.copy_from_slice(&wide[32..64]);
    (new_root, chain_key)
}

/// `KDF_CK(ck) -> (next_ck, message_key)` per the symmetric-ratchet
/// chain step: `mk = BLAKE2b(ck || 0x01)`, `ck' = BLAKE2b(ck || 0x02)`.
pub fn kdf_chain(chain_key: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let message_key = hash256(&[chain_key, &[0x01]]);
    let next_chain_key = hash256(&[chain_key, &[0x02]]);
    (next_chain_key, message_key)
}

/// Builds the 24-byte XChaCha20-Poly1305 nonce used for both the
/// session transport frame and ratchet message encryption: first 4
/// bytes are the little-endian counter, byte 4 is a fixed direction
/// marker, the rest is zero padding.
pub fn build_nonce(counter: u32) -> [u8; 24] {
    let mut nonce = [0u8; 24];
    nonce[0..4].copy_from_slice(&counter.to_le_bytes());
    nonce[4] = 0x01;
    nonce
}
