//! Double Ratchet forward secrecy on top of an already-established
//! link session. A [`RatchetState`] is created once a [`crate::session::Session`]
//! reaches `Active` and the link's `LINK_FLAG_RATCHET` bit is in use;
//! everything here operates per-message, independent of the session's
//! own replay counter.

use std::collections::VecDeque;

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::XChaCha20Poly1305;
use farlink_wire::RatchetHeader;
use rand_core::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::primitives::{build_nonce, hash256, kdf_chain, kdf_root};

/// Cap on how many message keys from a superseded chain we'll cache
/// waiting for an out-of-order message; also the max forward skip
/// within the current chain.
pub const RATCHET_MAX_SKIP: u32 = 100;

struct ChainState {
    key: [u8; 32],
    counter: u32,
}

impl Drop for ChainState {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

pub struct RatchetState {
    dh_self: StaticSecret,
    dh_self_pub: PublicKey,
    dh_remote: Option<PublicKey>,
    root_key: [u8; 32],
    send_chain: Option<ChainState>,
    recv_chain: Option<ChainState>,
    prev_chain_len: u32,
    /// `(remote_pubkey_bytes, msg_num) -> message_key`, FIFO-evicted.
    skipped: VecDeque<(([u8; 32], u32), [u8; 32])>,
}

impl Drop for RatchetState {
    fn drop(&mut self) {
        self.root_key.zeroize();
        for (_, key) in self.skipped.iter_mut() {
            key.zeroize();
        }
    }
}

impl RatchetState {
    /// Alice's side: she already holds `shared_secret` from the link
    /// handshake and immediately derives a sending chain against Bob's
    /// handshake public key, which doubles as the bootstrap `dh_remote`.
    pub fn new_initiator(shared_secret: &[u8; 32], link_id: &[u8; 16], peer_handshake_pk: PublicKey) -> Self {
        let root0 = hash256(&[shared_secret, link_id, b"ratchet-root"]);
        let dh_self = StaticSecret::random_from_rng(OsRng);
        let dh_self_pub = PublicKey::from(&dh_self);
        let dh_out = dh_self.diffie_hellman(&peer_handshake_pk);
        let (root1, send_key) = kdf_root(&root0, dh_out.as_bytes());
        Self {
            dh_self,
            dh_self_pub,
            dh_remote: Some(peer_handshake_pk),
            root_key: root1,
            send_chain: Some(ChainState { key: send_key, counter: 0 }),
            recv_chain: None,
            prev_chain_len: 0,
            skipped: VecDeque::new(),
        }
    }

    /// Bob's side: defers the DH-ratchet until Alice's first message
    /// arrives, reusing his handshake keypair as the initial `dh_self`.
    pub fn new_responder(
        shared_secret: &[u8; 32],
        link_id: &[u8; 16],
        own_handshake_sk: StaticSecret,
        own_handshake_pk: PublicKey,
    ) -> Self {
        let root0 = hash256(&[shared_secret, link_id, b"ratchet-root"]);
        Self {
            dh_self: own_handshake_sk,
            dh_self_pub: own_handshake_pk,
            dh_remote: None,
            root_key: root0,
            send_chain: None,
            recv_chain: None,
            prev_chain_len: 0,
            skipped: VecDeque::new(),
        }
    }

    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<(RatchetHeader, Vec<u8>), CryptoError> {
        let chain = self.send_chain.as_mut().ok_or(CryptoError::InvalidState)?;
        let (next_key, message_key) = kdf_chain(&chain.key);
        let header = RatchetHeader {
            dh_pk: *self.dh_self_pub.as_bytes(),
            prev_chain_len: self.prev_chain_len,
            msg_num: chain.counter,
        };
        let nonce = build_nonce(chain.counter);
        let cipher = XChaCha20Poly1305::new((&message_key).into());
        let aad = header.encode();
        let ct = cipher
            .encrypt((&nonce).into(), Payload { msg: plaintext, aad: &aad })
            .map_err(|_| CryptoError::AuthFailure)?;
        chain.key = next_key;
        chain.counter += 1;
        Ok((header, ct))
    }

    pub fn decrypt(&mut self, header: &RatchetHeader, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let remote_changed = match &self.dh_remote {
            Some(pk) => pk.as_bytes() != &header.dh_pk,
            None => true,
        };
        if remote_changed {
            self.dh_ratchet_step(header.dh_pk, header.prev_chain_len)?;
        }

        if let Some(key) = self.take_skipped(&header.dh_pk, header.msg_num) {
            return self.open(header, ciphertext, &key);
        }

        let chain = self.recv_chain.as_mut().ok_or(CryptoError::InvalidState)?;
        if header.msg_num < chain.counter {
            return Err(CryptoError::Replay { seq: header.msg_num, last_seq: chain.counter });
        }
        let skip = header.msg_num - chain.counter;
        if skip > RATCHET_MAX_SKIP {
            return Err(CryptoError::SkipWindowExceeded { requested: skip, max: RATCHET_MAX_SKIP });
        }
        let mut key = chain.key;
        let mut counter = chain.counter;
        let mut message_key = [0u8; 32];
        for _ in 0..=skip {
            let (next_key, mk) = kdf_chain(&key);
            if counter == header.msg_num {
                message_key = mk;
            } else {
                self.cache_skipped(header.dh_pk, counter, mk);
            }
            key = next_key;
            counter += 1;
        }
        let chain = self.recv_chain.as_mut().expect("checked above");
        chain.key = key;
        chain.counter = counter;
        self.open(header, ciphertext, &message_key)
    }

    fn open(&self, header: &RatchetHeader, ciphertext: &[u8], message_key: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
        let nonce = build_nonce(header.msg_num);
        let cipher = XChaCha20Poly1305::new(message_key.into());
        let aad = header.encode();
        cipher
            .decrypt((&nonce).into(), Payload { msg: ciphertext, aad: &aad })
            .map_err(|_| CryptoError::AuthFailure)
    }

    fn dh_ratchet_step(&mut self, remote_pk_bytes: [u8; 32], remote_prev_chain_len: u32) -> Result<(), CryptoError> {
        if let Some(old_remote) = self.dh_remote {
            if let Some(chain) = self.recv_chain.take() {
                self.skip_remaining(old_remote.to_bytes(), chain, remote_prev_chain_len)?;
            }
        }
        let remote_pk = PublicKey::from(remote_pk_bytes);
        let dh_out = self.dh_self.diffie_hellman(&remote_pk);
        let (root1, recv_key) = kdf_root(&self.root_key, dh_out.as_bytes());
        self.root_key = root1;
        self.recv_chain = Some(ChainState { key: recv_key, counter: 0 });
        self.dh_remote = Some(remote_pk);

        self.prev_chain_len = self.send_chain.as_ref().map(|c| c.counter).unwrap_or(0);
        let new_self = StaticSecret::random_from_rng(OsRng);
        self.dh_self_pub = PublicKey::from(&new_self);
        let dh_out2 = new_self.diffie_hellman(&remote_pk);
        let (root2, send_key) = kdf_root(&self.root_key, dh_out2.as_bytes());
        self.root_key = root2;
        self.dh_self = new_self;
        self.send_chain = Some(ChainState { key: send_key, counter: 0 });
        Ok(())
    }

    fn skip_remaining(&mut self, remote_bytes: [u8; 32], chain: ChainState, until: u32) -> Result<(), CryptoError> {
        if until < chain.counter {
            return Ok(());
        }
        let skip = until - chain.counter;
        if skip > RATCHET_MAX_SKIP {
            return Err(CryptoError::SkipWindowExceeded { requested: skip, max: RATCHET_MAX_SKIP });
        }
        let mut key = chain.key;
        let mut counter = chain.counter;
        for _ in 0..skip {
            let (next_key, mk) = kdf_chain(&key);
            self.cache_skipped(remote_bytes, counter, mk);
            key = next_key;
            counter += 1;
        }
        Ok(())
    }

    fn cache_skipped(&mut self, remote_bytes: [u8; 32], msg_num: u32, key: [u8; 32]) {
        if self.skipped.len() as u32 >= RATCHET_MAX_SKIP {
            self.skipped.pop_front();
        }
        self.skipped.push_back(((remote_bytes, msg_num), key));
    }

    fn take_skipped(&mut self, remote_bytes: &[u8; 32], msg_num: u32) -> Option<[u8; 32]> {
        let pos = self.skipped.iter().position(|((pk, n), _)| pk == remote_bytes && *n == msg_num)?;
        Some(self.skipped.remove(pos).unwrap().1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paired() -> (RatchetState, RatchetState) {
        let shared = [42u8; 32];
        let link_id = [7u8; 16];
        let bob_handshake_sk = StaticSecret::random_from_rng(OsRng);
        let bob_handshake_pk = PublicKey::from(&bob_handshake_sk);
        let alice = RatchetState::new_initiator(&shared, &link_id, bob_handshake_pk);
        let bob = RatchetState::new_responder(&shared, &link_id, bob_handshake_sk, bob_handshake_pk);
        (alice, bob)
    }

    #[test]
    fn in_order_round_trip_both_directions() {
        let (mut alice, mut bob) = paired();
        let (header, ct) = alice.encrypt(b"hello bob").unwrap();
        let pt = bob.decrypt(&header, &ct).unwrap();
        assert_eq!(pt, b"hello bob");

        let (header2, ct2) = bob.encrypt(b"hi alice").unwrap();
        let pt2 = alice.decrypt(&header2, &ct2).unwrap();
        assert_eq!(pt2, b"hi alice");
    }

    #[test]
    fn out_of_order_within_skip_window_succeeds() {
        let (mut alice, mut bob) = paired();
        let (h0, c0) = alice.encrypt(b"m0").unwrap();
        let (_h1, _c1) = alice.encrypt(b"m1").unwrap();
        let (h2, c2) = alice.encrypt(b"m2").unwrap();

        let pt2 = bob.decrypt(&h2, &c2).unwrap();
        assert_eq!(pt2, b"m2");
        let pt0 = bob.decrypt(&h0, &c0).unwrap();
        assert_eq!(pt0, b"m0");
    }

    #[test]
    fn beyond_skip_window_fails() {
        let (mut alice, mut bob) = paired();
        let mut last = None;
        for i in 0..(RATCHET_MAX_SKIP + 5) {
            let (h, c) = alice.encrypt(format!("m{i}").as_bytes()).unwrap();
            last = Some((h, c));
        }
        let (h, c) = last.unwrap();
        assert!(matches!(bob.decrypt(&h, &c), Err(CryptoError::SkipWindowExceeded { .. })));
    }

    #[test]
    fn tampered_ciphertext_fails_auth() {
        let (mut alice, mut bob) = paired();
        let (header, mut ct) = alice.encrypt(b"integrity check").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0xFF;
        assert!(matches!(bob.decrypt(&header, &ct), Err(CryptoError::AuthFailure)));
    }
}
