//! X25519 link handshake and AEAD transport.
//!
//! A [`Session`] is a single point-to-point encrypted link between this
//! node and one neighbor, identified by a random 16-byte `link_id`.
//! Keys are derived once per handshake and never renegotiated; forward
//! secrecy beyond that point is the job of [`crate::ratchet::RatchetState`],
//! layered in once the link is `Active` and ratcheting is enabled.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::XChaCha20Poly1305;
use farlink_wire::{LinkAccept, LinkDataHeader, LinkRequest, LINK_FLAG_RATCHET};
use rand_core::{OsRng, RngCore};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::identity::address_identity_hash;
use crate::primitives::{build_nonce, hash128, hash256};
use crate::ratchet::RatchetState;

/// Link goes stale after this many seconds without traffic.
pub const LINK_TIMEOUT_SECS: u32 = 300;
/// Keepalive is due after this many idle seconds.
pub const LINK_KEEPALIVE_SECS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Active,
    Closed,
}

struct DirectionalKeys {
    tx: [u8; 32],
    rx: [u8; 32],
}

impl Drop for DirectionalKeys {
    fn drop(&mut self) {
        self.tx.zeroize();
        self.rx.zeroize();
    }
}

/// One end of an in-progress or established link handshake.
pub struct Session {
    pub link_id: [u8; 16],
    pub peer_address: u32,
    state: SessionState,
    initiator: bool,
    local_sk: Option<StaticSecret>,
    keys: Option<DirectionalKeys>,
    tx_seq: u32,
    rx_seq: Option<u32>,
    pub ratchet: Option<RatchetState>,
    last_activity_secs: u32,
}

fn derive_role_keys(shared: &[u8; 32], link_id: &[u8; 16]) -> ([u8; 32], [u8; 32]) {
    let role1 = hash256(&[shared, link_id, &[0x01]]);
    let role2 = hash256(&[shared, link_id, &[0x02]]);
    (role1, role2)
}

impl Session {
    /// Starts a new outbound link request to `peer_address`, returning
    /// the session (in `Pending` state) and the `LinkRequest` to send.
    pub fn initiate(local_address: u32, peer_address: u32, now_secs: u32) -> (Self, LinkRequest) {
        let mut link_id = [0u8; 16];
        OsRng.fill_bytes(&mut link_id);
        let sk = StaticSecret::random_from_rng(OsRng);
        let pk = PublicKey::from(&sk);
        let request = LinkRequest {
            link_id,
            public_key: *pk.as_bytes(),
            identity: address_identity_hash(local_address),
            timestamp: now_secs,
            flags: 0,
        };
        let session = Self {
            link_id,
            peer_address,
            state: SessionState::Pending,
            initiator: true,
            local_sk: Some(sk),
            keys: None,
            tx_seq: 0,
            rx_seq: None,
            ratchet: None,
            last_activity_secs: now_secs,
        };
        (session, request)
    }

    /// Responds to an inbound `LinkRequest`, returning the `Pending`→`Active`
    /// session (keys derived immediately, no further round trip on this
    /// side) and the `LinkAccept` to send back.
    pub fn respond(local_address: u32, peer_address: u32, req: &LinkRequest, now_secs: u32) -> (Self, LinkAccept) {
        let _ = local_address;
        let sk = StaticSecret::random_from_rng(OsRng);
        let pk = PublicKey::from(&sk);
        let peer_pk = PublicKey::from(req.public_key);
        let shared = sk.diffie_hellman(&peer_pk);
        let proof = hash128(&[shared.as_bytes()]);
        let (role1, role2) = derive_role_keys(shared.as_bytes(), &req.link_id);
        // Responder's tx uses role 0x02, rx uses role 0x01 (see module docs).
        let keys = DirectionalKeys { tx: role2, rx: role1 };
        let accept = LinkAccept { link_id: req.link_id, public_key: *pk.as_bytes(), proof };
        let session = Self {
            link_id: req.link_id,
            peer_address,
            state: SessionState::Active,
            initiator: false,
            local_sk: None,
            keys: Some(keys),
            tx_seq: 0,
            rx_seq: None,
            ratchet: None,
            last_activity_secs: now_secs,
        };
        (session, accept)
    }

    /// Completes an outbound handshake on receipt of the peer's
    /// `LinkAccept`: verifies the proof, derives the directional keys
    /// and wipes the ephemeral secret.
    pub fn complete(&mut self, accept: &LinkAccept, now_secs: u32) -> Result<(), CryptoError> {
        if !self.initiator || self.state != SessionState::Pending {
            return Err(CryptoError::InvalidState);
        }
        if accept.link_id != self.link_id {
            return Err(CryptoError::InvalidState);
        }
        let sk = self.local_sk.take().ok_or(CryptoError::InvalidState)?;
        let peer_pk = PublicKey::from(accept.public_key);
        let shared = sk.diffie_hellman(&peer_pk);
        let expected_proof = hash128(&[shared.as_bytes()]);
        if expected_proof != accept.proof {
            return Err(CryptoError::ProofMismatch);
        }
        let (role1, role2) = derive_role_keys(shared.as_bytes(), &self.link_id);
        // Initiator's tx uses role 0x01, rx uses role 0x02.
        self.keys = Some(DirectionalKeys { tx: role1, rx: role2 });
        self.state = SessionState::Active;
        self.last_activity_secs = now_secs;
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_stale(&self, now_secs: u32) -> bool {
        now_secs.saturating_sub(self.last_activity_secs) >= LINK_TIMEOUT_SECS
    }

    pub fn needs_keepalive(&self, now_secs: u32) -> bool {
        self.state == SessionState::Active
            && now_secs.saturating_sub(self.last_activity_secs) >= LINK_KEEPALIVE_SECS
    }

    pub fn touch(&mut self, now_secs: u32) {
        self.last_activity_secs = now_secs;
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
        self.keys = None;
        self.ratchet = None;
    }

    /// Encrypts `plaintext` under the current tx key, returning the
    /// frame header (with the current `tx_seq`) and the `ct || tag` body.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<(LinkDataHeader, Vec<u8>), CryptoError> {
        if self.state != SessionState::Active {
            return Err(CryptoError::InvalidState);
        }
        let keys = self.keys.as_ref().ok_or(CryptoError::InvalidState)?;
        let seq = self.tx_seq;
        let nonce = build_nonce(seq);
        let header = LinkDataHeader { link_id: self.link_id, seq, length: plaintext.len() as u16, flags: 0 };
        let aad = header.encode();
        let cipher = XChaCha20Poly1305::new((&keys.tx).into());
        let body = cipher
            .encrypt((&nonce).into(), Payload { msg: plaintext, aad: &aad })
            .map_err(|_| CryptoError::AuthFailure)?;
        self.tx_seq = self.tx_seq.wrapping_add(1);
        Ok((header, body))
    }

    /// Decrypts a received frame, enforcing strict sequence-number
    /// replay protection: `seq` must be greater than every previously
    /// accepted sequence number.
    pub fn decrypt(&mut self, header: &LinkDataHeader, body: &[u8], now_secs: u32) -> Result<Vec<u8>, CryptoError> {
        if self.state != SessionState::Active {
            return Err(CryptoError::InvalidState);
        }
        if header.link_id != self.link_id {
            return Err(CryptoError::InvalidState);
        }
        if let Some(last_seq) = self.rx_seq {
            if header.seq <= last_seq {
                return Err(CryptoError::Replay { seq: header.seq, last_seq });
            }
        }
        let keys = self.keys.as_ref().ok_or(CryptoError::InvalidState)?;
        let nonce = build_nonce(header.seq);
        let aad = header.encode();
        let cipher = XChaCha20Poly1305::new((&keys.rx).into());
        let plaintext = cipher
            .decrypt((&nonce).into(), Payload { msg: body, aad: &aad })
            .map_err(|_| CryptoError::AuthFailure)?;
        self.rx_seq = Some(header.seq);
        self.last_activity_secs = now_secs;
        Ok(plaintext)
    }

    /// Enables the Double Ratchet on this (already-active) link.
    /// `self_handshake_sk`/`pk` are only consumed on the responder side,
    /// which reuses its handshake keypair as the initial ratchet keypair.
    pub fn enable_ratchet(
        &mut self,
        shared_secret_for_ratchet: &[u8; 32],
        peer_handshake_pk: PublicKey,
        own_handshake_sk: Option<StaticSecret>,
        own_handshake_pk: Option<PublicKey>,
    ) -> Result<(), CryptoError> {
        if self.state != SessionState::Active {
            return Err(CryptoError::InvalidState);
        }
        self.ratchet = Some(if self.initiator {
            RatchetState::new_initiator(shared_secret_for_ratchet, &self.link_id, peer_handshake_pk)
        } else {
            let sk = own_handshake_sk.ok_or(CryptoError::InvalidState)?;
            let pk = own_handshake_pk.ok_or(CryptoError::InvalidState)?;
            RatchetState::new_responder(shared_secret_for_ratchet, &self.link_id, sk, pk)
        });
        Ok(())
    }

    pub fn ratchet_flag() -> u8 {
        LINK_FLAG_RATCHET
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_derives_matching_directional_keys() {
        let (mut alice, request) = Session::initiate(1, 2, 0);
        let (bob, accept) = Session::respond(2, 1, &request, 0);
        alice.complete(&accept, 0).unwrap();

        assert_eq!(alice.state(), SessionState::Active);
        assert_eq!(bob.state(), SessionState::Active);
        assert_eq!(alice.keys.as_ref().unwrap().tx, bob.keys.as_ref().unwrap().rx);
        assert_eq!(bob.keys.as_ref().unwrap().tx, alice.keys.as_ref().unwrap().rx);
    }

    #[test]
    fn transport_round_trip() {
        let (mut alice, request) = Session::initiate(1, 2, 0);
        let (mut bob, accept) = Session::respond(2, 1, &request, 0);
        alice.complete(&accept, 0).unwrap();

        let (header, body) = alice.encrypt(b"ping").unwrap();
        let plaintext = bob.decrypt(&header, &body, 1).unwrap();
        assert_eq!(plaintext, b"ping");
    }

    #[test]
    fn replayed_sequence_number_is_rejected() {
        let (mut alice, request) = Session::initiate(1, 2, 0);
        let (mut bob, accept) = Session::respond(2, 1, &request, 0);
        alice.complete(&accept, 0).unwrap();

        let (header, body) = alice.encrypt(b"first").unwrap();
        bob.decrypt(&header, &body, 1).unwrap();
        assert!(matches!(bob.decrypt(&header, &body, 2), Err(CryptoError::Replay { .. })));
    }

    #[test]
    fn mismatched_proof_is_rejected() {
        let (mut alice, request) = Session::initiate(1, 2, 0);
        let (_bob, mut accept) = Session::respond(2, 1, &request, 0);
        accept.proof[0] ^= 0xFF;
        assert!(matches!(alice.complete(&accept, 0), Err(CryptoError::ProofMismatch)));
    }
}
