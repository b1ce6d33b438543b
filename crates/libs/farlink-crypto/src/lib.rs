//! Identity, X25519 session handshake, AEAD transport and Double
//! Ratchet forward secrecy for FarLink mesh links.
//!
//! There is no certificate PKI here: a peer's identity is its opaque
//! 32-bit mesh address plus the ephemeral X25519 key it brings to a
//! given link (see [`identity`] and [`session`]). [`ratchet`] layers
//! Signal-style forward secrecy on top of an already-`Active` session.

pub mod error;
pub mod identity;
pub mod primitives;
pub mod ratchet;
pub mod session;

pub use error::CryptoError;
pub use identity::address_identity_hash;
pub use ratchet::{RatchetState, RATCHET_MAX_SKIP};
pub use session::{Session, SessionState, LINK_KEEPALIVE_SECS, LINK_TIMEOUT_SECS};
