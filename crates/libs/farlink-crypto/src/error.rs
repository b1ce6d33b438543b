use thiserror::Error;

/// Crypto-layer errors. Never carries ciphertext/key material — only
/// enough context for the caller to log and drop, per the `AuthFailure`
/// "don't leak timing or data" rule.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("AEAD authentication failed")]
    AuthFailure,

    #[error("handshake proof mismatch")]
    ProofMismatch,

    #[error("replay detected: seq {seq} <= last accepted {last_seq}")]
    Replay { seq: u32, last_seq: u32 },

    #[error("ratchet skip window exceeded: requested {requested}, max {max}")]
    SkipWindowExceeded { requested: u32, max: u32 },

    #[error("session is not in a state that allows this operation")]
    InvalidState,

    #[error("wire decode error: {0}")]
    Wire(#[from] farlink_wire::WireError),

    #[error("invalid key material")]
    InvalidKey,
}
