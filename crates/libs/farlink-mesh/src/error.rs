use thiserror::Error;

/// Mesh-stack error kinds (spec §7's taxonomy, one variant per kind).
/// Most of these are handled internally (drop, retry, degrade) rather
/// than bubbled to the caller — see each subsystem for policy.
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] farlink_wire::WireError),

    #[error("duplicate frame from {source:#010x} id {packet_id}")]
    DuplicateFrame { source: u32, packet_id: u16 },

    #[error("frame expired (ttl/hop-count exhausted)")]
    Expired,

    #[error("no route to {destination:#010x}")]
    NoRoute { destination: u32 },

    #[error("authentication failure: {0}")]
    AuthFailure(#[from] farlink_crypto::CryptoError),

    #[error("{table} is full")]
    CapacityExhausted { table: &'static str },

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("radio error: {0}")]
    RadioError(String),
}

pub type MeshResult<T> = Result<T, MeshError>;
