//! The FarLink mesh stack: MAC, neighbor table, AODV-like routing,
//! store-and-forward, DTN bundles, geographic routing, SOS and naming,
//! composed behind one [`stack::NodeStack`] per radio.
//!
//! Everything in this crate is `no_std`-adjacent in spirit (no async
//! runtime, no sockets) so it can run unmodified on an embedded target;
//! `farlinkd` supplies the [`traits::RadioDevice`]/[`traits::BlobStore`]/
//! [`traits::GpsSource`] adapters and the surrounding tokio runtime.

pub mod config;
pub mod dtn;
pub mod error;
pub mod events;
pub mod geo;
pub mod mac;
pub mod naming;
pub mod neighbor;
pub mod routing;
pub mod sos;
pub mod stack;
pub mod store_forward;
pub mod time_sync;
pub mod traits;

pub use config::MeshConfig;
pub use error::{MeshError, MeshResult};
pub use events::MeshEvent;
pub use stack::NodeStack;
