//! Application-level configuration: the protocol [`MeshConfig`] plus the
//! UDP transport and storage settings that have no protocol meaning and
//! so don't belong in `farlink-mesh`.

use std::net::SocketAddr;
use std::path::PathBuf;

use farlink_mesh::MeshConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    #[serde(flatten)]
    pub mesh: MeshConfig,
    pub listen_addr: SocketAddr,
    pub peers: Vec<SocketAddr>,
    pub storage_dir: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            mesh: MeshConfig::default(),
            listen_addr: "127.0.0.1:7770".parse().unwrap(),
            peers: Vec::new(),
            storage_dir: PathBuf::from("./farlinkd-data"),
        }
    }
}

impl DaemonConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg = DaemonConfig::from_toml_str("node_address = 7\nlisten_addr = \"0.0.0.0:9000\"\n").unwrap();
        assert_eq!(cfg.mesh.node_address, 7);
        assert_eq!(cfg.listen_addr.port(), 9000);
        assert_eq!(cfg.mesh.max_ttl, 15);
        assert!(cfg.peers.is_empty());
    }
}
