//! Node configuration, loaded from TOML and layered under CLI flags in
//! `farlinkd`. Every field has the default from spec's configuration
//! table so a bare `MeshConfig::default()` is a valid single-node setup.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MeshConfig {
    /// 32-bit node identity. Zero means "derive from a platform serial
    /// at startup"; `farlinkd` is responsible for that derivation since
    /// this crate has no notion of hardware.
    pub node_address: u32,
    pub beacon_interval_ms: u32,
    pub route_timeout_ms: u32,
    pub ack_timeout_ms: u32,
    pub max_retries: u8,
    pub max_ttl: u8,
    pub max_payload: usize,
    pub tdma_enabled: bool,
    pub forward_secrecy_enabled: bool,
    pub epidemic_enabled: bool,
    /// Falls back to perimeter-mode (strongest-RSSI neighbor) geographic
    /// forwarding when greedy forwarding makes no progress.
    pub gpsr_enabled: bool,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            node_address: 0,
            beacon_interval_ms: 30_000,
            route_timeout_ms: 300_000,
            ack_timeout_ms: 5_000,
            max_retries: 3,
            max_ttl: 15,
            max_payload: 255,
            tdma_enabled: true,
            forward_secrecy_enabled: true,
            epidemic_enabled: false,
            gpsr_enabled: false,
        }
    }
}

impl MeshConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_table() {
        let cfg = MeshConfig::default();
        assert_eq!(cfg.beacon_interval_ms, 30_000);
        assert_eq!(cfg.max_ttl, 15);
        assert_eq!(cfg.max_payload, 255);
        assert!(cfg.tdma_enabled);
        assert!(cfg.forward_secrecy_enabled);
        assert!(!cfg.epidemic_enabled);
    }

    #[test]
    fn roundtrips_through_toml() {
        let cfg = MeshConfig { node_address: 7, ..Default::default() };
        let toml = cfg.to_toml_string().unwrap();
        let parsed = MeshConfig::from_toml_str(&toml).unwrap();
        assert_eq!(cfg, parsed);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg = MeshConfig::from_toml_str("node_address = 99\n").unwrap();
        assert_eq!(cfg.node_address, 99);
        assert_eq!(cfg.max_retries, 3);
    }
}
