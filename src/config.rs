//! Node configuration
//!
//! Defaults are production values; a TOML file can override any field and
//! CLI flags override the file.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address the RPC listener binds
    pub bind_addr: SocketAddr,
    /// Address advertised in the self contact; derived from the listener
    /// when unset (wildcard binds fall back to loopback)
    pub advertise_ip: Option<IpAddr>,
    /// Budget for one outbound RPC: dial, request, reply
    #[serde(with = "humantime_serde")]
    pub rpc_timeout: Duration,
    /// Budget for the liveness probe of a full bucket's head
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            bind_addr: "0.0.0.0:7890".parse().expect("static default address"),
            advertise_ip: None,
            rpc_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = NodeConfig::default();
        assert_eq!(config.bind_addr.port(), 7890);
        assert!(config.probe_timeout < config.rpc_timeout);
    }

    #[test]
    fn partial_toml_overrides_defaults() {
        let config: NodeConfig =
            toml::from_str("bind_addr = \"127.0.0.1:9000\"\nrpc_timeout = \"2s\"\n").unwrap();
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.rpc_timeout, Duration::from_secs(2));
        assert_eq!(config.probe_timeout, NodeConfig::default().probe_timeout);
    }
}
