//! Configuration for branchkv servers
//!
//! Loaded at startup from a JSON file in the working directory. All
//! servers in a cluster share the same membership list; only `self`
//! differs between instances.

use serde::{Deserialize, Serialize};

/// Cluster configuration for one server instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Full membership list
    pub servers: Vec<String>,

    /// Peers eligible to receive a range split
    #[serde(rename = "availableServers", default)]
    pub available_servers: Vec<String>,

    /// This server's address, must appear in `servers`
    #[serde(rename = "self")]
    pub self_addr: String,

    /// The server that initially owns the full hash range
    pub initial: String,

    /// Maximum local valid-node count before a split is triggered
    pub threshold: usize,
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| crate::Error::InvalidConfig(format!("failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.servers.is_empty() {
            return Err(crate::Error::InvalidConfig("servers is required".into()));
        }

        if !self.servers.contains(&self.self_addr) {
            return Err(crate::Error::InvalidConfig(format!(
                "self address {} does not appear in servers",
                self.self_addr
            )));
        }

        if !self.servers.contains(&self.initial) {
            return Err(crate::Error::InvalidConfig(format!(
                "initial server {} does not appear in servers",
                self.initial
            )));
        }

        if self.threshold == 0 {
            return Err(crate::Error::InvalidConfig(
                "threshold must be positive".into(),
            ));
        }

        Ok(())
    }
}
