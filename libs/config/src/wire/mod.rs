//! serde mirror of the JSON configuration document
//!
//! This is the shape read off disk; [`crate::v4::Config`] is the
//! optimized runtime form built from it via `TryFrom`.
use std::{net::IpAddr, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod client_classes;
pub mod v4;

/// top-level document
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
pub struct Config {
    /// `interfaces-config.interfaces`: names or `*`
    #[serde(rename = "interfaces-config", default)]
    pub interfaces_config: InterfacesConfig,
    /// opaque; forwarded to the master, the slave keeps no leases
    #[serde(rename = "lease-database", default)]
    pub lease_database: Value,
    /// advisory to the master
    #[serde(rename = "expired-leases-processing", default)]
    pub expired_leases_processing: Value,
    /// named class predicates
    #[serde(rename = "client-classes", default)]
    pub client_classes: Vec<client_classes::ClientClass>,
    /// the subnet table
    #[serde(rename = "subnet4", default)]
    pub subnet4: Vec<v4::Subnet>,
    /// in-process hook libraries
    #[serde(rename = "hooks-libraries", default)]
    pub hooks_libraries: Vec<HooksLibrary>,
    /// master lease service endpoint
    #[serde(rename = "rpc-server")]
    pub rpc_server: RpcServer,
    /// conflict-detection probe settings
    #[serde(default)]
    pub ping: Ping,
}

/// `interfaces-config`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
pub struct InterfacesConfig {
    /// interface names; `*` means every up v4 interface
    #[serde(default)]
    pub interfaces: Vec<String>,
}

/// one `hooks-libraries` entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HooksLibrary {
    /// library name to load
    pub library: String,
    /// passed to the library's `load`
    #[serde(default)]
    pub parameters: Value,
}

/// `rpc-server`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RpcServer {
    pub host: IpAddr,
    pub port: u16,
    /// persistent connection count
    #[serde(default = "default_connections")]
    pub connections: usize,
    /// conflict / transient retry cap
    #[serde(default = "default_retries", rename = "max-retries")]
    pub max_retries: u32,
}

impl Default for RpcServer {
    fn default() -> Self {
        Self {
            host: IpAddr::from([127, 0, 0, 1]),
            port: 6901,
            connections: default_connections(),
            max_retries: default_retries(),
        }
    }
}

/// `ping`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Ping {
    #[serde(default = "default_ping_enable")]
    pub enable: bool,
    #[serde(rename = "timeout-ms", default = "default_ping_timeout")]
    pub timeout_ms: u64,
    #[serde(rename = "queue-size", default = "default_ping_queue")]
    pub queue_size: usize,
}

impl Default for Ping {
    fn default() -> Self {
        Self {
            enable: default_ping_enable(),
            timeout_ms: default_ping_timeout(),
            queue_size: default_ping_queue(),
        }
    }
}

impl Ping {
    /// the probe timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_connections() -> usize {
    4
}

fn default_retries() -> u32 {
    3
}

fn default_ping_enable() -> bool {
    true
}

fn default_ping_timeout() -> u64 {
    1000
}

fn default_ping_queue() -> usize {
    4096
}

pub(crate) fn default_valid_lifetime() -> u32 {
    86_400
}

#[cfg(test)]
mod tests {
    pub static SAMPLE_JSON: &str = include_str!("../../sample/config.json");

    // test we can decode/encode the sample
    #[test]
    fn test_sample() {
        let cfg: crate::wire::Config = serde_json::from_str(SAMPLE_JSON).unwrap();
        let s = serde_json::to_string(&cfg).unwrap();
        let back: crate::wire::Config = serde_json::from_str(&s).unwrap();
        assert_eq!(cfg, back);
    }
}
