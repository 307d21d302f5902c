// Network interface models

use serde::{Deserialize, Serialize};
use wincode::{SchemaRead, SchemaWrite};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    pub name: String,
    pub connected: bool,
    pub mac_address: String,
    pub ipv4: Vec<String>,
    pub ipv6: Vec<String>,
    /// Link speed as printed by ethtool (e.g. "1000Mb/s").
    pub speed: Option<String>,
    pub bond_mode: Option<String>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    /// Smoothed receive rate in bits per second.
    #[serde(default)]
    pub rx_rate_bps: f64,
    /// Smoothed transmit rate in bits per second.
    #[serde(default)]
    pub tx_rate_bps: f64,
}

/// One block of `ip addr` output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceAddress {
    pub name: String,
    pub state: String,
    pub mac_address: String,
    pub ipv4: Vec<String>,
    pub ipv6: Vec<String>,
}
