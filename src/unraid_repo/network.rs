// Network interfaces and apcupsd UPS

use futures_util::{StreamExt, stream};
use tracing::instrument;

use super::{ITEM_CONCURRENCY, UnraidRepo, shell_quote};
use crate::models::{InterfaceAddress, NetworkInterface, UpsInfo};
use crate::parsers::{network, ups};

const LINK_BRIEF_COMMAND: &str =
    "ip -br link show | grep -E '^(eth|bond)' | awk '{print $1, $2}'";
const UPS_DETECT_COMMAND: &str =
    "command -v apcaccess >/dev/null 2>&1 && pgrep apcupsd >/dev/null 2>&1 && echo 'running'";

impl UnraidRepo {
    /// Connected eth/bond interfaces with raw byte counters. Rates are filled in
    /// later by the coordinator.
    #[instrument(skip(self), fields(repo = "unraid", operation = "get_network_interfaces"))]
    pub async fn get_network_interfaces(&self) -> Vec<NetworkInterface> {
        let (brief, addrs) = tokio::join!(self.read(LINK_BRIEF_COMMAND), self.read("ip addr show"));
        let Some(brief) = brief else {
            return Vec::new();
        };
        let addrs = addrs
            .as_deref()
            .map(network::parse_ip_addr)
            .unwrap_or_default();

        let names = network::parse_ip_brief(&brief);
        let interfaces: Vec<Option<NetworkInterface>> = stream::iter(names)
            .map(|name| self.read_interface(name, &addrs))
            .buffered(ITEM_CONCURRENCY)
            .collect()
            .await;
        interfaces.into_iter().flatten().collect()
    }

    async fn read_interface(
        &self,
        name: String,
        addrs: &[InterfaceAddress],
    ) -> Option<NetworkInterface> {
        let quoted = shell_quote(&name);
        let sys = format!("/sys/class/net/{}", quoted);
        let counters_cmd = format!(
            "cat {sys}/statistics/rx_bytes {sys}/statistics/tx_bytes",
            sys = sys
        );
        let speed_cmd = format!("ethtool {} 2>/dev/null", quoted);
        let (counters, speed) = tokio::join!(self.read(&counters_cmd), self.read(&speed_cmd));
        let Some((rx_bytes, tx_bytes)) = counters.as_deref().and_then(network::parse_rx_tx) else {
            tracing::debug!(interface = %name, "No byte counters, skipping");
            return None;
        };
        let bond_mode = if name.starts_with("bond") {
            self.read(&format!("cat {}/bonding/mode", sys)).await
        } else {
            None
        };
        let addr = addrs.iter().find(|a| a.name == name);
        Some(NetworkInterface {
            connected: true,
            mac_address: addr.map(|a| a.mac_address.clone()).unwrap_or_default(),
            ipv4: addr.map(|a| a.ipv4.clone()).unwrap_or_default(),
            ipv6: addr.map(|a| a.ipv6.clone()).unwrap_or_default(),
            speed: speed.as_deref().and_then(network::parse_ethtool_speed),
            bond_mode,
            rx_bytes,
            tx_bytes,
            rx_rate_bps: 0.0,
            tx_rate_bps: 0.0,
            name,
        })
    }

    /// apcaccess installed and apcupsd running.
    #[instrument(skip(self), fields(repo = "unraid", operation = "detect_ups"))]
    pub async fn detect_ups(&self) -> bool {
        self.read(UPS_DETECT_COMMAND).await.as_deref() == Some("running")
    }

    #[instrument(skip(self), fields(repo = "unraid", operation = "get_ups_info"))]
    pub async fn get_ups_info(&self) -> Option<UpsInfo> {
        let out = self.read("apcaccess -u 2>/dev/null").await?;
        let values = ups::parse_apcaccess(&out);
        if values.is_empty() {
            return None;
        }
        Some(ups::build_ups_info(&values))
    }
}
