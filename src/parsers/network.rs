// ip / ethtool / sysfs network output parsing

use regex::Regex;
use std::sync::LazyLock;

use crate::models::InterfaceAddress;

static IFACE_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+:\s+([^:@\s]+)(?:@\S+)?:\s+<[^>]*>.*?\bstate\s+(\S+)")
        .expect("interface header regex")
});
static INET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+inet\s+(\S+)").expect("inet regex"));
static INET6_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+inet6\s+(\S+)").expect("inet6 regex"));
static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+link/\S+\s+([0-9a-fA-F:]{17})").expect("link regex"));

/// Physical and bonded interfaces tracked for the dashboard.
pub fn is_monitored_interface(name: &str) -> bool {
    name.starts_with("eth") || name.starts_with("bond")
}

/// `ip -br link show` lines ("name state ..."): interfaces that are up with a carrier.
pub fn parse_ip_brief(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let state = parts.next()?.to_lowercase();
            let up = state.contains("up") && !state.contains("no-carrier");
            (is_monitored_interface(name) && up).then(|| name.to_string())
        })
        .collect()
}

/// Two lines: rx_bytes then tx_bytes from /sys/class/net/IF/statistics.
pub fn parse_rx_tx(output: &str) -> Option<(u64, u64)> {
    let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty());
    let rx = lines.next()?.parse().ok()?;
    let tx = lines.next()?.parse().ok()?;
    Some((rx, tx))
}

/// "Speed: 1000Mb/s" from ethtool; unknown speeds are None.
pub fn parse_ethtool_speed(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let value = line.trim().strip_prefix("Speed:")?.trim();
        (!value.is_empty() && !value.starts_with("Unknown")).then(|| value.to_string())
    })
}

/// Blocks of `ip addr show`: name, operational state, MAC and addresses per interface.
pub fn parse_ip_addr(output: &str) -> Vec<InterfaceAddress> {
    let mut out: Vec<InterfaceAddress> = Vec::new();
    for line in output.lines() {
        if let Some(caps) = IFACE_HEADER_RE.captures(line) {
            out.push(InterfaceAddress {
                name: caps[1].to_string(),
                state: caps[2].to_string(),
                ..Default::default()
            });
            continue;
        }
        let Some(current) = out.last_mut() else {
            continue;
        };
        if let Some(caps) = LINK_RE.captures(line) {
            current.mac_address = caps[1].to_lowercase();
        } else if let Some(caps) = INET_RE.captures(line) {
            current.ipv4.push(caps[1].to_string());
        } else if let Some(caps) = INET6_RE.captures(line) {
            current.ipv6.push(caps[1].to_string());
        }
    }
    out
}
