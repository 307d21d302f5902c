// Pure parsers for the text that Unraid shell commands print.
// Parsers never fail hard: unparseable lines are skipped and missing values become None.

pub mod df;
pub mod disks;
pub mod docker;
pub mod mdcmd;
pub mod network;
pub mod parity;
pub mod sensors;
pub mod system;
pub mod ups;
pub mod vm;

use std::collections::HashMap;

/// `key=value` lines (mdcmd status, disk.cfg, /proc/mdstat). Comments and blank lines
/// are skipped, surrounding quotes are stripped from values.
pub fn parse_key_values(output: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            out.insert(k.trim().to_string(), v.trim().trim_matches('"').to_string());
        }
    }
    out
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// used / total as a percentage with two decimals; 0 when total is 0.
pub(crate) fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        round2(used as f64 / total as f64 * 100.0)
    }
}
