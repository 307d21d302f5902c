// Disk inventory parsing: batched section output, lsblk, mounts, ZFS, spin state and SMART

use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::models::{DiskState, ZfsPool};

/// Spin-down delay used when disk.cfg has no setting.
pub const DEFAULT_SPINDOWN_DELAY_SECS: u64 = 1800;
/// Marker printed by the batched command when `zpool` is missing.
pub const ZFS_NOT_INSTALLED: &str = "zfs_not_installed";

const NVME_MIN_TEMP: f64 = -40.0;
const NVME_MAX_TEMP: f64 = 125.0;

static SECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^===([A-Z_]+)===$").expect("section regex"));
static SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]+(?:\.[0-9]+)?)\s*([KMGTPE]?)i?B?$").expect("size regex"));
static TEMP_UNIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(-?[0-9]+(?:\.[0-9]+)?)\s*°?\s*([CFK]?)\s*$").expect("temp regex"));

/// Splits output of commands that `echo '===NAME==='` between parts.
pub fn split_sections(output: &str) -> HashMap<String, String> {
    let mut sections: HashMap<String, String> = HashMap::new();
    let mut current: Option<String> = None;
    for line in output.lines() {
        if let Some(caps) = SECTION_RE.captures(line.trim()) {
            let name = caps[1].to_string();
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }
        if let Some(name) = &current
            && let Some(body) = sections.get_mut(name)
        {
            body.push_str(line);
            body.push('\n');
        }
    }
    sections
}

fn device_name(raw: &str) -> &str {
    raw.trim_start_matches(|c: char| !c.is_ascii_alphanumeric())
}

/// `lsblk -o NAME,SERIAL` without header: device name to serial.
pub fn parse_serials(section: &str) -> HashMap<String, String> {
    section
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = device_name(parts.next()?);
            let serial = parts.next()?;
            (!name.is_empty()).then(|| (name.to_string(), serial.to_string()))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockDevice {
    pub name: String,
    pub transport: String,
    pub kind: String,
    pub size: String,
    pub model: String,
    pub vendor: String,
}

/// `lsblk -o NAME,TRAN,TYPE,SIZE,MODEL,VENDOR` without header. Missing columns become "unknown".
pub fn parse_block_devices(section: &str) -> HashMap<String, BlockDevice> {
    let field = |parts: &[&str], i: usize| -> String {
        match parts.get(i) {
            Some(v) if *v != "-" => v.to_string(),
            _ => "unknown".to_string(),
        }
    };
    section
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 {
                return None;
            }
            let name = device_name(parts[0]).to_string();
            Some((
                name.clone(),
                BlockDevice {
                    name,
                    transport: field(&parts, 1),
                    kind: field(&parts, 2),
                    size: field(&parts, 3),
                    model: field(&parts, 4),
                    vendor: field(&parts, 5),
                },
            ))
        })
        .collect()
}

/// `mount | awk '{print $1,$3,$5}'`: mount point to (device, filesystem type).
pub fn parse_mount_info(section: &str) -> HashMap<String, (String, String)> {
    section
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 {
                return None;
            }
            Some((
                parts[1].to_string(),
                (parts[0].to_string(), parts[2].to_string()),
            ))
        })
        .collect()
}

/// Human size from zpool/lsblk ("1.81T", "512M", "4K", "100") to bytes (binary units).
pub fn parse_size(s: &str) -> Option<u64> {
    let caps = SIZE_RE.captures(s.trim())?;
    let n: f64 = caps[1].parse().ok()?;
    let mult: u64 = match &caps[2] {
        "" => 1,
        "K" => 1 << 10,
        "M" => 1 << 20,
        "G" => 1 << 30,
        "T" => 1 << 40,
        "P" => 1 << 50,
        "E" => 1 << 60,
        _ => return None,
    };
    Some((n * mult as f64) as u64)
}

/// `zpool list -H -o name,size,alloc,free,capacity,health` (tab separated).
pub fn parse_zfs_pools(section: &str) -> Vec<ZfsPool> {
    if section.trim() == ZFS_NOT_INSTALLED {
        return Vec::new();
    }
    section
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split('\t').map(str::trim).collect();
            if parts.len() < 6 {
                return None;
            }
            Some(ZfsPool {
                name: parts[0].to_string(),
                size: parse_size(parts[1]).unwrap_or(0),
                allocated: parse_size(parts[2]).unwrap_or(0),
                free: parse_size(parts[3]).unwrap_or(0),
                capacity_percent: parts[4].trim_end_matches('%').parse().unwrap_or(0.0),
                health: parts[5].to_string(),
            })
        })
        .collect()
}

/// Device paths from `zpool status -P`.
pub fn parse_zfs_devices(section: &str) -> Vec<String> {
    if section.trim() == ZFS_NOT_INSTALLED {
        return Vec::new();
    }
    section
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("/dev/"))
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpindownDelays {
    pub default_secs: u64,
    pub per_disk: HashMap<String, u64>,
}

impl SpindownDelays {
    pub fn for_disk(&self, name: &str) -> u64 {
        self.per_disk
            .get(name)
            .copied()
            .unwrap_or(self.default_secs)
    }
}

/// Spin-down delays from `/boot/config/disk.cfg`. Values are minutes; negative or
/// invalid per-disk values fall back to the default.
pub fn parse_spindown_delays(disk_cfg: &str) -> SpindownDelays {
    let kv = super::parse_key_values(disk_cfg);
    let default_secs = kv
        .get("spindownDelay")
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|v| *v > 0)
        .map(|m| (m as u64).saturating_mul(60))
        .unwrap_or(DEFAULT_SPINDOWN_DELAY_SECS);
    let mut per_disk = HashMap::new();
    for (key, value) in &kv {
        let Some(num) = key.strip_prefix("diskSpindownDelay.") else {
            continue;
        };
        if num.is_empty() || !num.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let secs = match value.parse::<i64>() {
            Ok(m) if m >= 0 => (m as u64).saturating_mul(60),
            _ => default_secs,
        };
        per_disk.insert(format!("disk{}", num), secs);
    }
    SpindownDelays {
        default_secs,
        per_disk,
    }
}

/// Mount names under /mnt that are shares or system paths rather than disks.
const NON_DISK_MOUNTS: [&str; 9] = [
    "user", "user0", "rootshare", "addons", "remotes", "system", "flash", "boot", "disks",
];

/// Whether a /mnt entry is an array disk, a cache disk or a custom pool.
pub fn is_valid_disk_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    if let Some(n) = name.strip_prefix("disk")
        && !n.is_empty()
        && n.chars().all(|c| c.is_ascii_digit())
    {
        return true;
    }
    if name.starts_with("cache") {
        return true;
    }
    !NON_DISK_MOUNTS.contains(&name.to_lowercase().as_str())
}

pub fn is_nvme(device: &str) -> bool {
    device.trim_start_matches("/dev/").starts_with("nvme")
}

/// `smartctl -n standby` exit code: 2 = standby, 0 = active, other codes are inconclusive.
pub fn disk_state_from_smartctl(exit_code: u32) -> Option<DiskState> {
    match exit_code {
        0 => Some(DiskState::Active),
        2 => Some(DiskState::Standby),
        _ => None,
    }
}

/// `hdparm -C` output; unknown answers are treated as active.
pub fn disk_state_from_hdparm(output: &str) -> DiskState {
    let lower = output.to_lowercase();
    if lower.contains("standby") || lower.contains("sleeping") {
        DiskState::Standby
    } else {
        DiskState::Active
    }
}

/// Temperature in °C from NVMe readings: plain numbers (values above 100 are Kelvin)
/// or strings with a unit suffix. Out of range values are rejected.
pub fn convert_nvme_temperature(value: &Value) -> Option<f64> {
    let celsius = match value {
        Value::Number(n) => {
            let v = n.as_f64()?;
            if v > 100.0 { v - 273.0 } else { v }
        }
        Value::String(s) => {
            let caps = TEMP_UNIT_RE.captures(s)?;
            let v: f64 = caps[1].parse().ok()?;
            match &caps[2] {
                "F" => (v - 32.0) * 5.0 / 9.0,
                "K" => v - 273.0,
                "C" => v,
                _ if v > 100.0 => v - 273.0,
                _ => v,
            }
        }
        _ => return None,
    };
    (NVME_MIN_TEMP..=NVME_MAX_TEMP)
        .contains(&celsius)
        .then_some(celsius)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmartSummary {
    pub passed: Option<bool>,
    pub temperature: Option<f64>,
    pub power_on_hours: Option<u64>,
    pub model: Option<String>,
    pub serial: Option<String>,
}

/// `smartctl -a -j` output.
pub fn parse_smart_json(output: &str) -> Option<SmartSummary> {
    let v: Value = serde_json::from_str(output).ok()?;
    let nvme = v
        .get("device")
        .and_then(|d| d.get("type"))
        .and_then(Value::as_str)
        .is_some_and(|t| t.eq_ignore_ascii_case("nvme"))
        || v.get("nvme_smart_health_information_log").is_some();

    let temperature = if nvme {
        v.pointer("/nvme_smart_health_information_log/temperature")
            .and_then(convert_nvme_temperature)
            .or_else(|| {
                v.pointer("/temperature/current")
                    .and_then(convert_nvme_temperature)
            })
    } else {
        v.pointer("/temperature/current")
            .and_then(Value::as_f64)
            .or_else(|| {
                v.pointer("/ata_smart_attributes/table")
                    .and_then(Value::as_array)
                    .and_then(|rows| {
                        rows.iter().find(|r| {
                            r.get("name").and_then(Value::as_str) == Some("Temperature_Celsius")
                        })
                    })
                    .and_then(|r| r.pointer("/raw/value"))
                    .and_then(Value::as_f64)
            })
    };

    Some(SmartSummary {
        passed: v.pointer("/smart_status/passed").and_then(Value::as_bool),
        temperature,
        power_on_hours: v.pointer("/power_on_time/hours").and_then(Value::as_u64),
        model: v
            .get("model_name")
            .and_then(Value::as_str)
            .map(str::to_string),
        serial: v
            .get("serial_number")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmartAttribute {
    pub id: u32,
    pub name: String,
    pub value: u32,
    pub worst: u32,
    pub threshold: u32,
    pub raw: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmartReport {
    pub model: Option<String>,
    pub serial: Option<String>,
    pub capacity: Option<String>,
    pub passed: Option<bool>,
    pub temperature: Option<f64>,
    pub power_on_hours: Option<u64>,
    pub attributes: Vec<SmartAttribute>,
}

impl From<SmartReport> for SmartSummary {
    fn from(r: SmartReport) -> Self {
        SmartSummary {
            passed: r.passed,
            temperature: r.temperature,
            power_on_hours: r.power_on_hours,
            model: r.model,
            serial: r.serial,
        }
    }
}

/// Plain-text `smartctl -a` report.
pub fn parse_smart_text(output: &str) -> SmartReport {
    let mut report = SmartReport::default();
    for line in output.lines() {
        let trimmed = line.trim();
        if let Some((key, value)) = trimmed.split_once(':') {
            let value = value.trim();
            match key.trim() {
                "Device Model" | "Model Number" => report.model = Some(value.to_string()),
                "Serial Number" => report.serial = Some(value.to_string()),
                "User Capacity" | "Total NVM Capacity" => {
                    report.capacity = Some(value.to_string())
                }
                k if k.starts_with("SMART overall-health self-assessment test result") => {
                    report.passed = Some(value.eq_ignore_ascii_case("PASSED"))
                }
                "SMART Health Status" => report.passed = Some(value.eq_ignore_ascii_case("OK")),
                "Temperature" if report.temperature.is_none() => {
                    report.temperature = value
                        .split_whitespace()
                        .next()
                        .and_then(|t| t.parse().ok())
                }
                _ => {}
            }
            continue;
        }

        let parts: Vec<&str> = trimmed.split_whitespace().collect();
        if parts.len() < 10 {
            continue;
        }
        let Ok(id) = parts[0].parse::<u32>() else {
            continue;
        };
        let raw = parts[9].to_string();
        match id {
            194 => report.temperature = raw.parse().ok().or(report.temperature),
            9 => report.power_on_hours = raw.parse().ok(),
            _ => {}
        }
        report.attributes.push(SmartAttribute {
            id,
            name: parts[1].to_string(),
            value: parts[3].parse().unwrap_or(0),
            worst: parts[4].parse().unwrap_or(0),
            threshold: parts[5].parse().unwrap_or(0),
            raw,
        });
    }
    report
}
