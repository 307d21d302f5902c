// lm-sensors and thermal zone parsing

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::models::{FanReading, TemperatureReading, Temperatures};

static TEMP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([+-]?[0-9]+(?:\.[0-9]+)?)\s*°?C").expect("temperature regex"));

/// Labels that carry the CPU package temperature, most specific first.
const CPU_LABELS: [&str; 5] = ["Package id 0", "Tctl", "Tdie", "CPU Temp", "CPU"];
const BOARD_LABELS: [&str; 4] = ["MB Temp", "Motherboard", "SYSTIN", "temp1"];
/// Tachometer values above this are sensor noise.
const MAX_VALID_RPM: f64 = 10_000.0;

static RPM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]+(?:\.[0-9]+)?)\s*RPM").expect("rpm regex"));

/// Plain `sensors` output: chip name to (label to value). Limits in parentheses are dropped.
pub fn parse_sensors_text(output: &str) -> BTreeMap<String, BTreeMap<String, String>> {
    let mut chips: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    let mut current: Option<String> = None;
    for line in output.lines() {
        if line.trim().is_empty() {
            current = None;
            continue;
        }
        match line.split_once(':') {
            None => {
                let chip = line.trim().to_string();
                chips.entry(chip.clone()).or_default();
                current = Some(chip);
            }
            Some((label, value)) => {
                let Some(chip) = &current else {
                    continue;
                };
                let value = value.split('(').next().unwrap_or("").trim();
                if let Some(readings) = chips.get_mut(chip) {
                    readings.insert(label.trim().to_string(), value.to_string());
                }
            }
        }
    }
    chips
}

/// "+45.0°C" → 45.0.
pub fn parse_temperature(value: &str) -> Option<f64> {
    TEMP_RE.captures(value)?[1].parse().ok()
}

/// Temperature readings from plain `sensors` output.
pub fn readings_from_text(output: &str) -> Vec<TemperatureReading> {
    let mut out = Vec::new();
    for (chip, readings) in parse_sensors_text(output) {
        for (label, value) in readings {
            if let Some(celsius) = parse_temperature(&value) {
                out.push(TemperatureReading {
                    chip: chip.clone(),
                    label,
                    celsius,
                });
            }
        }
    }
    out
}

/// Temperature readings from `sensors -j`: every `tempN_input` field.
pub fn readings_from_json(output: &str) -> Vec<TemperatureReading> {
    let Ok(Value::Object(chips)) = serde_json::from_str::<Value>(output) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for (chip, features) in chips {
        let Value::Object(features) = features else {
            continue;
        };
        for (label, fields) in features {
            let Value::Object(fields) = fields else {
                continue;
            };
            let input = fields
                .iter()
                .find(|(k, _)| k.starts_with("temp") && k.ends_with("_input"))
                .and_then(|(_, v)| v.as_f64());
            if let Some(celsius) = input {
                out.push(TemperatureReading {
                    chip: chip.clone(),
                    label,
                    celsius,
                });
            }
        }
    }
    out
}

fn fan_reading(chip: &str, label: &str, rpm: f64) -> Option<FanReading> {
    if !label.to_lowercase().contains("fan") || !(0.0..=MAX_VALID_RPM).contains(&rpm) {
        return None;
    }
    Some(FanReading {
        chip: chip.to_string(),
        label: label.to_string(),
        rpm: rpm.round() as u32,
    })
}

/// Fan speeds from plain `sensors` output ("fan1: 1200 RPM").
pub fn fans_from_text(output: &str) -> Vec<FanReading> {
    let mut out = Vec::new();
    for (chip, readings) in parse_sensors_text(output) {
        for (label, value) in readings {
            let rpm = RPM_RE
                .captures(&value)
                .and_then(|c| c[1].parse::<f64>().ok());
            if let Some(fan) = rpm.and_then(|rpm| fan_reading(&chip, &label, rpm)) {
                out.push(fan);
            }
        }
    }
    out
}

/// Fan speeds from `sensors -j`: `fanN_input` fields of fan features.
pub fn fans_from_json(output: &str) -> Vec<FanReading> {
    let Ok(Value::Object(chips)) = serde_json::from_str::<Value>(output) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for (chip, features) in chips {
        let Value::Object(features) = features else {
            continue;
        };
        for (label, fields) in features {
            let Value::Object(fields) = fields else {
                continue;
            };
            let input = fields
                .iter()
                .find(|(k, _)| k.starts_with("fan") && k.ends_with("_input"))
                .and_then(|(_, v)| v.as_f64());
            if let Some(fan) = input.and_then(|rpm| fan_reading(&chip, &label, rpm)) {
                out.push(fan);
            }
        }
    }
    out
}

/// `paste <(cat .../type) <(cat .../temp)` lines: zone type and millidegrees.
pub fn parse_thermal_zones(output: &str) -> Vec<TemperatureReading> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let zone = parts.next()?;
            let milli: f64 = parts.next()?.parse().ok()?;
            Some(TemperatureReading {
                chip: "thermal_zone".into(),
                label: zone.to_string(),
                celsius: milli / 1000.0,
            })
        })
        .collect()
}

fn find_label(readings: &[TemperatureReading], labels: &[&str]) -> Option<f64> {
    labels.iter().find_map(|wanted| {
        readings
            .iter()
            .find(|r| r.label.eq_ignore_ascii_case(wanted))
            .map(|r| r.celsius)
    })
}

/// CPU and motherboard temperatures picked from all readings.
/// CPU falls back to the hottest core, then to an x86_pkg_temp thermal zone.
pub fn summarize(readings: Vec<TemperatureReading>) -> Temperatures {
    let cpu = find_label(&readings, &CPU_LABELS)
        .or_else(|| {
            readings
                .iter()
                .filter(|r| r.label.starts_with("Core "))
                .map(|r| r.celsius)
                .reduce(f64::max)
        })
        .or_else(|| {
            readings
                .iter()
                .find(|r| r.chip == "thermal_zone" && r.label.contains("pkg"))
                .map(|r| r.celsius)
        });
    let motherboard = find_label(&readings, &BOARD_LABELS);
    Temperatures {
        cpu,
        motherboard,
        readings,
        fans: Vec::new(),
    }
}
