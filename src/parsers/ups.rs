// apcupsd (apcaccess) parsing and validation

use std::collections::HashMap;

use crate::models::UpsInfo;

/// Accepted range per apcaccess metric; values outside are dropped.
fn metric_range(metric: &str) -> Option<(f64, f64)> {
    Some(match metric {
        "NOMPOWER" => (0.0, 10_000.0),
        "LOADPCT" => (0.0, 100.0),
        "CUMONKWHOURS" => (0.0, 1_000_000.0),
        "LOADAPNT" => (0.0, 10_000.0),
        "LINEV" => (0.0, 500.0),
        "POWERFACTOR" => (0.0, 1.0),
        "BCHARGE" => (0.0, 100.0),
        "TIMELEFT" => (0.0, 1440.0),
        "BATTV" => (0.0, 60.0),
        _ => return None,
    })
}

/// `apcaccess -u` lines (`KEY      : value`).
pub fn parse_apcaccess(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let (k, v) = line.split_once(':')?;
            let k = k.trim();
            (!k.is_empty()).then(|| (k.to_string(), v.trim().to_string()))
        })
        .collect()
}

/// Numeric value of a known metric, or None when unknown, unparseable or out of range.
pub fn validate_metric(metric: &str, value: &str) -> Option<f64> {
    let (min, max) = metric_range(metric)?;
    let cleaned: String = value
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    let v: f64 = cleaned.parse().ok()?;
    if v < min || v > max {
        tracing::warn!(metric, value = v, min, max, "UPS metric outside valid range");
        return None;
    }
    Some(v)
}

pub fn build_ups_info(values: &HashMap<String, String>) -> UpsInfo {
    let metric = |key: &str| values.get(key).and_then(|v| validate_metric(key, v));
    let nominal_power_watts = metric("NOMPOWER").map(|v| v as u32);
    let load_percent = metric("LOADPCT");
    UpsInfo {
        status: values.get("STATUS").cloned().unwrap_or_else(|| "UNKNOWN".into()),
        model: values
            .get("MODEL")
            .or_else(|| values.get("UPSNAME"))
            .cloned()
            .unwrap_or_default(),
        battery_charge_percent: metric("BCHARGE"),
        load_percent,
        time_left_mins: metric("TIMELEFT").map(|v| v as u32),
        nominal_power_watts,
        current_power_watts: nominal_power_watts
            .zip(load_percent)
            .map(|(p, l)| super::round2(p as f64 * l / 100.0)),
        line_voltage: metric("LINEV"),
        battery_voltage: metric("BATTV"),
        energy_kwh: metric("CUMONKWHOURS"),
        load_apparent_va: metric("LOADAPNT"),
        power_factor: metric("POWERFACTOR"),
    }
}
