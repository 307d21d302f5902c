// CPU, memory, uptime and identity parsing

use crate::models::MemoryStats;

use super::{percent, round2};

/// First number in the output, e.g. from `top -bn1 | grep 'Cpu(s)' | awk '{print $2 + $4}'`.
pub fn parse_cpu_usage(output: &str) -> Option<f64> {
    let token = output.split_whitespace().next()?;
    let v: f64 = token.trim_end_matches('%').replace(',', ".").parse().ok()?;
    (0.0..=100.0).contains(&v).then(|| round2(v))
}

/// `/proc/meminfo` (kB values) to byte totals.
pub fn parse_meminfo(output: &str) -> Option<MemoryStats> {
    let mut total = None;
    let mut free = 0u64;
    let mut available = None;
    let mut buffers = 0u64;
    let mut cached = 0u64;
    for line in output.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let Some(kb) = rest
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<u64>().ok())
        else {
            continue;
        };
        let bytes = kb.saturating_mul(1024);
        match key.trim() {
            "MemTotal" => total = Some(bytes),
            "MemFree" => free = bytes,
            "MemAvailable" => available = Some(bytes),
            "Buffers" => buffers = bytes,
            "Cached" => cached = bytes,
            _ => {}
        }
    }
    let total = total?;
    let available = available.unwrap_or(free + buffers + cached).min(total);
    let used = total - available;
    Some(MemoryStats {
        total,
        used,
        free,
        available,
        cached,
        usage_percent: percent(used, total),
    })
}

/// Seconds from `/proc/uptime`.
pub fn parse_uptime(output: &str) -> Option<u64> {
    let secs: f64 = output.split_whitespace().next()?.parse().ok()?;
    (secs >= 0.0).then_some(secs as u64)
}

/// `/etc/unraid-version`: `version="6.12.4"`.
pub fn parse_unraid_version(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|l| l.trim().strip_prefix("version="))
        .map(|v| v.trim().trim_matches('"').to_string())
        .filter(|v| !v.is_empty())
}

/// First "model name" line of `/proc/cpuinfo`.
pub fn parse_cpu_model(output: &str) -> Option<String> {
    output
        .lines()
        .filter(|l| l.starts_with("model name"))
        .find_map(|l| l.split_once(':').map(|(_, v)| v.trim().to_string()))
        .filter(|v| !v.is_empty())
}

/// Hostname reduced to a safe identifier: lowercase, `[a-z0-9_-]` only,
/// no repeated or edge underscores, at most 32 characters, first letter capitalized.
pub fn sanitize_hostname(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    for c in lowered.chars() {
        let c = if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            c
        } else {
            '_'
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    let truncated: String = out.chars().take(32).collect();
    let trimmed = truncated.trim_matches('_');
    let mut chars = trimmed.chars();
    let first = chars.next()?;
    Some(first.to_uppercase().chain(chars).collect())
}

/// "2 hours, 5 minutes, 3 seconds"; zero parts are dropped, seconds stay when alone.
pub fn format_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{} hours", hours));
    }
    if minutes > 0 {
        parts.push(format!("{} minutes", minutes));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(format!("{} seconds", seconds));
    }
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMINFO: &str = "MemTotal:       16384000 kB\n\
MemFree:         2048000 kB\n\
MemAvailable:    8192000 kB\n\
Buffers:          512000 kB\n\
Cached:          4096000 kB\n";

    #[test]
    fn meminfo_uses_available_for_used() {
        let m = parse_meminfo(MEMINFO).unwrap();
        assert_eq!(m.total, 16_384_000 * 1024);
        assert_eq!(m.available, 8_192_000 * 1024);
        assert_eq!(m.used, 8_192_000 * 1024);
        assert_eq!(m.usage_percent, 50.0);
        assert_eq!(m.cached, 4_096_000 * 1024);
    }

    #[test]
    fn meminfo_without_total_is_none() {
        assert!(parse_meminfo("MemFree: 10 kB\n").is_none());
    }

    #[test]
    fn cpu_usage_from_top_sum() {
        assert_eq!(parse_cpu_usage("12.345\n"), Some(12.35));
        assert_eq!(parse_cpu_usage(""), None);
        assert_eq!(parse_cpu_usage("abc"), None);
    }

    #[test]
    fn uptime_and_version() {
        assert_eq!(parse_uptime("35621.43 140012.77\n"), Some(35621));
        assert_eq!(
            parse_unraid_version("version=\"6.12.4\"\n").as_deref(),
            Some("6.12.4")
        );
        assert_eq!(
            parse_cpu_model("processor\t: 0\nmodel name\t: Intel(R) Core(TM) i5-8500\n").as_deref(),
            Some("Intel(R) Core(TM) i5-8500")
        );
    }

    #[test]
    fn hostname_is_sanitized() {
        assert_eq!(sanitize_hostname("Tower.local").as_deref(), Some("Tower_local"));
        assert_eq!(sanitize_hostname("  my  nas!! ").as_deref(), Some("My_nas"));
        assert_eq!(sanitize_hostname("___").as_deref(), None);
        let long = "a".repeat(40);
        assert_eq!(sanitize_hostname(&long).map(|h| h.len()), Some(32));
    }

    #[test]
    fn durations_drop_zero_parts() {
        assert_eq!(format_duration(3723), "1 hours, 2 minutes, 3 seconds");
        assert_eq!(format_duration(3600), "1 hours");
        assert_eq!(format_duration(0), "0 seconds");
        assert_eq!(format_duration(61), "1 minutes, 1 seconds");
    }
}
