// df output parsing

use crate::models::UsageStats;

use super::percent;

/// `df -k PATH | awk 'NR==2 {print $2,$3,$4}'`: "total used free" in KiB.
pub fn parse_df_kib_line(output: &str) -> Option<UsageStats> {
    let nums: Vec<u64> = output
        .split_whitespace()
        .take(3)
        .map(|v| v.trim_end_matches('%').parse::<u64>())
        .collect::<Result<_, _>>()
        .ok()?;
    if nums.len() < 3 {
        return None;
    }
    let [total, used, free] = [nums[0], nums[1], nums[2]].map(|kb| kb.saturating_mul(1024));
    Some(UsageStats {
        total,
        used,
        free,
        usage_percent: percent(used, total),
    })
}

/// `df -P -B1` rows keyed by mount point: (mount, filesystem, usage in bytes).
pub fn parse_df_bytes(output: &str) -> Vec<(String, String, UsageStats)> {
    output
        .lines()
        .filter(|l| !l.starts_with("Filesystem"))
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 6 {
                return None;
            }
            let total = parts[1].parse::<u64>().ok()?;
            let used = parts[2].parse::<u64>().ok()?;
            let free = parts[3].parse::<u64>().ok()?;
            Some((
                parts[5..].join(" "),
                parts[0].to_string(),
                UsageStats {
                    total,
                    used,
                    free,
                    usage_percent: percent(used, total),
                },
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kib_line_is_scaled_to_bytes() {
        let u = parse_df_kib_line("1000 250 750\n").unwrap();
        assert_eq!(u.total, 1_024_000);
        assert_eq!(u.used, 256_000);
        assert_eq!(u.free, 768_000);
        assert_eq!(u.usage_percent, 25.0);
        assert!(parse_df_kib_line("").is_none());
        assert!(parse_df_kib_line("1 x 3").is_none());

        let huge = parse_df_kib_line("18446744073709551615 1 1\n").unwrap();
        assert_eq!(huge.total, u64::MAX);
        assert_eq!(huge.used, 1024);
    }

    #[test]
    fn byte_rows_keep_mount_and_device() {
        let out = "Filesystem 1-blocks Used Available Capacity Mounted on\n\
/dev/md1p1 4000000000 1000000000 3000000000 25% /mnt/disk1\n";
        let rows = parse_df_bytes(out);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "/mnt/disk1");
        assert_eq!(rows[0].1, "/dev/md1p1");
        assert_eq!(rows[0].2.usage_percent, 25.0);
    }
}
