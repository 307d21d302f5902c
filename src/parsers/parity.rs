// Parity check history and schedule parsing

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use super::round2;
use crate::models::ParityCheck;

const LOG_DATE_FORMAT: &str = "%Y %b %d %H:%M:%S";
const DISPLAY_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// disk.cfg `parity.mode` value for manual-only checks.
const MANUAL_PARITY_MODE: &str = "4";

fn parse_log_line(line: &str) -> Option<(NaiveDateTime, ParityCheck)> {
    let fields: Vec<&str> = line.trim().split('|').collect();
    if fields.len() < 7 {
        tracing::debug!(line, "Parity history line has too few fields");
        return None;
    }
    let date = NaiveDateTime::parse_from_str(fields[0].trim(), LOG_DATE_FORMAT).ok()?;
    let duration_secs: u64 = fields[1].trim().parse().ok()?;
    let speed_bytes: f64 = fields[2].trim().parse().ok()?;
    let exit_code = fields[3].trim();
    let errors: u64 = fields[4].trim().parse().ok()?;

    let check = ParityCheck {
        date: date.format(DISPLAY_DATE_FORMAT).to_string(),
        duration_secs,
        duration: format!(
            "{} hours, {} minutes, {} seconds",
            duration_secs / 3600,
            (duration_secs % 3600) / 60,
            duration_secs % 60
        ),
        speed: format!("{} MB/s", round2(speed_bytes / (1024.0 * 1024.0))),
        status: if exit_code == "0" {
            "Success".to_string()
        } else {
            format!("Failed ({} errors)", exit_code)
        },
        errors,
        check_type: fields[5].trim().to_string(),
        size: fields[6].trim().to_string(),
    };
    Some((date, check))
}

/// Latest entry of `/boot/config/parity-checks.log`
/// (`YYYY MMM DD HH:MM:SS|duration|speed|exit|errors|type|size`).
pub fn parse_parity_history(output: &str) -> Option<ParityCheck> {
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(parse_log_line)
        .max_by_key(|(date, _)| *date)
        .map(|(_, check)| check)
}

fn at(date: NaiveDate, hour: u32, minute: u32) -> Option<NaiveDateTime> {
    date.and_hms_opt(hour, minute, 0)
}

/// Next run of a `mdcmd check` cron entry: yearly ("1 1") or monthly ("1 *").
pub fn next_scheduled_check(cron: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    for line in cron.lines() {
        let line = line.trim();
        if line.starts_with('#') || !line.contains("mdcmd check") {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 5 {
            continue;
        }
        let (Ok(minute), Ok(hour)) = (parts[0].parse::<u32>(), parts[1].parse::<u32>()) else {
            continue;
        };
        let next = match (parts[2], parts[3]) {
            ("1", "1") => {
                let this_year = at(NaiveDate::from_ymd_opt(now.year(), 1, 1)?, hour, minute)?;
                if this_year > now {
                    this_year
                } else {
                    at(NaiveDate::from_ymd_opt(now.year() + 1, 1, 1)?, hour, minute)?
                }
            }
            ("1", "*") => {
                let this_month =
                    at(NaiveDate::from_ymd_opt(now.year(), now.month(), 1)?, hour, minute)?;
                if this_month > now {
                    this_month
                } else {
                    let (y, m) = if now.month() == 12 {
                        (now.year() + 1, 1)
                    } else {
                        (now.year(), now.month() + 1)
                    };
                    at(NaiveDate::from_ymd_opt(y, m, 1)?, hour, minute)?
                }
            }
            _ => continue,
        };
        return Some(next);
    }
    None
}

/// Human text for the next parity check. Without a schedule, "Manual Only" when the
/// array is configured for manual checks, otherwise a configuration error.
pub fn describe_next_check(cron: &str, parity_mode: Option<&str>, now: NaiveDateTime) -> String {
    match next_scheduled_check(cron, now) {
        Some(next) => {
            let days = (next - now).num_days();
            let time = format!("{:02}:{:02}", next.hour(), next.minute());
            if days == 0 {
                format!("Today at {}", time)
            } else if days == 1 {
                format!("Tomorrow at {}", time)
            } else {
                next.format("%b %d %Y at %H:%M").to_string()
            }
        }
        None if parity_mode == Some(MANUAL_PARITY_MODE) => "Manual Only".to_string(),
        None => "Schedule configuration error".to_string(),
    }
}
