// mdcmd status parsing: array state, resync progress, slot to device mapping

use std::collections::{BTreeMap, HashMap};

use super::{parse_key_values, round2};
use crate::models::{ArrayState, ParityProgress};

fn num<T: std::str::FromStr + Default>(kv: &HashMap<String, String>, key: &str) -> T {
    kv.get(key)
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or_default()
}

/// Short array status for display: started, stopped, unknown or the lowercase mdState.
pub fn array_status(md_state: Option<&str>) -> String {
    match md_state.map(str::trim) {
        None | Some("") => "unknown".into(),
        Some(s) if s.eq_ignore_ascii_case("STARTED") => "started".into(),
        Some(s) if s.eq_ignore_ascii_case("STOPPED") => "stopped".into(),
        Some(s) => s.to_lowercase(),
    }
}

pub fn parse_array_state(output: &str) -> ArrayState {
    let kv = parse_key_values(output);
    let md_state = kv.get("mdState").map(String::as_str);
    ArrayState {
        state: md_state
            .filter(|s| !s.is_empty())
            .map(str::to_uppercase)
            .unwrap_or_else(|| "UNKNOWN".into()),
        status: array_status(md_state),
        num_disks: num(&kv, "mdNumDisks"),
        num_disabled: num(&kv, "mdNumDisabled"),
        num_invalid: num(&kv, "mdNumInvalid"),
        num_missing: num(&kv, "mdNumMissing"),
        last_sync: num(&kv, "sbSynced"),
        resync_action: kv
            .get("mdResyncAction")
            .filter(|s| !s.is_empty())
            .cloned(),
        resync_position: num(&kv, "mdResync"),
        resync_corrected: num(&kv, "mdResyncCorr"),
    }
}

/// Running sync progress from `/proc/mdstat`; None when no sync is running.
pub fn parse_resync_progress(output: &str) -> Option<ParityProgress> {
    let kv = parse_key_values(output);
    let pos: u64 = num(&kv, "mdResyncPos");
    let size: u64 = num(&kv, "mdResyncSize");
    let active: u64 = num(&kv, "mdResync");
    if active == 0 && pos == 0 {
        return None;
    }
    let progress_percent = if size > 0 {
        round2(pos as f64 / size as f64 * 100.0)
    } else {
        0.0
    };
    let dt: u64 = num(&kv, "mdResyncDt");
    let db: u64 = num(&kv, "mdResyncDb");
    let speed = (dt > 0).then(|| db as f64 / dt as f64);
    let finish_mins = speed
        .filter(|s| *s > 0.0)
        .map(|s| round2(size.saturating_sub(pos) as f64 / s / 60.0));
    Some(ParityProgress {
        action: kv.get("mdResyncAction").cloned().unwrap_or_default(),
        progress_percent,
        speed_kb_per_sec: speed.map(round2),
        finish_mins,
    })
}

/// Slot name to block device, from `diskName.N=md1` / `rdevName.N=sdb` pairs.
/// Slot 0 is parity, slot 29 is parity2, others use their diskName (md1 → disk1).
pub fn parse_disk_devices(output: &str) -> BTreeMap<String, String> {
    let kv = parse_key_values(output);
    let mut out = BTreeMap::new();
    for (key, device) in &kv {
        let Some(idx) = key.strip_prefix("rdevName.") else {
            continue;
        };
        if device.is_empty() {
            continue;
        }
        let slot = match idx {
            "0" => "parity".to_string(),
            "29" => "parity2".to_string(),
            _ => match kv.get(&format!("diskName.{}", idx)) {
                Some(name) if !name.is_empty() => match name.strip_prefix("md") {
                    Some(n) => format!("disk{}", n.trim_end_matches("p1")),
                    None => name.clone(),
                },
                _ => continue,
            },
        };
        out.insert(slot, format!("/dev/{}", device));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "sbSynced=1700000000\n\
mdState=started\n\
mdNumDisks=4\n\
mdNumDisabled=0\n\
mdNumInvalid=0\n\
mdNumMissing=1\n\
mdResyncAction=check P\n\
mdResync=0\n\
mdResyncCorr=0\n\
diskName.0=\n\
rdevName.0=sdb\n\
diskName.1=md1\n\
rdevName.1=sdc\n\
diskName.2=md2p1\n\
rdevName.2=sdd\n\
diskName.3=md3\n\
rdevName.3=\n";

    #[test]
    fn array_state_uppercases_state() {
        let a = parse_array_state(STATUS);
        assert_eq!(a.state, "STARTED");
        assert_eq!(a.status, "started");
        assert_eq!(a.num_disks, 4);
        assert_eq!(a.num_missing, 1);
        assert_eq!(a.last_sync, 1_700_000_000);
        assert_eq!(a.resync_action.as_deref(), Some("check P"));
        assert!(a.is_started());
        assert!(!a.is_syncing());
    }

    #[test]
    fn empty_status_is_unknown() {
        let a = parse_array_state("");
        assert_eq!(a.state, "UNKNOWN");
        assert_eq!(a.status, "unknown");
        assert_eq!(array_status(Some("NEW_ARRAY")), "new_array");
    }

    #[test]
    fn slot_devices_are_mapped() {
        let m = parse_disk_devices(STATUS);
        assert_eq!(m.get("parity").map(String::as_str), Some("/dev/sdb"));
        assert_eq!(m.get("disk1").map(String::as_str), Some("/dev/sdc"));
        assert_eq!(m.get("disk2").map(String::as_str), Some("/dev/sdd"));
        assert!(!m.contains_key("disk3"));
    }

    #[test]
    fn resync_progress_from_mdstat() {
        let p = parse_resync_progress(
            "mdResyncAction=check P\nmdResync=1000\nmdResyncPos=250\nmdResyncSize=1000\nmdResyncDt=10\nmdResyncDb=50\n",
        )
        .unwrap();
        assert_eq!(p.progress_percent, 25.0);
        assert_eq!(p.speed_kb_per_sec, Some(5.0));
        assert_eq!(p.finish_mins, Some(2.5));
        assert!(parse_resync_progress("mdResync=0\nmdResyncPos=0\n").is_none());
    }
}
