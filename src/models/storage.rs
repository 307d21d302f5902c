// Array, disk, pool and parity models

use serde::{Deserialize, Serialize};
use wincode::{SchemaRead, SchemaWrite};

/// Array status from `mdcmd status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
#[serde(rename_all = "camelCase")]
pub struct ArrayState {
    /// mdState upper-cased, e.g. "STARTED".
    pub state: String,
    /// Short form: started, stopped, unknown or the lowercase mdState.
    pub status: String,
    pub num_disks: u32,
    pub num_disabled: u32,
    pub num_invalid: u32,
    pub num_missing: u32,
    /// Unix time of the last completed sync.
    pub last_sync: u64,
    pub resync_action: Option<String>,
    pub resync_position: u64,
    pub resync_corrected: u64,
}

impl Default for ArrayState {
    fn default() -> Self {
        Self {
            state: "UNKNOWN".into(),
            status: "unknown".into(),
            num_disks: 0,
            num_disabled: 0,
            num_invalid: 0,
            num_missing: 0,
            last_sync: 0,
            resync_action: None,
            resync_position: 0,
            resync_corrected: 0,
        }
    }
}

impl ArrayState {
    pub fn is_started(&self) -> bool {
        self.state == "STARTED"
    }

    pub fn is_syncing(&self) -> bool {
        self.resync_position > 0
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, SchemaRead, SchemaWrite,
)]
#[serde(rename_all = "lowercase")]
pub enum DiskState {
    Active,
    Standby,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
#[serde(rename_all = "camelCase")]
pub struct DiskInfo {
    /// Unraid slot name, e.g. "disk1", "cache", "parity".
    pub name: String,
    /// Block device, e.g. "/dev/sdb".
    pub device: String,
    pub mount_point: String,
    pub filesystem: String,
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub usage_percent: f64,
    pub serial: Option<String>,
    pub model: Option<String>,
    pub transport: Option<String>,
    pub state: DiskState,
    pub temperature: Option<f64>,
    pub smart_passed: Option<bool>,
    pub power_on_hours: Option<u64>,
    pub spindown_delay_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
#[serde(rename_all = "camelCase")]
pub struct ZfsPool {
    pub name: String,
    pub size: u64,
    pub allocated: u64,
    pub free: u64,
    pub capacity_percent: f64,
    pub health: String,
}

/// Last completed parity check from the parity-checks log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
#[serde(rename_all = "camelCase")]
pub struct ParityCheck {
    /// Local time, "%Y-%m-%d %H:%M:%S".
    pub date: String,
    pub duration_secs: u64,
    pub duration: String,
    pub speed: String,
    pub status: String,
    pub errors: u64,
    pub check_type: String,
    pub size: String,
}

/// Running parity/sync progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
#[serde(rename_all = "camelCase")]
pub struct ParityProgress {
    pub action: String,
    pub progress_percent: f64,
    pub speed_kb_per_sec: Option<f64>,
    pub finish_mins: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
#[serde(rename_all = "camelCase")]
pub struct ParityStatus {
    pub last_check: Option<ParityCheck>,
    pub next_check: String,
    pub in_progress: Option<ParityProgress>,
}
