// libvirt virtual machine models

use serde::{Deserialize, Serialize};
use wincode::{SchemaRead, SchemaWrite};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, SchemaRead, SchemaWrite,
)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    Running,
    ShutOff,
    Paused,
    Idle,
    InShutdown,
    Crashed,
    PmSuspended,
    #[default]
    #[serde(other)]
    Other,
}

impl VmState {
    /// Parse a `virsh domstate` / `virsh list` state string.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "running" => VmState::Running,
            "shut off" => VmState::ShutOff,
            "paused" => VmState::Paused,
            "idle" => VmState::Idle,
            "in shutdown" => VmState::InShutdown,
            "crashed" => VmState::Crashed,
            "pmsuspended" => VmState::PmSuspended,
            _ => VmState::Other,
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, VmState::Running | VmState::Idle)
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, SchemaRead, SchemaWrite,
)]
#[serde(rename_all = "lowercase")]
pub enum VmOsType {
    Windows,
    Linux,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
#[serde(rename_all = "camelCase")]
pub struct VmInfo {
    pub name: String,
    pub state: VmState,
    pub os_type: VmOsType,
    pub vcpus: u32,
    /// Maximum memory in KiB as reported by libvirt.
    pub memory_kib: u64,
}
