// One polling cycle's view of the server

use serde::{Deserialize, Serialize};
use wincode::{SchemaRead, SchemaWrite};

use super::{
    ArrayState, ContainerInfo, CpuStats, DiskInfo, MemoryStats, MountUsage, NetworkInterface,
    ParityStatus, Temperatures, UpsInfo, UsageStats, UserScript, VmInfo, ZfsPool,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
#[serde(rename_all = "camelCase")]
pub struct UnraidSnapshot {
    /// Unix time in milliseconds.
    pub timestamp: u64,
    pub cpu: CpuStats,
    pub memory: MemoryStats,
    pub uptime_secs: u64,
    pub array: ArrayState,
    pub array_usage: Option<UsageStats>,
    pub disks: Vec<DiskInfo>,
    pub zfs_pools: Vec<ZfsPool>,
    pub cache: MountUsage,
    pub boot: Option<UsageStats>,
    pub log: Option<UsageStats>,
    pub docker_vdisk: Option<UsageStats>,
    pub temperatures: Temperatures,
    pub network: Vec<NetworkInterface>,
    pub docker_running: bool,
    pub containers: Vec<ContainerInfo>,
    pub libvirt_running: bool,
    pub vms: Vec<VmInfo>,
    pub user_scripts: Vec<UserScript>,
    pub ups: Option<UpsInfo>,
    pub parity: ParityStatus,
}
