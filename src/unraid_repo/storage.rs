// Array, disk, filesystem and parity reads

use std::collections::{BTreeMap, HashMap};
use tracing::instrument;

use super::UnraidRepo;
use crate::models::{
    ArrayState, DiskInfo, DiskState, MountStatus, MountUsage, ParityStatus, UsageStats, ZfsPool,
};
use crate::parsers::{df, disks, mdcmd, parity, percent};

const DISK_BATCH_COMMAND: &str = "echo '===DISK_USAGE==='; \
df -P -B1 /mnt/disk[0-9]* /mnt/cache* /mnt/user* 2>/dev/null; \
echo '===MOUNT_INFO==='; \
mount | grep -E '/mnt/' | awk '{print $1,$3,$5}'; \
echo '===DISK_SERIALS==='; \
lsblk -o NAME,SERIAL | grep -v '^NAME'; \
echo '===BLOCK_DEVICES==='; \
lsblk -o NAME,TRAN,TYPE,SIZE,MODEL,VENDOR | grep -v '^NAME'; \
echo '===ZFS_POOLS==='; \
if command -v zpool >/dev/null 2>&1; then zpool list -H -o name,size,alloc,free,capacity,health; else echo 'zfs_not_installed'; fi; \
echo '===ZFS_DEVICES==='; \
if command -v zpool >/dev/null 2>&1; then zpool status -P | grep -E '^[[:space:]]+/dev/' | awk '{print $1}'; else echo 'zfs_not_installed'; fi";

const ZPOOL_LIST_COMMAND: &str =
    "zpool list -H -o name,size,alloc,free,capacity,health 2>/dev/null";

/// Disks and ZFS pools from one batched command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiskInventory {
    pub disks: Vec<DiskInfo>,
    pub zfs_pools: Vec<ZfsPool>,
}

/// Whole-disk name for a partition ("sdb1" → "sdb", "nvme0n1p1" → "nvme0n1").
fn parent_device(name: &str) -> &str {
    if name.starts_with("nvme") {
        match name.rfind('p') {
            Some(i) if i > 4 && name[i + 1..].chars().all(|c| c.is_ascii_digit()) => &name[..i],
            _ => name,
        }
    } else {
        name.trim_end_matches(|c: char| c.is_ascii_digit())
    }
}

impl UnraidRepo {
    #[instrument(skip(self), fields(repo = "unraid", operation = "get_array_state"))]
    pub async fn get_array_state(&self) -> ArrayState {
        self.read("mdcmd status")
            .await
            .map(|out| mdcmd::parse_array_state(&out))
            .unwrap_or_default()
    }

    async fn df_usage(&self, path: &str) -> Option<UsageStats> {
        let command = format!("df -k {} | awk 'NR==2 {{print $2,$3,$4}}'", path);
        self.read(&command)
            .await
            .as_deref()
            .and_then(df::parse_df_kib_line)
    }

    /// /mnt/user totals; only meaningful while the array is started or syncing.
    #[instrument(skip(self, array), fields(repo = "unraid", operation = "get_array_usage"))]
    pub async fn get_array_usage(&self, array: &ArrayState) -> Option<UsageStats> {
        if !array.is_started() && !array.is_syncing() {
            tracing::debug!(state = %array.state, "Array not started, skipping usage");
            return None;
        }
        self.df_usage("/mnt/user").await
    }

    #[instrument(skip(self), fields(repo = "unraid", operation = "get_boot_usage"))]
    pub async fn get_boot_usage(&self) -> Option<UsageStats> {
        self.df_usage("/boot").await
    }

    #[instrument(skip(self), fields(repo = "unraid", operation = "get_log_usage"))]
    pub async fn get_log_usage(&self) -> Option<UsageStats> {
        self.df_usage("/var/log").await
    }

    #[instrument(skip(self), fields(repo = "unraid", operation = "get_docker_vdisk_usage"))]
    pub async fn get_docker_vdisk_usage(&self) -> Option<UsageStats> {
        self.df_usage("/var/lib/docker").await
    }

    #[instrument(skip(self), fields(repo = "unraid", operation = "get_cache_usage"))]
    pub async fn get_cache_usage(&self) -> MountUsage {
        if !self.succeeds("mountpoint -q /mnt/cache").await {
            return MountUsage {
                status: MountStatus::NotMounted,
                usage: None,
            };
        }
        match self.df_usage("/mnt/cache").await {
            None => MountUsage {
                status: MountStatus::Error,
                usage: None,
            },
            Some(u) if u.total == 0 => MountUsage {
                status: MountStatus::Empty,
                usage: Some(u),
            },
            Some(u) => MountUsage {
                status: MountStatus::Mounted,
                usage: Some(u),
            },
        }
    }

    /// Spin state without waking the disk: `smartctl -n standby` exit code, then `hdparm -C`.
    async fn disk_state(&self, device: &str) -> DiskState {
        if disks::is_nvme(device) {
            return DiskState::Active;
        }
        let command = format!("smartctl -n standby -j {}", device);
        if let Ok(out) = self.executor.execute(&command).await
            && let Some(state) = disks::disk_state_from_smartctl(out.exit_status)
        {
            return state;
        }
        match self.read(&format!("hdparm -C {} 2>/dev/null", device)).await {
            Some(out) => disks::disk_state_from_hdparm(&out),
            None => DiskState::Unknown,
        }
    }

    async fn smart_summary(&self, device: &str) -> Option<disks::SmartSummary> {
        let command = format!("smartctl -a -j {}", device);
        // smartctl sets informational bits in its exit status, so parse regardless.
        let out = self.executor.execute(&command).await.ok()?;
        if let Some(summary) = disks::parse_smart_json(&out.stdout) {
            return Some(summary);
        }
        // smartctl builds without JSON output.
        let out = self
            .executor
            .execute(&format!("smartctl -a {}", device))
            .await
            .ok()?;
        let report = disks::parse_smart_text(&out.stdout);
        if report.passed.is_none() && report.temperature.is_none() {
            tracing::debug!(device, "No SMART data");
            return None;
        }
        Some(report.into())
    }

    async fn fill_device_details(&self, disk: &mut DiskInfo) {
        if disk.device.is_empty() {
            return;
        }
        disk.state = self.disk_state(&disk.device).await;
        if disk.state != DiskState::Active {
            return;
        }
        if let Some(smart) = self.smart_summary(&disk.device).await {
            disk.smart_passed = smart.passed;
            disk.temperature = smart.temperature;
            disk.power_on_hours = smart.power_on_hours;
            if disk.model.is_none() {
                disk.model = smart.model;
            }
            if disk.serial.is_none() {
                disk.serial = smart.serial;
            }
        }
    }

    /// Array disks, cache pools and ZFS pools. SMART data is only read from
    /// disks that are already spinning.
    #[instrument(skip(self), fields(repo = "unraid", operation = "get_disk_inventory"))]
    pub async fn get_disk_inventory(&self) -> DiskInventory {
        let (md_status, batch, disk_cfg) = tokio::join!(
            self.read("mdcmd status"),
            self.read(DISK_BATCH_COMMAND),
            self.read("cat /boot/config/disk.cfg"),
        );
        let Some(batch) = batch else {
            tracing::warn!("Disk batch command returned nothing");
            return DiskInventory::default();
        };
        let sections = disks::split_sections(&batch);
        let section = |name: &str| sections.get(name).map(String::as_str).unwrap_or("");

        let slot_devices: BTreeMap<String, String> = md_status
            .as_deref()
            .map(mdcmd::parse_disk_devices)
            .unwrap_or_default();
        let mounts = disks::parse_mount_info(section("MOUNT_INFO"));
        let serials = disks::parse_serials(section("DISK_SERIALS"));
        let blocks = disks::parse_block_devices(section("BLOCK_DEVICES"));
        let zfs_pools = disks::parse_zfs_pools(section("ZFS_POOLS"));
        let zfs_devices = disks::parse_zfs_devices(section("ZFS_DEVICES"));
        let spindown = disks::parse_spindown_delays(disk_cfg.as_deref().unwrap_or(""));

        let mut found: Vec<DiskInfo> = Vec::new();
        for (mount_point, _, usage) in df::parse_df_bytes(section("DISK_USAGE")) {
            let Some(name) = mount_point.strip_prefix("/mnt/") else {
                continue;
            };
            if !disks::is_valid_disk_name(name) {
                tracing::debug!(name, "Skipping non-disk mount");
                continue;
            }
            let (mount_device, fstype) = mounts.get(&mount_point).cloned().unwrap_or_default();
            let device = slot_devices
                .get(name)
                .cloned()
                .unwrap_or(mount_device);
            let dev_name = parent_device(device.trim_start_matches("/dev/"));
            let block = blocks.get(dev_name);
            let filesystem = if zfs_pools.iter().any(|p| p.name == name) {
                "zfs".to_string()
            } else {
                fstype
            };
            found.push(DiskInfo {
                name: name.to_string(),
                device: if dev_name.is_empty() || !device.starts_with("/dev/") {
                    String::new()
                } else {
                    format!("/dev/{}", dev_name)
                },
                mount_point: mount_point.clone(),
                filesystem,
                total: usage.total,
                used: usage.used,
                free: usage.free,
                usage_percent: usage.usage_percent,
                serial: serials.get(dev_name).cloned(),
                model: block.map(|b| b.model.clone()).filter(|m| m != "unknown"),
                transport: block.map(|b| b.transport.clone()).filter(|t| t != "unknown"),
                spindown_delay_secs: spindown.for_disk(name),
                ..Default::default()
            });
        }

        // USB drives inside ZFS pools have no /mnt entry of their own.
        for path in &zfs_devices {
            let dev_name = parent_device(path.trim_start_matches("/dev/"));
            let device = format!("/dev/{}", dev_name);
            if found.iter().any(|d| d.device == device) {
                continue;
            }
            let Some(block) = blocks.get(dev_name).filter(|b| b.transport == "usb") else {
                continue;
            };
            let pool = zfs_pools.first();
            let total = disks::parse_size(&block.size).unwrap_or(0);
            let used = pool.map(|p| p.allocated).unwrap_or(0);
            found.push(DiskInfo {
                name: pool
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| format!("zfs_{}", dev_name)),
                device,
                mount_point: format!("ZFS device ({})", path),
                filesystem: "zfs".into(),
                total,
                used,
                free: pool.map(|p| p.free).unwrap_or(total),
                usage_percent: pool
                    .map(|p| p.capacity_percent)
                    .unwrap_or_else(|| percent(used, total)),
                serial: serials.get(dev_name).cloned(),
                model: Some(block.model.clone()).filter(|m| m != "unknown"),
                transport: Some(block.transport.clone()),
                spindown_delay_secs: spindown.default_secs,
                ..Default::default()
            });
        }

        for disk in found.iter_mut() {
            self.fill_device_details(disk).await;
        }
        tracing::debug!(disks = found.len(), zfs_pools = zfs_pools.len(), "Disk inventory collected");
        DiskInventory {
            disks: found,
            zfs_pools,
        }
    }

    #[instrument(skip(self), fields(repo = "unraid", operation = "get_disks"))]
    pub async fn get_disks(&self) -> Vec<DiskInfo> {
        self.get_disk_inventory().await.disks
    }

    #[instrument(skip(self), fields(repo = "unraid", operation = "get_zfs_pools"))]
    pub async fn get_zfs_pools(&self) -> Vec<ZfsPool> {
        self.read(ZPOOL_LIST_COMMAND)
            .await
            .map(|out| disks::parse_zfs_pools(&out))
            .unwrap_or_default()
    }

    /// Last check from the history log, next scheduled check and any running check.
    #[instrument(skip(self, disk_config), fields(repo = "unraid", operation = "get_parity_status"))]
    pub async fn get_parity_status(&self, disk_config: &HashMap<String, String>) -> ParityStatus {
        let (log, cron, mdstat) = tokio::join!(
            self.read("cat /boot/config/parity-checks.log"),
            self.read("cat /boot/config/plugins/dynamix/parity-check.cron"),
            self.read("cat /proc/mdstat"),
        );
        let now = chrono::Local::now().naive_local();
        ParityStatus {
            last_check: log.as_deref().and_then(parity::parse_parity_history),
            next_check: parity::describe_next_check(
                cron.as_deref().unwrap_or(""),
                disk_config.get("parity.mode").map(String::as_str),
                now,
            ),
            in_progress: mdstat.as_deref().and_then(mdcmd::parse_resync_progress),
        }
    }
}
