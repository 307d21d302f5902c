// Unraid reads and controls over SSH: shell commands in, parsed models out.

mod containers;
mod control;
mod network;
mod storage;

pub use containers::{DOCKER_CONTROL_TIMEOUT, DockerAction, VmAction};
pub use control::MAX_POWER_DELAY_SECS;
pub use storage::DiskInventory;

use std::sync::Arc;
use tokio::time::Duration;
use tracing::instrument;

use crate::cache::{CacheManager, CachePriority};
use crate::error::{UnraidError, command_preview};
use crate::models::{CpuStats, MemoryStats, ServerInfo, Temperatures, UserScript};
use crate::parsers::{self, sensors, system};
use crate::pool::CommandExecutor;
use crate::ssh::CommandOutput;

pub(crate) mod keys {
    pub const HOSTNAME: &str = "hostname";
    pub const SERVER_INFO: &str = "server_info";
    pub const DISK_CONFIG: &str = "disk_config";
    pub const USER_SCRIPTS: &str = "user_scripts";
    pub const DOCKER_PREFIX: &str = "docker:";
    pub const DOCKER_CONTAINERS: &str = "docker:containers";
    pub const VM_PREFIX: &str = "vm:";
    pub const VM_LIST: &str = "vm:list";
}

const USER_SCRIPTS_DIR: &str = "/boot/config/plugins/user.scripts/scripts";
const DEFAULT_TIMEZONE: &str = "UTC";
/// Per-item reads (one VM, one interface) in flight at once.
const ITEM_CONCURRENCY: usize = 3;

/// Quotes `value` for a POSIX shell unless it only contains safe characters.
pub fn shell_quote(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    let safe = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r#"'"'"'"#))
    }
}

pub struct UnraidRepo {
    executor: Arc<dyn CommandExecutor>,
    cache: Arc<CacheManager>,
}

impl UnraidRepo {
    pub fn new(executor: Arc<dyn CommandExecutor>, cache: Arc<CacheManager>) -> Self {
        Self { executor, cache }
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// Runs a read command; transport errors and non-zero exits are logged and yield None.
    async fn read(&self, command: &str) -> Option<String> {
        match self.executor.execute(command).await {
            Ok(out) => match out.stdout_if_ok() {
                Some(stdout) => Some(stdout.to_string()),
                None => {
                    tracing::debug!(
                        command = %command_preview(command),
                        exit_status = out.exit_status,
                        "Command returned no usable output"
                    );
                    None
                }
            },
            Err(e) => {
                tracing::warn!(command = %command_preview(command), error = %e, "Command failed");
                None
            }
        }
    }

    /// Runs a command and reports whether it exited with status 0.
    async fn succeeds(&self, command: &str) -> bool {
        match self.executor.execute(command).await {
            Ok(out) => out.success(),
            Err(e) => {
                tracing::debug!(command = %command_preview(command), error = %e, "Check failed");
                false
            }
        }
    }

    /// Runs a control command; a non-zero exit becomes `CommandFailed`.
    async fn run_checked(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, UnraidError> {
        let out = match timeout {
            Some(t) => self.executor.execute_with_timeout(command, t).await?,
            None => self.executor.execute(command).await?,
        };
        if out.success() {
            Ok(out)
        } else {
            Err(UnraidError::CommandFailed {
                command: command_preview(command),
                exit_code: out.exit_status,
                stderr: out.stderr.trim().to_string(),
            })
        }
    }

    #[instrument(skip(self), fields(repo = "unraid", operation = "ping"))]
    pub async fn ping(&self) -> Result<(), UnraidError> {
        let out = self.executor.execute("echo ok").await?;
        if out.success() && out.stdout.trim() == "ok" {
            Ok(())
        } else {
            Err(UnraidError::connection(format!(
                "unexpected ping reply (exit {})",
                out.exit_status
            )))
        }
    }

    #[instrument(skip(self), fields(repo = "unraid", operation = "get_hostname"))]
    pub async fn get_hostname(&self) -> Option<String> {
        if let Some(name) = self.cache.get_as::<String>(keys::HOSTNAME) {
            return Some(name);
        }
        for command in ["hostname -f", "uname -n"] {
            if let Some(name) = self.read(command).await.as_deref().and_then(system::sanitize_hostname) {
                self.cache
                    .set_as(keys::HOSTNAME, &name, None, CachePriority::Low);
                return Some(name);
            }
        }
        tracing::warn!("Could not determine hostname");
        None
    }

    #[instrument(skip(self), fields(repo = "unraid", operation = "get_server_info"))]
    pub async fn get_server_info(&self) -> ServerInfo {
        if let Some(info) = self.cache.get_as::<ServerInfo>(keys::SERVER_INFO) {
            return info;
        }
        let (hostname, version, kernel, cpuinfo, cores, timezone) = tokio::join!(
            self.get_hostname(),
            self.read("cat /etc/unraid-version"),
            self.read("uname -r"),
            self.read("cat /proc/cpuinfo"),
            self.read("nproc"),
            self.get_timezone(),
        );
        let info = ServerInfo {
            hostname: hostname.unwrap_or_default(),
            unraid_version: version
                .as_deref()
                .and_then(system::parse_unraid_version)
                .unwrap_or_else(|| "unknown".into()),
            kernel_version: kernel.unwrap_or_else(|| "unknown".into()),
            cpu_model: cpuinfo
                .as_deref()
                .and_then(system::parse_cpu_model)
                .unwrap_or_else(|| "unknown".into()),
            cpu_cores: cores.and_then(|c| c.parse().ok()).unwrap_or(0),
            timezone,
        };
        if !info.hostname.is_empty() {
            self.cache
                .set_as(keys::SERVER_INFO, &info, None, CachePriority::Low);
        }
        info
    }

    async fn get_timezone(&self) -> String {
        if let Some(tz) = self.read("cat /etc/timezone").await {
            return tz;
        }
        self.read("timedatectl show --property=Timezone --value")
            .await
            .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string())
    }

    #[instrument(skip(self), fields(repo = "unraid", operation = "get_cpu_stats"))]
    pub async fn get_cpu_stats(&self) -> CpuStats {
        let (usage, cores) = tokio::join!(
            self.read("top -bn1 | grep 'Cpu(s)' | awk '{print $2 + $4}'"),
            self.read("nproc"),
        );
        CpuStats {
            usage_percent: usage
                .as_deref()
                .and_then(system::parse_cpu_usage)
                .unwrap_or(0.0),
            cores: cores.and_then(|c| c.parse().ok()).unwrap_or(0),
            temperature: None,
        }
    }

    #[instrument(skip(self), fields(repo = "unraid", operation = "get_memory_stats"))]
    pub async fn get_memory_stats(&self) -> MemoryStats {
        self.read("cat /proc/meminfo")
            .await
            .as_deref()
            .and_then(system::parse_meminfo)
            .unwrap_or_default()
    }

    #[instrument(skip(self), fields(repo = "unraid", operation = "get_uptime"))]
    pub async fn get_uptime(&self) -> u64 {
        self.read("cat /proc/uptime")
            .await
            .as_deref()
            .and_then(system::parse_uptime)
            .unwrap_or(0)
    }

    /// lm-sensors temperatures and fan speeds (JSON, then plain text) plus thermal zones.
    #[instrument(skip(self), fields(repo = "unraid", operation = "get_temperatures"))]
    pub async fn get_temperatures(&self) -> Temperatures {
        let (json, zones) = tokio::join!(
            self.read("sensors -j 2>/dev/null"),
            self.read(
                "paste <(cat /sys/class/thermal/thermal_zone*/type) <(cat /sys/class/thermal/thermal_zone*/temp)"
            ),
        );
        let json = json.as_deref().unwrap_or_default();
        let mut readings = sensors::readings_from_json(json);
        let mut fans = sensors::fans_from_json(json);
        if readings.is_empty()
            && let Some(text) = self.read("sensors").await
        {
            readings = sensors::readings_from_text(&text);
            fans = sensors::fans_from_text(&text);
        }
        if let Some(zones) = zones {
            readings.extend(sensors::parse_thermal_zones(&zones));
        }
        Temperatures {
            fans,
            ..sensors::summarize(readings)
        }
    }

    #[instrument(skip(self), fields(repo = "unraid", operation = "get_user_scripts"))]
    pub async fn get_user_scripts(&self) -> Vec<UserScript> {
        if let Some(scripts) = self.cache.get_as::<Vec<UserScript>>(keys::USER_SCRIPTS) {
            return scripts;
        }
        let check = format!("[ -d {} ] && echo exists", USER_SCRIPTS_DIR);
        if self.read(&check).await.as_deref() != Some("exists") {
            return Vec::new();
        }
        let scripts: Vec<UserScript> = self
            .read(&format!("ls -1 {} 2>/dev/null", USER_SCRIPTS_DIR))
            .await
            .map(|out| {
                out.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(|name| UserScript {
                        name: name.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        self.cache
            .set_as(keys::USER_SCRIPTS, &scripts, None, CachePriority::High);
        scripts
    }

    /// Whether `/etc/rc.d/rc.<name> status` exits 0.
    #[instrument(skip(self), fields(repo = "unraid", operation = "get_service_status"))]
    pub async fn get_service_status(&self, name: &str) -> Result<bool, UnraidError> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(UnraidError::invalid(format!("invalid service name: {:?}", name)));
        }
        Ok(self
            .succeeds(&format!("/etc/rc.d/rc.{} status", name))
            .await)
    }

    /// `key=value` settings of `/boot/config/disk.cfg`.
    #[instrument(skip(self), fields(repo = "unraid", operation = "get_disk_config"))]
    pub async fn get_disk_config(&self) -> std::collections::HashMap<String, String> {
        if let Some(cfg) = self.cache.get_as(keys::DISK_CONFIG) {
            return cfg;
        }
        match self.read("cat /boot/config/disk.cfg").await {
            Some(raw) => {
                let cfg = parsers::parse_key_values(&raw);
                self.cache
                    .set_as(keys::DISK_CONFIG, &cfg, None, CachePriority::Medium);
                cfg
            }
            None => Default::default(),
        }
    }
}
