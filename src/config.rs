use serde::Deserialize;
use std::time::Duration;

use crate::pool::{BackoffSettings, PoolSettings};
use crate::ssh::SshSettings;

/// Overrides `unraid.password` when set.
pub const PASSWORD_ENV: &str = "UNRAID_PASSWORD";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub unraid: UnraidConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub database: DatabaseConfig,
    pub publishing: PublishingConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnraidConfig {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_username() -> String {
    "root".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Max concurrent SSH sessions to the server.
    pub pool_size: usize,
    pub command_timeout_secs: u64,
    pub login_timeout_secs: u64,
    pub keepalive_interval_secs: u64,
    pub keepalive_max: usize,
    pub max_connection_lifetime_secs: u64,
    pub reuse_max_age_secs: u64,
    pub max_retries: u32,
    pub circuit_breaker_threshold: usize,
    pub circuit_breaker_window_secs: u64,
    pub backoff_initial_ms: u64,
    pub backoff_factor: f64,
    /// Also how long the circuit stays open.
    pub backoff_max_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            pool_size: 3,
            command_timeout_secs: 60,
            login_timeout_secs: 10,
            keepalive_interval_secs: 30,
            keepalive_max: 3,
            max_connection_lifetime_secs: 600,
            reuse_max_age_secs: 300,
            max_retries: 2,
            circuit_breaker_threshold: 5,
            circuit_breaker_window_secs: 60,
            backoff_initial_ms: 1000,
            backoff_factor: 2.0,
            backoff_max_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub general_interval_mins: u64,
    pub disk_interval_hours: u64,
    pub has_ups: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            general_interval_mins: 5,
            disk_interval_hours: 1,
            has_ups: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_size_bytes: usize,
    pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: crate::cache::DEFAULT_MAX_SIZE_BYTES,
            cleanup_interval_secs: crate::cache::DEFAULT_CLEANUP_INTERVAL.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub flush_rate: u64,
    /// Buffered snapshots are written at least this often.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_flush_interval_secs() -> u64 {
    600
}

fn default_retention_days() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishingConfig {
    /// Max number of snapshots kept in the broadcast channel for /ws/snapshot (slow clients may lag).
    pub broadcast_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// How often to log app stats (ws clients, snapshots saved, pool and cache health) at INFO level.
    pub stats_log_interval_secs: u64,
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
}

fn default_prune_interval_secs() -> u64 {
    3600
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("reading config file {}: {}", path, e))?;
        let mut config: AppConfig = toml::from_str(&s)?;
        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            config.unraid.password = Some(password);
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate config from a string (e.g. for tests). The password
    /// environment override is not applied.
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.unraid.host.trim().is_empty(),
            "unraid.host must be non-empty"
        );
        anyhow::ensure!(
            self.unraid.port > 0,
            "unraid.port must be between 1 and 65535, got {}",
            self.unraid.port
        );
        anyhow::ensure!(
            !self.unraid.username.is_empty(),
            "unraid.username must be non-empty"
        );
        anyhow::ensure!(
            self.unraid.password.is_some(),
            "unraid.password must be set (or provide {})",
            PASSWORD_ENV
        );
        anyhow::ensure!(
            self.ssh.pool_size > 0,
            "ssh.pool_size must be > 0, got {}",
            self.ssh.pool_size
        );
        anyhow::ensure!(
            self.ssh.command_timeout_secs > 0,
            "ssh.command_timeout_secs must be > 0, got {}",
            self.ssh.command_timeout_secs
        );
        anyhow::ensure!(
            self.ssh.login_timeout_secs > 0,
            "ssh.login_timeout_secs must be > 0, got {}",
            self.ssh.login_timeout_secs
        );
        anyhow::ensure!(
            self.ssh.keepalive_interval_secs > 0,
            "ssh.keepalive_interval_secs must be > 0, got {}",
            self.ssh.keepalive_interval_secs
        );
        anyhow::ensure!(
            self.ssh.keepalive_max > 0,
            "ssh.keepalive_max must be > 0, got {}",
            self.ssh.keepalive_max
        );
        anyhow::ensure!(
            self.ssh.max_connection_lifetime_secs > 0,
            "ssh.max_connection_lifetime_secs must be > 0, got {}",
            self.ssh.max_connection_lifetime_secs
        );
        anyhow::ensure!(
            self.ssh.reuse_max_age_secs > 0,
            "ssh.reuse_max_age_secs must be > 0, got {}",
            self.ssh.reuse_max_age_secs
        );
        anyhow::ensure!(
            self.ssh.circuit_breaker_window_secs > 0,
            "ssh.circuit_breaker_window_secs must be > 0, got {}",
            self.ssh.circuit_breaker_window_secs
        );
        anyhow::ensure!(
            self.ssh.backoff_initial_ms > 0,
            "ssh.backoff_initial_ms must be > 0, got {}",
            self.ssh.backoff_initial_ms
        );
        anyhow::ensure!(
            self.ssh.backoff_max_secs > 0,
            "ssh.backoff_max_secs must be > 0, got {}",
            self.ssh.backoff_max_secs
        );
        anyhow::ensure!(
            self.ssh.backoff_max_secs.saturating_mul(1000) >= self.ssh.backoff_initial_ms,
            "ssh.backoff_max_secs ({}s) must not be below ssh.backoff_initial_ms ({}ms)",
            self.ssh.backoff_max_secs,
            self.ssh.backoff_initial_ms
        );
        anyhow::ensure!(
            self.ssh.circuit_breaker_threshold > 0,
            "ssh.circuit_breaker_threshold must be > 0, got {}",
            self.ssh.circuit_breaker_threshold
        );
        anyhow::ensure!(
            self.ssh.backoff_factor >= 1.0,
            "ssh.backoff_factor must be >= 1.0, got {}",
            self.ssh.backoff_factor
        );
        anyhow::ensure!(
            (1..=60).contains(&self.polling.general_interval_mins),
            "polling.general_interval_mins must be between 1 and 60, got {}",
            self.polling.general_interval_mins
        );
        anyhow::ensure!(
            (1..=24).contains(&self.polling.disk_interval_hours),
            "polling.disk_interval_hours must be between 1 and 24, got {}",
            self.polling.disk_interval_hours
        );
        anyhow::ensure!(
            self.cache.max_size_bytes > 0,
            "cache.max_size_bytes must be > 0, got {}",
            self.cache.max_size_bytes
        );
        anyhow::ensure!(
            self.cache.cleanup_interval_secs > 0,
            "cache.cleanup_interval_secs must be > 0, got {}",
            self.cache.cleanup_interval_secs
        );
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.flush_rate > 0,
            "database.flush_rate must be > 0, got {}",
            self.database.flush_rate
        );
        anyhow::ensure!(
            self.database.flush_interval_secs > 0,
            "database.flush_interval_secs must be > 0, got {}",
            self.database.flush_interval_secs
        );
        anyhow::ensure!(
            self.database.retention_days > 0,
            "database.retention_days must be > 0, got {}",
            self.database.retention_days
        );
        anyhow::ensure!(
            self.publishing.broadcast_capacity > 0,
            "publishing.broadcast_capacity must be > 0, got {}",
            self.publishing.broadcast_capacity
        );
        anyhow::ensure!(
            self.monitoring.stats_log_interval_secs > 0,
            "monitoring.stats_log_interval_secs must be > 0, got {}",
            self.monitoring.stats_log_interval_secs
        );
        anyhow::ensure!(
            self.monitoring.prune_interval_secs > 0,
            "monitoring.prune_interval_secs must be > 0, got {}",
            self.monitoring.prune_interval_secs
        );
        Ok(())
    }

    pub fn ssh_settings(&self) -> SshSettings {
        SshSettings {
            host: self.unraid.host.clone(),
            port: self.unraid.port,
            username: self.unraid.username.clone(),
            password: self.unraid.password.clone().unwrap_or_default(),
            login_timeout: Duration::from_secs(self.ssh.login_timeout_secs),
            keepalive_interval: Duration::from_secs(self.ssh.keepalive_interval_secs),
            keepalive_max: self.ssh.keepalive_max,
        }
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            pool_size: self.ssh.pool_size,
            command_timeout: Duration::from_secs(self.ssh.command_timeout_secs),
            max_connection_lifetime: Duration::from_secs(self.ssh.max_connection_lifetime_secs),
            reuse_max_age: Duration::from_secs(self.ssh.reuse_max_age_secs),
            max_retries: self.ssh.max_retries,
            circuit_breaker_threshold: self.ssh.circuit_breaker_threshold,
            circuit_breaker_window: Duration::from_secs(self.ssh.circuit_breaker_window_secs),
            backoff: BackoffSettings {
                initial: Duration::from_millis(self.ssh.backoff_initial_ms),
                factor: self.ssh.backoff_factor,
                max: Duration::from_secs(self.ssh.backoff_max_secs),
            },
        }
    }
}
