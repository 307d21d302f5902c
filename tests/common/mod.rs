// Shared helpers for integration tests: sample snapshots and a scripted SSH host

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::time::Duration;
use unraid_monitor::cache::CacheManager;
use unraid_monitor::error::UnraidError;
use unraid_monitor::models::*;
use unraid_monitor::pool::{ConnectionPool, PoolSettings};
use unraid_monitor::ssh::{CommandOutput, Connector, Session};
use unraid_monitor::unraid_repo::UnraidRepo;

pub const TEST_CONFIG: &str = r#"
[server]
port = 8080
host = "0.0.0.0"

[unraid]
host = "tower.local"
password = "secret"

[database]
path = "history.db"
flush_rate = 10

[publishing]
broadcast_capacity = 16

[monitoring]
stats_log_interval_secs = 60
"#;

/// Snapshot with a little of everything filled in.
pub fn sample_snapshot(timestamp: u64) -> UnraidSnapshot {
    UnraidSnapshot {
        timestamp,
        cpu: CpuStats {
            usage_percent: 12.5,
            cores: 8,
            temperature: Some(41.0),
        },
        memory: MemoryStats {
            total: 32 * 1024 * 1024 * 1024,
            used: 8 * 1024 * 1024 * 1024,
            free: 20 * 1024 * 1024 * 1024,
            available: 24 * 1024 * 1024 * 1024,
            cached: 4 * 1024 * 1024 * 1024,
            usage_percent: 25.0,
        },
        uptime_secs: 86_400,
        array: ArrayState {
            state: "STARTED".into(),
            num_disks: 4,
            ..Default::default()
        },
        array_usage: Some(UsageStats {
            total: 4000,
            used: 1000,
            free: 3000,
            usage_percent: 25.0,
        }),
        containers: vec![ContainerInfo {
            id: "abc123".into(),
            name: "plex".into(),
            state: ContainerState::Running,
            status: "Up 2 hours".into(),
            image: "plexinc/pms-docker".into(),
        }],
        docker_running: true,
        ..Default::default()
    }
}

pub fn sample_server_info() -> ServerInfo {
    ServerInfo {
        hostname: "tower".into(),
        unraid_version: "6.12.10".into(),
        kernel_version: "6.1.79-Unraid".into(),
        cpu_model: "Intel(R) Core(TM) i5-12400".into(),
        cpu_cores: 12,
        timezone: "Europe/Berlin".into(),
    }
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

#[derive(Default)]
struct HostState {
    rules: Vec<(String, CommandOutput)>,
    calls: Vec<String>,
    down: bool,
}

/// Fake Unraid box: the first rule whose pattern is a substring of the command
/// answers it; anything else exits 1. `echo ok` always answers.
#[derive(Clone)]
pub struct FakeHost {
    state: Arc<Mutex<HostState>>,
}

impl FakeHost {
    pub fn new() -> Self {
        let host = Self {
            state: Arc::new(Mutex::new(HostState::default())),
        };
        host.on("echo ok", "ok\n")
    }

    pub fn on(self, pattern: &str, stdout: &str) -> Self {
        self.on_output(
            pattern,
            CommandOutput {
                stdout: stdout.into(),
                ..Default::default()
            },
        )
    }

    pub fn on_exit(self, pattern: &str, exit_status: u32) -> Self {
        self.on_output(
            pattern,
            CommandOutput {
                exit_status,
                ..Default::default()
            },
        )
    }

    pub fn on_output(self, pattern: &str, out: CommandOutput) -> Self {
        self.state.lock().unwrap().rules.push((pattern.into(), out));
        self
    }

    /// Refuses new connections and fails commands on open ones.
    pub fn set_down(&self, down: bool) {
        self.state.lock().unwrap().down = down;
    }

    pub fn calls_matching(&self, pattern: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }

    fn answer(&self, command: &str) -> Result<CommandOutput, UnraidError> {
        let mut state = self.state.lock().unwrap();
        if state.down {
            return Err(UnraidError::connection("host unreachable"));
        }
        state.calls.push(command.to_string());
        Ok(state
            .rules
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or(CommandOutput {
                exit_status: 1,
                ..Default::default()
            }))
    }
}

struct FakeSession {
    host: FakeHost,
    closed: bool,
}

#[async_trait]
impl Session for FakeSession {
    async fn exec(&mut self, command: &str) -> Result<CommandOutput, UnraidError> {
        self.host.answer(command)
    }

    async fn close(&mut self) {
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl Connector for FakeHost {
    async fn connect(&self) -> Result<Box<dyn Session>, UnraidError> {
        if self.state.lock().unwrap().down {
            return Err(UnraidError::connection("connection refused"));
        }
        Ok(Box::new(FakeSession {
            host: self.clone(),
            closed: false,
        }))
    }

    fn host(&self) -> &str {
        "fake-tower"
    }
}

/// Pool without retries so failures surface immediately.
pub fn test_pool(host: &FakeHost) -> Arc<ConnectionPool> {
    Arc::new(ConnectionPool::new(
        Arc::new(host.clone()),
        PoolSettings {
            max_retries: 0,
            circuit_breaker_threshold: 100,
            command_timeout: Duration::from_secs(5),
            ..Default::default()
        },
    ))
}

pub fn test_repo(pool: Arc<ConnectionPool>) -> Arc<UnraidRepo> {
    Arc::new(UnraidRepo::new(pool, Arc::new(CacheManager::default())))
}
