// SSH connection pool: bounded session reuse, retries with backoff, circuit breaker.

mod breaker;
mod connection;

pub use breaker::{BackoffSettings, delay_for_attempt};
pub use connection::{ConnectionMetrics, ConnectionState, ConnectionSummary};

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::{Duration, Instant};
use tracing::instrument;

use crate::error::{UnraidError, command_preview};
use crate::ssh::{CommandOutput, Connector};
use breaker::CircuitBreaker;
use connection::{ConnectionLease, MAX_CONNECTION_ERRORS, PooledConnection};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
/// Pool health is logged every this many commands.
const HEALTH_LOG_EVERY: u64 = 100;

/// Anything that can run a shell command on the Unraid host.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, UnraidError>;

    async fn execute(&self, command: &str) -> Result<CommandOutput, UnraidError> {
        self.execute_with_timeout(command, DEFAULT_COMMAND_TIMEOUT)
            .await
    }
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub pool_size: usize,
    pub command_timeout: Duration,
    pub max_connection_lifetime: Duration,
    pub reuse_max_age: Duration,
    pub max_retries: u32,
    pub circuit_breaker_threshold: usize,
    pub circuit_breaker_window: Duration,
    pub backoff: BackoffSettings,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            pool_size: 3,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            max_connection_lifetime: Duration::from_secs(600),
            reuse_max_age: Duration::from_secs(300),
            max_retries: 2,
            circuit_breaker_threshold: 5,
            circuit_breaker_window: Duration::from_secs(60),
            backoff: BackoffSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolMetrics {
    pub pool_size: usize,
    pub active_connections: usize,
    pub busy_connections: usize,
    pub error_connections: usize,
    pub total_commands: u64,
    pub total_errors: u64,
    pub error_rate: f64,
    pub circuit_breaker_open: bool,
    pub recent_errors: usize,
    pub connections: Vec<ConnectionSummary>,
}

pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    settings: PoolSettings,
    connections: tokio::sync::Mutex<Vec<Arc<PooledConnection>>>,
    breaker: std::sync::Mutex<CircuitBreaker>,
    next_id: AtomicU64,
    total_commands: AtomicU64,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>, settings: PoolSettings) -> Self {
        let breaker = CircuitBreaker::new(
            settings.circuit_breaker_threshold,
            settings.circuit_breaker_window,
            settings.backoff.max,
        );
        Self {
            connector,
            settings,
            connections: tokio::sync::Mutex::new(Vec::new()),
            breaker: std::sync::Mutex::new(breaker),
            next_id: AtomicU64::new(1),
            total_commands: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    fn with_breaker<R>(&self, f: impl FnOnce(&mut CircuitBreaker) -> R) -> R {
        let mut guard = match self.breaker.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn record_error(&self) {
        self.with_breaker(|b| b.record_error(Instant::now()));
    }

    /// Opens the first connection so configuration problems surface at startup.
    #[instrument(skip(self), fields(repo = "pool", operation = "initialize", host = %self.connector.host()))]
    pub async fn initialize(&self) -> Result<(), UnraidError> {
        let mut connections = self.connections.lock().await;
        if connections.is_empty() {
            let conn = self.create_connection().await?;
            connections.push(conn);
        }
        tracing::info!(
            pool_size = self.settings.pool_size,
            "SSH connection pool initialized"
        );
        Ok(())
    }

    async fn create_connection(&self) -> Result<Arc<PooledConnection>, UnraidError> {
        match self.connector.connect().await {
            Ok(session) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let recent = self.with_breaker(|b| b.recent_error_count());
                if recent > 0 {
                    tracing::info!(
                        connection_id = id,
                        recent_errors = recent,
                        "SSH connection recovered"
                    );
                } else {
                    tracing::debug!(connection_id = id, "SSH connection created");
                }
                Ok(Arc::new(PooledConnection::new(id, session)))
            }
            Err(e) => {
                self.record_error();
                tracing::warn!(
                    host = %self.connector.host(),
                    error = %e,
                    operation = "connect",
                    "SSH connection failed"
                );
                Err(e)
            }
        }
    }

    async fn get_connection(&self) -> Result<ConnectionLease, UnraidError> {
        self.with_breaker(|b| b.check(Instant::now()))?;

        let mut connections = self.connections.lock().await;
        let stale = self.take_stale(&mut connections);
        let selected = self.select_connection(&mut connections).await;
        drop(connections);

        for conn in stale {
            tracing::debug!(connection_id = conn.id, "Removing stale SSH connection");
            // A stale connection may still be running a command.
            tokio::spawn(async move { conn.disconnect().await });
        }
        selected
    }

    /// Idle reusable connection first, then a new one while below `pool_size`,
    /// then the least loaded healthy connection.
    async fn select_connection(
        &self,
        connections: &mut Vec<Arc<PooledConnection>>,
    ) -> Result<ConnectionLease, UnraidError> {
        if let Some(conn) = connections
            .iter()
            .find(|c| c.in_flight() == 0 && c.is_reusable(self.settings.reuse_max_age))
        {
            return Ok(conn.lease());
        }

        if connections.len() < self.settings.pool_size {
            let conn = self.create_connection().await?;
            let lease = conn.lease();
            connections.push(conn);
            return Ok(lease);
        }

        connections
            .iter()
            .filter(|c| c.is_healthy())
            .min_by_key(|c| (c.in_flight(), c.metrics().command_count))
            .map(|c| c.lease())
            .ok_or_else(|| UnraidError::connection("no usable connection in pool"))
    }

    fn take_stale(
        &self,
        connections: &mut Vec<Arc<PooledConnection>>,
    ) -> Vec<Arc<PooledConnection>> {
        let mut removed = Vec::new();
        connections.retain(|c| {
            c.refresh_liveness();
            let m = c.metrics();
            let state = c.state();
            let keep = m.age() <= self.settings.max_connection_lifetime
                && m.error_count < MAX_CONNECTION_ERRORS
                && !matches!(
                    state,
                    ConnectionState::Error | ConnectionState::Disconnected
                );
            if !keep {
                removed.push(c.clone());
            }
            keep
        });
        removed
    }

    #[instrument(skip(self, command), fields(repo = "pool", operation = "execute"))]
    async fn execute_with_retries(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, UnraidError> {
        let attempts = self.settings.max_retries + 1;
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = delay_for_attempt(&self.settings.backoff, attempt);
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    command = %command_preview(command),
                    "Retrying command"
                );
                tokio::time::sleep(delay).await;
            }

            let conn = match self.get_connection().await {
                Ok(c) => c,
                Err(e) if e.is_retriable() => {
                    last_error = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            match conn.execute(command, timeout).await {
                Ok(output) => {
                    let n = self.total_commands.fetch_add(1, Ordering::Relaxed) + 1;
                    if n % HEALTH_LOG_EVERY == 0 {
                        let m = self.metrics().await;
                        tracing::debug!(
                            pool_size = m.pool_size,
                            active = m.active_connections,
                            error_rate = m.error_rate,
                            "Connection pool health"
                        );
                    }
                    return Ok(output);
                }
                Err(e) => {
                    self.record_error();
                    tracing::warn!(
                        attempt = attempt + 1,
                        attempts,
                        error = %e,
                        command = %command_preview(command),
                        "Command attempt failed"
                    );
                    if !e.is_retriable() {
                        return Err(e);
                    }
                    last_error = Some(e);
                }
            }
        }

        let e = last_error.unwrap_or_else(|| UnraidError::connection("no attempts made"));
        tracing::error!(
            attempts,
            error = %e,
            command = %command_preview(command),
            "Command failed after all attempts"
        );
        Err(with_attempts(e, attempts))
    }

    /// Runs `echo` and reports whether it came back clean.
    pub async fn health_check(&self) -> bool {
        match self.execute("echo").await {
            Ok(out) => out.success(),
            Err(e) => {
                tracing::debug!(error = %e, "Health check failed");
                false
            }
        }
    }

    pub async fn metrics(&self) -> PoolMetrics {
        let connections = self.connections.lock().await;
        let mut active = 0;
        let mut busy = 0;
        let mut errored = 0;
        let mut total_commands = 0u64;
        let mut total_errors = 0u64;
        for c in connections.iter() {
            match c.state() {
                ConnectionState::Active => active += 1,
                ConnectionState::Error => errored += 1,
                _ => {}
            }
            if c.in_flight() > 0 {
                busy += 1;
            }
            let m = c.metrics();
            total_commands += m.command_count;
            total_errors += m.error_count as u64;
        }
        let now = Instant::now();
        let (open, recent) = self.with_breaker(|b| (b.is_open(now), b.recent_error_count()));
        PoolMetrics {
            pool_size: connections.len(),
            active_connections: active,
            busy_connections: busy,
            error_connections: errored,
            total_commands,
            total_errors,
            error_rate: if total_commands > 0 {
                total_errors as f64 / total_commands as f64
            } else {
                0.0
            },
            circuit_breaker_open: open,
            recent_errors: recent,
            connections: connections.iter().map(|c| c.summary()).collect(),
        }
    }

    pub async fn shutdown(&self) {
        let mut connections = self.connections.lock().await;
        for conn in connections.drain(..) {
            conn.disconnect().await;
        }
        tracing::info!("SSH connection pool shut down");
    }
}

fn with_attempts(e: UnraidError, attempts: u32) -> UnraidError {
    match e {
        UnraidError::Timeout { command, secs } => UnraidError::Timeout {
            command: format!("{} (after {} attempts)", command, attempts),
            secs,
        },
        UnraidError::Connection { message } => UnraidError::Connection {
            message: format!("{} (after {} attempts)", message, attempts),
        },
        other => other,
    }
}

#[async_trait]
impl CommandExecutor for ConnectionPool {
    async fn execute_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, UnraidError> {
        self.execute_with_retries(command, timeout).await
    }

    async fn execute(&self, command: &str) -> Result<CommandOutput, UnraidError> {
        self.execute_with_retries(command, self.settings.command_timeout)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::Session;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    #[derive(Default)]
    struct FakeConnector {
        connects: AtomicUsize,
        execs: Arc<AtomicUsize>,
        fail_connect: AtomicBool,
    }

    struct FakeSession {
        execs: Arc<AtomicUsize>,
        closed: bool,
    }

    #[async_trait]
    impl Session for FakeSession {
        async fn exec(&mut self, command: &str) -> Result<CommandOutput, UnraidError> {
            self.execs.fetch_add(1, Ordering::SeqCst);
            if let Some(secs) = command.strip_prefix("sleep ") {
                let secs = secs.parse().unwrap_or(1);
                tokio::time::sleep(Duration::from_secs(secs)).await;
            }
            match command {
                "hang" => std::future::pending().await,
                "drop" => Err(UnraidError::connection("connection reset")),
                "false" => Ok(CommandOutput {
                    exit_status: 1,
                    ..Default::default()
                }),
                _ => Ok(CommandOutput {
                    stdout: format!("{}\n", command),
                    ..Default::default()
                }),
            }
        }

        async fn close(&mut self) {
            self.closed = true;
        }

        fn is_closed(&self) -> bool {
            self.closed
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self) -> Result<Box<dyn Session>, UnraidError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(UnraidError::connection("refused"));
            }
            Ok(Box::new(FakeSession {
                execs: self.execs.clone(),
                closed: false,
            }))
        }

        fn host(&self) -> &str {
            "tower"
        }
    }

    fn pool(connector: Arc<FakeConnector>) -> ConnectionPool {
        ConnectionPool::new(connector, PoolSettings::default())
    }

    #[tokio::test]
    async fn reuses_a_single_healthy_connection() {
        let connector = Arc::new(FakeConnector::default());
        let pool = pool(connector.clone());
        for _ in 0..3 {
            let out = pool.execute("uptime").await.unwrap();
            assert_eq!(out.stdout.trim(), "uptime");
        }
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        let m = pool.metrics().await;
        assert_eq!(m.pool_size, 1);
        assert_eq!(m.total_commands, 3);
        assert_eq!(m.error_rate, 0.0);
    }

    #[tokio::test]
    async fn non_zero_exit_is_returned_without_retry() {
        let connector = Arc::new(FakeConnector::default());
        let pool = pool(connector.clone());
        let out = pool.execute("false").await.unwrap();
        assert_eq!(out.exit_status, 1);
        assert_eq!(connector.execs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_are_retried_on_fresh_connections() {
        let connector = Arc::new(FakeConnector::default());
        let pool = pool(connector.clone());
        let err = pool
            .execute_with_timeout("hang", Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            UnraidError::Timeout { command, secs } => {
                assert_eq!(secs, 1);
                assert!(command.contains("after 3 attempts"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(connector.execs.load(Ordering::SeqCst), 3);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_connection_is_replaced() {
        let connector = Arc::new(FakeConnector::default());
        let pool = pool(connector.clone());
        assert!(pool.execute("drop").await.is_err());
        let out = pool.execute("echo").await.unwrap();
        assert!(out.success());
        let m = pool.metrics().await;
        assert_eq!(m.error_connections, 0);
        assert_eq!(m.pool_size, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn circuit_opens_after_repeated_failures_then_recovers() {
        let connector = Arc::new(FakeConnector::default());
        connector.fail_connect.store(true, Ordering::SeqCst);
        let pool = pool(connector.clone());

        let first = pool.execute("uptime").await.unwrap_err();
        assert!(matches!(first, UnraidError::Connection { .. }));
        let second = pool.execute("uptime").await.unwrap_err();
        assert!(matches!(second, UnraidError::CircuitOpen { .. }));
        assert!(pool.metrics().await.circuit_breaker_open);

        let attempts_while_open = connector.connects.load(Ordering::SeqCst);
        assert!(pool.execute("uptime").await.is_err());
        assert_eq!(connector.connects.load(Ordering::SeqCst), attempts_while_open);

        tokio::time::advance(Duration::from_secs(301)).await;
        connector.fail_connect.store(false, Ordering::SeqCst);
        assert!(pool.execute("uptime").await.is_ok());
        assert!(!pool.metrics().await.circuit_breaker_open);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_commands_run_on_separate_connections() {
        let connector = Arc::new(FakeConnector::default());
        let pool = pool(connector.clone());
        let started = Instant::now();
        let (a, b, c) = tokio::join!(
            pool.execute("sleep 5"),
            pool.execute("sleep 5"),
            pool.execute("sleep 5"),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert!(started.elapsed() < Duration::from_secs(6));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 3);

        let m = pool.metrics().await;
        assert_eq!(m.pool_size, 3);
        assert_eq!(m.busy_connections, 0);
        assert!(
            m.connections
                .iter()
                .all(|c| c.command_count == 1 && c.avg_command_ms == 5000)
        );

        // All idle again, so nothing new is opened.
        pool.execute("uptime").await.unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_connections_beyond_pool_size_are_shared() {
        let connector = Arc::new(FakeConnector::default());
        let pool = ConnectionPool::new(
            connector.clone(),
            PoolSettings {
                pool_size: 2,
                ..PoolSettings::default()
            },
        );
        let started = Instant::now();
        let (a, b, c) = tokio::join!(
            pool.execute("sleep 5"),
            pool.execute("sleep 5"),
            pool.execute("sleep 5"),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_busy_connection_does_not_block_the_pool() {
        let connector = Arc::new(FakeConnector::default());
        let pool = Arc::new(ConnectionPool::new(
            connector.clone(),
            PoolSettings {
                max_connection_lifetime: Duration::from_secs(10),
                reuse_max_age: Duration::from_secs(5),
                ..PoolSettings::default()
            },
        ));
        let busy = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.execute("sleep 30").await })
        };
        tokio::time::sleep(Duration::from_secs(11)).await;

        let out = tokio::time::timeout(Duration::from_secs(1), pool.execute("echo"))
            .await
            .expect("pool lock released while the stale connection is busy")
            .unwrap();
        assert!(out.success());
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        assert_eq!(pool.metrics().await.pool_size, 1);
        assert!(busy.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn health_check_and_shutdown() {
        let connector = Arc::new(FakeConnector::default());
        let pool = pool(connector.clone());
        pool.initialize().await.unwrap();
        assert!(pool.health_check().await);
        pool.shutdown().await;
        assert_eq!(pool.metrics().await.pool_size, 0);
    }
}
