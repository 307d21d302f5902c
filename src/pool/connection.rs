// A pooled SSH session with state and usage metrics.

use serde::Serialize;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant};

use crate::error::{UnraidError, command_preview};
use crate::ssh::{CommandOutput, Session};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
/// Connections with this many errors are removed from the pool.
pub(crate) const MAX_CONNECTION_ERRORS: u32 = 5;
/// Connections with this many errors are no longer handed out for reuse.
const MAX_REUSE_ERRORS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Active,
    Error,
    Disconnecting,
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct ConnectionMetrics {
    pub created_at: Instant,
    pub last_used: Instant,
    pub command_count: u64,
    pub error_count: u32,
    pub total_command_time: Duration,
}

impl ConnectionMetrics {
    fn new(now: Instant) -> Self {
        Self {
            created_at: now,
            last_used: now,
            command_count: 0,
            error_count: 0,
            total_command_time: Duration::ZERO,
        }
    }

    pub fn age(&self) -> Duration {
        Instant::now().duration_since(self.created_at)
    }

    pub fn idle_time(&self) -> Duration {
        Instant::now().duration_since(self.last_used)
    }

    pub fn avg_command_time(&self) -> Duration {
        if self.command_count == 0 {
            Duration::ZERO
        } else {
            let nanos = self.total_command_time.as_nanos() / self.command_count as u128;
            Duration::from_nanos(nanos as u64)
        }
    }
}

/// Per-connection view reported in pool metrics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    pub id: u64,
    pub state: ConnectionState,
    pub in_flight: usize,
    pub age_secs: u64,
    pub idle_secs: u64,
    pub command_count: u64,
    pub error_count: u32,
    pub avg_command_ms: u64,
}

#[derive(Debug)]
struct ConnectionInfo {
    state: ConnectionState,
    metrics: ConnectionMetrics,
}

pub(crate) struct PooledConnection {
    pub(crate) id: u64,
    session: tokio::sync::Mutex<Option<Box<dyn Session>>>,
    info: Mutex<ConnectionInfo>,
    in_flight: AtomicUsize,
}

/// A connection handed out by the pool. Counts as in flight until dropped.
pub(crate) struct ConnectionLease(Arc<PooledConnection>);

impl Deref for ConnectionLease {
    type Target = PooledConnection;

    fn deref(&self) -> &PooledConnection {
        &self.0
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl PooledConnection {
    pub(crate) fn new(id: u64, session: Box<dyn Session>) -> Self {
        Self {
            id,
            session: tokio::sync::Mutex::new(Some(session)),
            info: Mutex::new(ConnectionInfo {
                state: ConnectionState::Active,
                metrics: ConnectionMetrics::new(Instant::now()),
            }),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Reserves the connection for one command. Must be taken while the pool
    /// lock is held so concurrent callers see it as busy.
    pub(crate) fn lease(self: &Arc<Self>) -> ConnectionLease {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        ConnectionLease(self.clone())
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn summary(&self) -> ConnectionSummary {
        self.with_info(|i| ConnectionSummary {
            id: self.id,
            state: i.state,
            in_flight: self.in_flight(),
            age_secs: i.metrics.age().as_secs(),
            idle_secs: i.metrics.idle_time().as_secs(),
            command_count: i.metrics.command_count,
            error_count: i.metrics.error_count,
            avg_command_ms: i.metrics.avg_command_time().as_millis() as u64,
        })
    }

    fn with_info<R>(&self, f: impl FnOnce(&mut ConnectionInfo) -> R) -> R {
        let mut guard = match self.info.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.with_info(|i| i.state)
    }

    pub(crate) fn metrics(&self) -> ConnectionMetrics {
        self.with_info(|i| i.metrics.clone())
    }

    /// Marks the connection disconnected when the underlying session has gone away
    /// (e.g. keepalive failure). Busy sessions are left alone.
    pub(crate) fn refresh_liveness(&self) {
        if let Ok(guard) = self.session.try_lock()
            && guard.as_ref().is_none_or(|s| s.is_closed())
        {
            self.with_info(|i| {
                if i.state == ConnectionState::Active {
                    i.state = ConnectionState::Disconnected;
                }
            });
        }
    }

    pub(crate) fn is_healthy(&self) -> bool {
        self.with_info(|i| {
            i.state == ConnectionState::Active && i.metrics.error_count < MAX_CONNECTION_ERRORS
        })
    }

    pub(crate) fn is_reusable(&self, max_age: Duration) -> bool {
        self.is_healthy()
            && self.with_info(|i| {
                i.metrics.age() < max_age && i.metrics.error_count < MAX_REUSE_ERRORS
            })
    }

    /// Runs one command. Timeouts and transport failures poison the connection;
    /// a command that exits non-zero does not.
    pub(crate) async fn execute(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, UnraidError> {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut() else {
            self.with_info(|i| i.state = ConnectionState::Disconnected);
            return Err(UnraidError::connection("connection is not established"));
        };

        let started = Instant::now();
        self.with_info(|i| {
            i.metrics.last_used = started;
            i.metrics.command_count += 1;
        });

        let result = match tokio::time::timeout(timeout, session.exec(command)).await {
            Ok(r) => r,
            Err(_) => Err(UnraidError::Timeout {
                command: command_preview(command),
                secs: timeout.as_secs(),
            }),
        };

        match result {
            Ok(output) => {
                self.with_info(|i| i.metrics.total_command_time += started.elapsed());
                Ok(output)
            }
            Err(e) => {
                let poisoned = e.is_transport();
                self.with_info(|i| {
                    i.metrics.error_count += 1;
                    if poisoned {
                        i.state = ConnectionState::Error;
                    }
                });
                if poisoned && let Some(mut session) = guard.take() {
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, session.close()).await;
                }
                tracing::debug!(
                    connection_id = self.id,
                    error = %e,
                    command = %command_preview(command),
                    "Command failed on pooled connection"
                );
                Err(e)
            }
        }
    }

    pub(crate) async fn disconnect(&self) {
        self.with_info(|i| i.state = ConnectionState::Disconnecting);
        let mut guard = self.session.lock().await;
        if let Some(mut session) = guard.take() {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, session.close()).await;
        }
        self.with_info(|i| i.state = ConnectionState::Disconnected);
    }
}
