// Polling coordinator: one SSH collection cycle per interval, published to watchers,
// WebSocket clients and the history writer task.

use crate::error::UnraidError;
use crate::history_repo::HistoryRepo;
use crate::models::{DiskInfo, UnraidSnapshot, UsageStats, ZfsPool};
use crate::network_rate::NetworkRateTracker;
use crate::parsers::system::format_duration;
use crate::pool::ConnectionPool;
use crate::unraid_repo::UnraidRepo;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, broadcast, mpsc, oneshot, watch};
use tokio::time::{Duration, Instant, interval};
use tracing::Instrument;

/// Consecutive failures before the retry delay replaces the normal interval.
pub const MAX_FAILED_UPDATE_COUNT: u32 = 3;
pub const UPDATE_FAILED_RETRY_DELAY: Duration = Duration::from_secs(30);
pub const MAX_UPDATE_METRICS_HISTORY: usize = 10;

/// Rate limit for "no receivers" logging (avoid logging every cycle when no one is on /ws/snapshot)
const NO_RECEIVERS_WARN_INTERVAL: Duration = Duration::from_secs(60);

/// Channel capacity for snapshot writer (backpressure if writer falls behind).
pub fn writer_channel_capacity(flush_rate: u64) -> usize {
    (flush_rate as usize * 2).max(32)
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, operation = "get_timestamp", "system time error");
            0
        })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMetrics {
    pub started_at: u64,
    pub duration_ms: u64,
    pub success: bool,
    pub disk_update: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorMetrics {
    pub update_count: u64,
    pub failed_update_count: u64,
    pub consecutive_failures: u32,
    pub last_success: Option<u64>,
    pub last_error: Option<String>,
    pub recent_updates: VecDeque<UpdateMetrics>,
}

impl CoordinatorMetrics {
    fn record(&mut self, m: UpdateMetrics, error: Option<&UnraidError>) {
        self.update_count += 1;
        match error {
            None => {
                self.consecutive_failures = 0;
                self.last_success = Some(m.started_at);
                self.last_error = None;
            }
            Some(e) => {
                self.failed_update_count += 1;
                self.consecutive_failures += 1;
                self.last_error = Some(e.to_string());
            }
        }
        self.recent_updates.push_back(m);
        while self.recent_updates.len() > MAX_UPDATE_METRICS_HISTORY {
            self.recent_updates.pop_front();
        }
    }
}

/// Read side of the coordinator shared with the HTTP layer.
#[derive(Clone)]
pub struct CoordinatorHandle {
    snapshot_rx: watch::Receiver<Option<UnraidSnapshot>>,
    force_update: Arc<Notify>,
    metrics: Arc<Mutex<CoordinatorMetrics>>,
}

impl CoordinatorHandle {
    /// New handle plus the sender the coordinator publishes into.
    pub fn new() -> (Self, watch::Sender<Option<UnraidSnapshot>>) {
        let (tx, rx) = watch::channel(None);
        let handle = Self {
            snapshot_rx: rx,
            force_update: Arc::new(Notify::new()),
            metrics: Arc::new(Mutex::new(CoordinatorMetrics::default())),
        };
        (handle, tx)
    }

    /// Latest published snapshot; None until the first successful cycle.
    pub fn latest(&self) -> Option<UnraidSnapshot> {
        self.snapshot_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<UnraidSnapshot>> {
        self.snapshot_rx.clone()
    }

    /// Wakes the coordinator for an immediate cycle.
    pub fn request_update(&self) {
        self.force_update.notify_one();
    }

    pub fn metrics(&self) -> CoordinatorMetrics {
        self.with_metrics(|m| m.clone())
    }

    fn with_metrics<R>(&self, f: impl FnOnce(&mut CoordinatorMetrics) -> R) -> R {
        let mut guard = match self.metrics.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

/// Disk data kept between disk refreshes.
#[derive(Default)]
struct DiskData {
    disks: Vec<DiskInfo>,
    zfs_pools: Vec<ZfsPool>,
    array_usage: Option<UsageStats>,
}

/// Builds snapshots. Holds the state that spans cycles: rate smoothers and the
/// last disk refresh.
pub struct SnapshotCollector {
    repo: Arc<UnraidRepo>,
    has_ups: bool,
    disk_interval: Duration,
    rates: NetworkRateTracker,
    last_disk_update: Option<Instant>,
    disk_data: DiskData,
}

impl SnapshotCollector {
    pub fn new(repo: Arc<UnraidRepo>, has_ups: bool, disk_interval: Duration) -> Self {
        Self {
            repo,
            has_ups,
            disk_interval,
            rates: NetworkRateTracker::new(),
            last_disk_update: None,
            disk_data: DiskData::default(),
        }
    }

    fn disk_update_due(&self, now: Instant) -> bool {
        self.last_disk_update
            .is_none_or(|t| now.duration_since(t) >= self.disk_interval)
    }

    /// One full cycle. Individual reads degrade to defaults; only an unreachable
    /// server fails the cycle. The bool reports whether disks were refreshed.
    pub async fn collect(&mut self) -> Result<(UnraidSnapshot, bool), UnraidError> {
        let repo = self.repo.clone();
        repo.ping().await?;
        let timestamp = now_ms();

        let (cpu, memory, uptime_secs, array, boot, cache, log, docker_vdisk, temperatures) = tokio::join!(
            repo.get_cpu_stats(),
            repo.get_memory_stats(),
            repo.get_uptime(),
            repo.get_array_state(),
            repo.get_boot_usage(),
            repo.get_cache_usage(),
            repo.get_log_usage(),
            repo.get_docker_vdisk_usage(),
            repo.get_temperatures(),
        );
        let mut cpu = cpu;
        cpu.temperature = temperatures.cpu;

        let ((docker_running, containers), (libvirt_running, vms), user_scripts) = tokio::join!(
            async {
                if repo.check_docker_running().await {
                    (true, repo.get_docker_containers().await)
                } else {
                    (false, Vec::new())
                }
            },
            async {
                if repo.check_libvirt_running().await {
                    (true, repo.get_vms().await)
                } else {
                    (false, Vec::new())
                }
            },
            repo.get_user_scripts(),
        );

        let now = Instant::now();
        let disk_update = self.disk_update_due(now);
        if disk_update {
            let (inventory, array_usage) =
                tokio::join!(repo.get_disk_inventory(), repo.get_array_usage(&array));
            self.disk_data = DiskData {
                disks: inventory.disks,
                zfs_pools: inventory.zfs_pools,
                array_usage,
            };
            self.last_disk_update = Some(now);
            tracing::debug!(disks = self.disk_data.disks.len(), "Disk data refreshed");
        }

        let mut network = repo.get_network_interfaces().await;
        self.rates.apply(&mut network, std::time::Instant::now());

        let ups = if self.has_ups {
            repo.get_ups_info().await
        } else {
            None
        };

        let disk_config = repo.get_disk_config().await;
        let parity = repo.get_parity_status(&disk_config).await;

        let snapshot = UnraidSnapshot {
            timestamp,
            cpu,
            memory,
            uptime_secs,
            array,
            array_usage: self.disk_data.array_usage.clone(),
            disks: self.disk_data.disks.clone(),
            zfs_pools: self.disk_data.zfs_pools.clone(),
            cache,
            boot,
            log,
            docker_vdisk,
            temperatures,
            network,
            docker_running,
            containers,
            libvirt_running,
            vms,
            user_scripts,
            ups,
            parity,
        };
        Ok((snapshot, disk_update))
    }
}

/// Repos, channels, and shutdown for the coordinator.
pub struct CoordinatorDeps {
    pub repo: Arc<UnraidRepo>,
    pub pool: Arc<ConnectionPool>,
    pub history_repo: Arc<HistoryRepo>,
    pub handle: CoordinatorHandle,
    pub snapshot_tx: watch::Sender<Option<UnraidSnapshot>>,
    pub tx: broadcast::Sender<UnraidSnapshot>,
    pub write_tx: mpsc::Sender<UnraidSnapshot>,
    pub ws_connections: Arc<AtomicUsize>,
    pub snapshots_saved_total: Arc<AtomicU64>,
    pub shutdown_rx: oneshot::Receiver<()>,
}

/// Coordinator timing and logging config.
/// Stats logging and pruning use real-time intervals, independent of the polling interval.
pub struct CoordinatorConfig {
    pub update_interval: Duration,
    pub disk_interval: Duration,
    pub has_ups: bool,
    /// How often to log app stats (real seconds).
    pub stats_log_interval_secs: u64,
    /// How often to prune old data (real seconds).
    pub prune_interval_secs: u64,
}

/// Writer config: batching for the dedicated history writer task.
pub struct HistoryWriterConfig {
    pub flush_rate: u64,
    pub flush_interval_secs: u64,
}

/// Spawns the background task that receives snapshots from the coordinator and flushes to the DB.
/// Flushes when buffer len >= flush_rate, or every flush_interval_secs, or when channel closes.
/// When the coordinator drops its sender, this task flushes remaining and exits.
pub fn spawn_history_writer(
    mut write_rx: mpsc::Receiver<UnraidSnapshot>,
    history_repo: Arc<HistoryRepo>,
    config: HistoryWriterConfig,
    snapshots_saved_total: Arc<AtomicU64>,
) -> tokio::task::JoinHandle<()> {
    let flush_interval = Duration::from_secs(config.flush_interval_secs);
    tokio::spawn(async move {
        let mut buffer: Vec<UnraidSnapshot> = Vec::new();
        let mut flush_tick = interval(flush_interval);
        flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                result = write_rx.recv() => {
                    match result {
                        Some(snapshot) => {
                            buffer.push(snapshot);
                            if buffer.len() >= config.flush_rate as usize
                                && let Err(e) = flush_buffer(&history_repo, &mut buffer, &snapshots_saved_total).await
                            {
                                tracing::warn!(error = %e, "history writer: save_snapshots failed");
                            }
                        }
                        None => break,
                    }
                }
                _ = flush_tick.tick() => {
                    if let Err(e) = flush_buffer(&history_repo, &mut buffer, &snapshots_saved_total).await {
                        tracing::warn!(error = %e, "history writer: save_snapshots failed");
                    }
                }
            }
        }
        if let Err(e) = flush_buffer(&history_repo, &mut buffer, &snapshots_saved_total).await {
            tracing::warn!(error = %e, "history writer: final flush failed");
        }
        tracing::debug!("History writer shutting down");
    })
}

async fn flush_buffer(
    history_repo: &HistoryRepo,
    buffer: &mut Vec<UnraidSnapshot>,
    snapshots_saved_total: &AtomicU64,
) -> anyhow::Result<()> {
    if buffer.is_empty() {
        return Ok(());
    }
    let n = buffer.len();
    history_repo.save_snapshots(buffer).await?;
    snapshots_saved_total.fetch_add(n as u64, Ordering::Relaxed);
    buffer.clear();
    tracing::debug!(
        operation = "save_snapshots",
        snapshots_count = n,
        "Snapshots saved"
    );
    Ok(())
}

struct Publisher {
    handle: CoordinatorHandle,
    snapshot_tx: watch::Sender<Option<UnraidSnapshot>>,
    tx: broadcast::Sender<UnraidSnapshot>,
    write_tx: mpsc::Sender<UnraidSnapshot>,
    update_interval: Duration,
    last_no_receivers_warn: Option<Instant>,
}

impl Publisher {
    /// Runs one cycle, publishes the result and returns the delay until the next one.
    async fn update(&mut self, collector: &mut SnapshotCollector) -> Duration {
        let started_at = now_ms();
        let started = Instant::now();
        let result = collector.collect().await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok((snapshot, disk_update)) => {
                self.handle.with_metrics(|m| {
                    m.record(
                        UpdateMetrics {
                            started_at,
                            duration_ms,
                            success: true,
                            disk_update,
                        },
                        None,
                    )
                });
                let containers_running = snapshot
                    .containers
                    .iter()
                    .filter(|c| c.state.is_running())
                    .count();
                let vms_running = snapshot.vms.iter().filter(|v| v.state.is_running()).count();
                tracing::debug!(
                    duration_ms,
                    disk_update,
                    uptime = %format_duration(snapshot.uptime_secs),
                    containers = snapshot.containers.len(),
                    containers_running,
                    vms = snapshot.vms.len(),
                    vms_running,
                    "Update cycle completed"
                );
                self.publish(snapshot).await;
                self.update_interval
            }
            Err(e) => {
                let failures = self.handle.with_metrics(|m| {
                    m.record(
                        UpdateMetrics {
                            started_at,
                            duration_ms,
                            success: false,
                            disk_update: false,
                        },
                        Some(&e),
                    );
                    m.consecutive_failures
                });
                if failures >= MAX_FAILED_UPDATE_COUNT {
                    tracing::warn!(
                        error = %e,
                        consecutive_failures = failures,
                        retry_in_secs = UPDATE_FAILED_RETRY_DELAY.as_secs(),
                        "Repeated update failures, retrying sooner"
                    );
                    UPDATE_FAILED_RETRY_DELAY
                } else {
                    tracing::warn!(
                        error = %e,
                        consecutive_failures = failures,
                        operation = "update",
                        "Update cycle failed"
                    );
                    self.update_interval
                }
            }
        }
    }

    async fn publish(&mut self, snapshot: UnraidSnapshot) {
        self.snapshot_tx.send_replace(Some(snapshot.clone()));
        if self.tx.send(snapshot.clone()).is_err() {
            let should_warn = self
                .last_no_receivers_warn
                .is_none_or(|t| t.elapsed() >= NO_RECEIVERS_WARN_INTERVAL);
            if should_warn {
                tracing::debug!(
                    operation = "broadcast_snapshot",
                    "No active WebSocket clients; broadcast channel has no receivers"
                );
                self.last_no_receivers_warn = Some(Instant::now());
            }
        }
        if self.write_tx.send(snapshot).await.is_err() {
            tracing::debug!("History writer channel closed");
        }
    }
}

pub fn spawn(deps: CoordinatorDeps, config: CoordinatorConfig) -> tokio::task::JoinHandle<()> {
    let CoordinatorDeps {
        repo,
        pool,
        history_repo,
        handle,
        snapshot_tx,
        tx,
        write_tx,
        ws_connections,
        snapshots_saved_total,
        mut shutdown_rx,
    } = deps;
    let CoordinatorConfig {
        update_interval,
        disk_interval,
        has_ups,
        stats_log_interval_secs,
        prune_interval_secs,
    } = config;

    let stats_log_interval = Duration::from_secs(stats_log_interval_secs);
    let prune_interval = Duration::from_secs(prune_interval_secs);

    let span = tracing::span!(
        tracing::Level::DEBUG,
        "coordinator",
        update_interval_secs = update_interval.as_secs()
    );

    let task = async move {
        let mut collector = SnapshotCollector::new(repo.clone(), has_ups, disk_interval);
        let force_update = handle.force_update.clone();
        let mut publisher = Publisher {
            handle,
            snapshot_tx,
            tx,
            write_tx,
            update_interval,
            last_no_receivers_warn: None,
        };

        let next_cycle = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(next_cycle);
        let mut stats_log_tick = interval(stats_log_interval);
        stats_log_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut prune_tick = interval(prune_interval);
        prune_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut rows_pruned_total: u64 = 0;

        loop {
            tokio::select! {
                _ = &mut next_cycle => {
                    let delay = publisher.update(&mut collector).await;
                    next_cycle.as_mut().reset(Instant::now() + delay);
                }
                _ = force_update.notified() => {
                    tracing::info!("Forced update requested");
                    let delay = publisher.update(&mut collector).await;
                    next_cycle.as_mut().reset(Instant::now() + delay);
                }
                _ = &mut shutdown_rx => {
                    tracing::debug!("Coordinator shutting down");
                    break;
                }
                _ = stats_log_tick.tick() => {
                    let pool_metrics = pool.metrics().await;
                    let cache_stats = repo.cache().stats();
                    let metrics = publisher.handle.metrics();
                    tracing::info!(
                        ws_clients = ws_connections.load(Ordering::Relaxed),
                        snapshots_saved_total = snapshots_saved_total.load(Ordering::Relaxed),
                        rows_pruned_total,
                        updates = metrics.update_count,
                        failed_updates = metrics.failed_update_count,
                        ssh_connections = pool_metrics.pool_size,
                        ssh_error_rate = pool_metrics.error_rate,
                        circuit_open = pool_metrics.circuit_breaker_open,
                        cache_items = cache_stats.item_count,
                        cache_hit_rate = cache_stats.hit_rate_percent,
                        "app stats"
                    );
                }
                _ = prune_tick.tick() => {
                    match history_repo.prune_old_data().await {
                        Ok(removed) => {
                            tracing::debug!(operation = "prune_old_data", removed, "Old data pruned");
                            rows_pruned_total += removed;
                            if removed > 0
                                && let Err(e) = history_repo.vacuum().await
                            {
                                tracing::warn!(error = %e, operation = "vacuum", "Vacuum failed");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                error = %e,
                                operation = "prune_old_data",
                                "Failed to prune old data"
                            );
                        }
                    }
                }
            }
        }

        // Dropping the publisher closes the writer channel so it flushes and exits.
        drop(publisher);
        pool.shutdown().await;
    };
    tokio::spawn(task.instrument(span))
}
