// Coordinator tests: snapshot collection, publishing, history writer and shutdown

mod common;

use common::{FakeHost, sample_snapshot, test_pool, test_repo};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Duration;
use unraid_monitor::coordinator::{self, CoordinatorHandle, SnapshotCollector};
use unraid_monitor::history_repo::HistoryRepo;
use unraid_monitor::models::ContainerState;

const DISK_BATCH_MARKER: &str = "===DISK_USAGE===";

fn healthy_host() -> FakeHost {
    FakeHost::new()
        .on(DISK_BATCH_MARKER, "===DISK_USAGE===\n")
        .on(
            "cat /proc/meminfo",
            "MemTotal: 16384 kB\nMemFree: 4096 kB\nMemAvailable: 8192 kB\nBuffers: 0 kB\nCached: 1024 kB\n",
        )
        .on("cat /proc/uptime", "3600.52 7200.00\n")
        .on("mdcmd status", "mdState=STARTED\nmdNumDisks=3\n")
        .on("nproc", "8\n")
        .on("pgrep -f dockerd", "1234\n")
        .on("docker.sock", "")
        .on("docker ps -a", "abc|plex|Up 2 hours|plexinc/pms\n")
        .on(
            "apcaccess",
            "STATUS   : ONLINE\nMODEL    : Back-UPS 950\nBCHARGE  : 100.0 Percent\n",
        )
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for condition"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn collector_builds_snapshot_from_host() {
    let host = healthy_host();
    let repo = test_repo(test_pool(&host));
    let mut collector = SnapshotCollector::new(repo, false, Duration::from_secs(3600));

    let (snapshot, disk_update) = collector.collect().await.unwrap();
    assert!(disk_update);
    assert!(snapshot.timestamp > 0);
    assert_eq!(snapshot.memory.total, 16384 * 1024);
    assert_eq!(snapshot.uptime_secs, 3600);
    assert_eq!(snapshot.cpu.cores, 8);
    assert_eq!(snapshot.array.state, "STARTED");
    assert_eq!(snapshot.array.num_disks, 3);
    assert!(snapshot.docker_running);
    assert_eq!(snapshot.containers.len(), 1);
    assert_eq!(snapshot.containers[0].state, ContainerState::Running);
    assert!(!snapshot.libvirt_running);
    assert!(snapshot.vms.is_empty());
    assert!(snapshot.ups.is_none());
    assert_eq!(host.calls_matching("apcaccess"), 0);
}

#[tokio::test]
async fn collector_refreshes_disks_on_their_own_interval() {
    let host = healthy_host();
    let repo = test_repo(test_pool(&host));
    let mut collector = SnapshotCollector::new(repo.clone(), false, Duration::from_secs(3600));

    let (_, first) = collector.collect().await.unwrap();
    let (_, second) = collector.collect().await.unwrap();
    assert!(first);
    assert!(!second);
    assert_eq!(host.calls_matching(DISK_BATCH_MARKER), 1);

    let mut eager = SnapshotCollector::new(repo, false, Duration::ZERO);
    let (_, a) = eager.collect().await.unwrap();
    let (_, b) = eager.collect().await.unwrap();
    assert!(a && b);
    assert_eq!(host.calls_matching(DISK_BATCH_MARKER), 3);
}

#[tokio::test]
async fn collector_reads_ups_when_configured() {
    let host = healthy_host();
    let repo = test_repo(test_pool(&host));
    let mut collector = SnapshotCollector::new(repo, true, Duration::from_secs(3600));

    let (snapshot, _) = collector.collect().await.unwrap();
    let ups = snapshot.ups.expect("ups info");
    assert_eq!(ups.status, "ONLINE");
    assert_eq!(ups.battery_charge_percent, Some(100.0));
}

#[tokio::test]
async fn collector_fails_when_server_unreachable() {
    let host = healthy_host();
    host.set_down(true);
    let repo = test_repo(test_pool(&host));
    let mut collector = SnapshotCollector::new(repo, false, Duration::from_secs(3600));

    let err = collector.collect().await.unwrap_err();
    assert!(err.is_transport());
    assert_eq!(host.calls_matching("cat /proc/meminfo"), 0);
}

struct Running {
    handle: CoordinatorHandle,
    tx: broadcast::Sender<unraid_monitor::models::UnraidSnapshot>,
    history_repo: Arc<HistoryRepo>,
    saved_total: Arc<AtomicU64>,
    shutdown_tx: oneshot::Sender<()>,
    coordinator: tokio::task::JoinHandle<()>,
    writer: tokio::task::JoinHandle<()>,
    _dir: TempDir,
}

async fn start(host: &FakeHost) -> Running {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("history.db");
    let history_repo = Arc::new(HistoryRepo::connect(path.to_str().unwrap(), 3).await.unwrap());
    history_repo.init().await.unwrap();

    let pool = test_pool(host);
    let repo = test_repo(pool.clone());
    let (tx, _) = broadcast::channel(16);
    let (write_tx, write_rx) = mpsc::channel(coordinator::writer_channel_capacity(10));
    let saved_total = Arc::new(AtomicU64::new(0));
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let (handle, snapshot_tx) = CoordinatorHandle::new();

    let writer = coordinator::spawn_history_writer(
        write_rx,
        history_repo.clone(),
        coordinator::HistoryWriterConfig {
            flush_rate: 10,
            flush_interval_secs: 3600,
        },
        saved_total.clone(),
    );
    let coordinator = coordinator::spawn(
        coordinator::CoordinatorDeps {
            repo,
            pool,
            history_repo: history_repo.clone(),
            handle: handle.clone(),
            snapshot_tx,
            tx: tx.clone(),
            write_tx,
            ws_connections: Arc::new(AtomicUsize::new(0)),
            snapshots_saved_total: saved_total.clone(),
            shutdown_rx,
        },
        coordinator::CoordinatorConfig {
            update_interval: Duration::from_secs(300),
            disk_interval: Duration::from_secs(3600),
            has_ups: false,
            stats_log_interval_secs: 3600,
            prune_interval_secs: 3600,
        },
    );
    Running {
        handle,
        tx,
        history_repo,
        saved_total,
        shutdown_tx,
        coordinator,
        writer,
        _dir: dir,
    }
}

#[tokio::test]
async fn coordinator_publishes_and_flushes_on_shutdown() {
    let host = healthy_host();
    let running = start(&host).await;
    let mut rx = running.tx.subscribe();

    let handle = running.handle.clone();
    wait_until(|| handle.latest().is_some()).await;
    let first = handle.latest().unwrap();
    assert_eq!(first.containers[0].name, "plex");
    assert_eq!(handle.metrics().update_count, 1);
    assert_eq!(handle.metrics().consecutive_failures, 0);
    assert!(handle.metrics().last_success.is_some());

    handle.request_update();
    let broadcast = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("broadcast in time")
        .unwrap();
    assert_eq!(broadcast.cpu.cores, 8);
    wait_until(|| handle.metrics().update_count == 2).await;
    assert_eq!(handle.metrics().recent_updates.len(), 2);

    // Below flush_rate: nothing written until shutdown.
    assert_eq!(running.history_repo.count_snapshots().await.unwrap(), 0);

    running.shutdown_tx.send(()).unwrap();
    running.coordinator.await.unwrap();
    running.writer.await.unwrap();
    assert_eq!(running.history_repo.count_snapshots().await.unwrap(), 2);
    assert_eq!(running.saved_total.load(Ordering::Relaxed), 2);
}

#[tokio::test]
async fn coordinator_records_failed_cycles() {
    let host = healthy_host();
    host.set_down(true);
    let running = start(&host).await;

    let handle = running.handle.clone();
    wait_until(|| handle.metrics().failed_update_count == 1).await;
    let metrics = handle.metrics();
    assert_eq!(metrics.consecutive_failures, 1);
    assert!(metrics.last_error.is_some());
    assert!(metrics.last_success.is_none());
    assert!(handle.latest().is_none());

    // Server comes back; a forced cycle succeeds and resets the streak.
    host.set_down(false);
    handle.request_update();
    wait_until(|| handle.latest().is_some()).await;
    assert_eq!(handle.metrics().consecutive_failures, 0);

    running.shutdown_tx.send(()).unwrap();
    running.coordinator.await.unwrap();
    running.writer.await.unwrap();
    assert_eq!(running.history_repo.count_snapshots().await.unwrap(), 1);
}

#[tokio::test]
async fn history_writer_flushes_at_flush_rate() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("history.db");
    let history_repo = Arc::new(HistoryRepo::connect(path.to_str().unwrap(), 3).await.unwrap());
    history_repo.init().await.unwrap();

    let (write_tx, write_rx) = mpsc::channel(8);
    let saved_total = Arc::new(AtomicU64::new(0));
    let writer = coordinator::spawn_history_writer(
        write_rx,
        history_repo.clone(),
        coordinator::HistoryWriterConfig {
            flush_rate: 2,
            flush_interval_secs: 3600,
        },
        saved_total.clone(),
    );

    write_tx.send(sample_snapshot(1000)).await.unwrap();
    write_tx.send(sample_snapshot(2000)).await.unwrap();
    let total = saved_total.clone();
    wait_until(|| total.load(Ordering::Relaxed) == 2).await;

    write_tx.send(sample_snapshot(3000)).await.unwrap();
    drop(write_tx);
    writer.await.unwrap();
    assert_eq!(saved_total.load(Ordering::Relaxed), 3);
    let recent = history_repo.get_recent_snapshots(10).await.unwrap();
    let timestamps: Vec<u64> = recent.iter().map(|s| s.timestamp).collect();
    assert_eq!(timestamps, vec![1000, 2000, 3000]);
}
