// Integration tests: HTTP, service and WebSocket endpoints against a scripted host

mod common;

use axum::http::StatusCode;
use axum_test::TestServer;
use common::{FakeHost, sample_server_info, sample_snapshot, test_pool, test_repo};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tempfile::TempDir;
use tokio::sync::{broadcast, watch};
use unraid_monitor::config::AppConfig;
use unraid_monitor::coordinator::CoordinatorHandle;
use unraid_monitor::history_repo::HistoryRepo;
use unraid_monitor::models::UnraidSnapshot;
use unraid_monitor::routes::{self, AppState};

struct TestApp {
    app: axum::Router,
    host: FakeHost,
    tx: broadcast::Sender<UnraidSnapshot>,
    snapshot_tx: watch::Sender<Option<UnraidSnapshot>>,
    coordinator: CoordinatorHandle,
    history_repo: Arc<HistoryRepo>,
    _dir: TempDir,
}

async fn test_app(host: FakeHost) -> TestApp {
    let config = AppConfig::load_from_str(common::TEST_CONFIG).unwrap();
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join(&config.database.path);
    let history_repo = Arc::new(
        HistoryRepo::connect(db_path.to_str().unwrap(), config.database.retention_days)
            .await
            .unwrap(),
    );
    history_repo.init().await.unwrap();

    let pool = test_pool(&host);
    let repo = test_repo(pool.clone());
    let (tx, _) = broadcast::channel(config.publishing.broadcast_capacity);
    let (coordinator, snapshot_tx) = CoordinatorHandle::new();
    let app = routes::app(AppState {
        snapshot_tx: tx.clone(),
        coordinator: coordinator.clone(),
        repo,
        pool,
        history_repo: history_repo.clone(),
        server_info: Arc::new(sample_server_info()),
        ws_connections: Arc::new(AtomicUsize::new(0)),
    });
    TestApp {
        app,
        host,
        tx,
        snapshot_tx,
        coordinator,
        history_repo,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_root_endpoint() {
    let t = test_app(FakeHost::new()).await;
    let server = TestServer::new(t.app).unwrap();
    let response = server.get("/").await;
    response.assert_status_ok();
    response.assert_text("Unraid monitor is running");
}

#[tokio::test]
async fn test_version_endpoint() {
    let t = test_app(FakeHost::new()).await;
    let server = TestServer::new(t.app).unwrap();
    let response = server.get("/version").await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    assert_eq!(
        json.get("name").and_then(|v| v.as_str()),
        Some("unraid-monitor")
    );
    assert!(json.get("version").and_then(|v| v.as_str()).is_some());
}

#[tokio::test]
async fn test_info_endpoint() {
    let t = test_app(FakeHost::new()).await;
    let server = TestServer::new(t.app).unwrap();
    let response = server.get("/api/info").await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    assert_eq!(json["hostname"], "tower");
    assert_eq!(json["cpuCores"], 12);
}

#[tokio::test]
async fn test_snapshot_unavailable_until_first_cycle() {
    let t = test_app(FakeHost::new()).await;
    let server = TestServer::new(t.app).unwrap();

    let response = server.get("/api/snapshot").await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);

    t.snapshot_tx.send_replace(Some(sample_snapshot(42)));
    let response = server.get("/api/snapshot").await;
    response.assert_status_ok();
    let snapshot: UnraidSnapshot = response.json();
    assert_eq!(snapshot.timestamp, 42);
    assert_eq!(snapshot.containers[0].name, "plex");
}

#[tokio::test]
async fn test_history_endpoint_limit_and_range() {
    let t = test_app(FakeHost::new()).await;
    t.history_repo
        .save_snapshots(&[
            sample_snapshot(1000),
            sample_snapshot(2000),
            sample_snapshot(3000),
        ])
        .await
        .unwrap();
    let server = TestServer::new(t.app).unwrap();

    let all: Vec<UnraidSnapshot> = server.get("/api/history").await.json();
    assert_eq!(all.len(), 3);

    let last: Vec<UnraidSnapshot> = server
        .get("/api/history")
        .add_query_param("limit", 1)
        .await
        .json();
    assert_eq!(last.len(), 1);
    assert_eq!(last[0].timestamp, 3000);

    let range: Vec<UnraidSnapshot> = server
        .get("/api/history")
        .add_query_param("from", 1000)
        .add_query_param("to", 3000)
        .await
        .json();
    let timestamps: Vec<u64> = range.iter().map(|s| s.timestamp).collect();
    assert_eq!(timestamps, vec![1000, 2000]);

    let response = server
        .get("/api/history")
        .add_query_param("from", 3000)
        .add_query_param("to", 1000)
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let t = test_app(FakeHost::new().on("uptime", "up 3 days\n")).await;
    let server = TestServer::new(t.app).unwrap();
    server
        .post("/api/services/execute_command")
        .json(&json!({ "command": "uptime" }))
        .await
        .assert_status_ok();

    let json: serde_json::Value = server.get("/api/metrics").await.json();
    assert_eq!(json["pool"]["totalCommands"], 1);
    assert_eq!(json["pool"]["circuitBreakerOpen"], false);
    assert_eq!(json["pool"]["busyConnections"], 0);
    assert_eq!(json["pool"]["connections"][0]["commandCount"], 1);
    assert_eq!(json["pool"]["connections"][0]["state"], "active");
    assert!(json["cache"].is_object());
    assert_eq!(json["coordinator"]["updateCount"], 0);
    assert_eq!(json["wsClients"], 0);
}

#[tokio::test]
async fn test_live_disk_and_zfs_endpoints() {
    let host = FakeHost::new()
        .on(
            "===DISK_USAGE===",
            "===DISK_USAGE===\n\
Filesystem 1-blocks Used Available Capacity Mounted on\n\
/dev/md1p1 4000 1000 3000 25% /mnt/disk1\n\
===MOUNT_INFO===\n\
/dev/md1p1 /mnt/disk1 xfs\n",
        )
        .on("mdcmd status", "diskName.1=md1\nrdevName.1=sdc\n")
        .on_exit("smartctl -n standby", 2)
        .on("zpool list -H", "tank\t1.81T\t500G\t1.32T\t27%\tONLINE\n");
    let t = test_app(host).await;
    let server = TestServer::new(t.app).unwrap();

    let disks: serde_json::Value = server.get("/api/disks").await.json();
    assert_eq!(disks[0]["name"], "disk1");
    assert_eq!(disks[0]["device"], "/dev/sdc");
    assert_eq!(disks[0]["state"], "standby");
    assert_eq!(t.host.calls_matching("smartctl -a"), 0);

    let pools: serde_json::Value = server.get("/api/zfs/pools").await.json();
    assert_eq!(pools[0]["name"], "tank");
    assert_eq!(pools[0]["health"], "ONLINE");
}

#[tokio::test]
async fn test_execute_command_returns_output() {
    let host = FakeHost::new()
        .on("uptime", " 10:00:00 up 3 days\n")
        .on_exit("false", 1);
    let t = test_app(host).await;
    let server = TestServer::new(t.app).unwrap();

    let response = server
        .post("/api/services/execute_command")
        .json(&json!({ "command": "uptime", "timeout": 10 }))
        .await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    assert_eq!(json["success"], true);
    assert_eq!(json["exit_status"], 0);
    assert!(json["stdout"].as_str().unwrap().contains("up 3 days"));

    // A non-zero exit is still a completed call.
    let json: serde_json::Value = server
        .post("/api/services/execute_command")
        .json(&json!({ "command": "false" }))
        .await
        .json();
    assert_eq!(json["success"], false);
    assert_eq!(json["exit_status"], 1);
}

#[tokio::test]
async fn test_execute_command_rejects_invalid_input() {
    let t = test_app(FakeHost::new()).await;
    let server = TestServer::new(t.app).unwrap();

    let response = server
        .post("/api/services/execute_command")
        .json(&json!({ "command": "  " }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let json: serde_json::Value = response.json();
    assert_eq!(json["success"], false);

    server
        .post("/api/services/execute_command")
        .json(&json!({ "command": "uptime", "timeout": 0 }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(t.host.calls_matching("uptime"), 0);
}

#[tokio::test]
async fn test_malformed_service_bodies_are_bad_requests() {
    let t = test_app(FakeHost::new()).await;
    let server = TestServer::new(t.app).unwrap();

    let response = server
        .post("/api/services/docker/start")
        .json(&json!({}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let json: serde_json::Value = response.json();
    assert_eq!(json["success"], false);
    assert!(json["error"].as_str().unwrap().contains("container"));

    server
        .post("/api/services/execute_command")
        .json(&json!({ "command": 5 }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    server
        .post("/api/services/vm/start")
        .text("vm=win11")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(t.host.calls_matching("docker"), 0);
    assert_eq!(t.host.calls_matching("virsh"), 0);
}

#[tokio::test]
async fn test_execute_in_container_wraps_command() {
    let host = FakeHost::new().on("docker exec -d plex sh -c", "");
    let t = test_app(host).await;
    let server = TestServer::new(t.app).unwrap();

    server
        .post("/api/services/execute_in_container")
        .json(&json!({ "container": "plex", "command": "touch /tmp/x", "detached": true }))
        .await
        .assert_status_ok();
    assert_eq!(
        t.host
            .calls_matching("docker exec -d plex sh -c 'touch /tmp/x'"),
        1
    );
}

#[tokio::test]
async fn test_docker_action_runs_and_requests_update() {
    let host = FakeHost::new().on("docker start plex", "plex\n");
    let t = test_app(host).await;
    let server = TestServer::new(t.app).unwrap();

    let response = server
        .post("/api/services/docker/start")
        .json(&json!({ "container": "plex" }))
        .await;
    response.assert_status_ok();
    response.assert_json(&json!({ "success": true }));
    assert_eq!(t.host.calls_matching("docker start plex"), 1);

    server
        .post("/api/services/docker/explode")
        .json(&json!({ "container": "plex" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_docker_action_failure_maps_to_bad_gateway() {
    let t = test_app(FakeHost::new()).await;
    let server = TestServer::new(t.app).unwrap();
    let response = server
        .post("/api/services/docker/stop")
        .json(&json!({ "container": "missing" }))
        .await;
    response.assert_status(StatusCode::BAD_GATEWAY);
    let json: serde_json::Value = response.json();
    assert_eq!(json["success"], false);
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn test_vm_pause_requires_running_vm() {
    let host = FakeHost::new()
        .on("virsh domstate", "shut off\n")
        .on("virsh start", "Domain started\n");
    let t = test_app(host).await;
    let server = TestServer::new(t.app).unwrap();

    server
        .post("/api/services/vm/pause")
        .json(&json!({ "vm": "win11" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(t.host.calls_matching("virsh suspend"), 0);

    server
        .post("/api/services/vm/start")
        .json(&json!({ "vm": "win11" }))
        .await
        .assert_status_ok();
    assert_eq!(t.host.calls_matching("virsh start win11"), 1);
}

#[tokio::test]
async fn test_user_script_endpoints() {
    let host = FakeHost::new()
        .on("[ -f /boot/config/plugins/user.scripts/scripts/backup/script ]", "")
        .on("bash /boot/config/plugins/user.scripts/scripts/backup/script", "done\n");
    let t = test_app(host).await;
    let server = TestServer::new(t.app).unwrap();

    let json: serde_json::Value = server
        .post("/api/services/execute_user_script")
        .json(&json!({ "script_name": "backup" }))
        .await
        .json();
    assert_eq!(json["stdout"], "done\n");

    server
        .post("/api/services/execute_user_script")
        .json(&json!({ "script_name": "missing" }))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    server
        .post("/api/services/execute_user_script")
        .json(&json!({ "script_name": "../etc" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    // pkill exits 1 when nothing matched.
    server
        .post("/api/services/stop_user_script")
        .json(&json!({ "script_name": "backup" }))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_power_endpoints() {
    let host = FakeHost::new()
        .on("shutdown -r now", "")
        .on("shutdown +5", "");
    let t = test_app(host).await;
    let server = TestServer::new(t.app).unwrap();

    server
        .post("/api/services/system_reboot")
        .await
        .assert_status_ok();
    assert_eq!(t.host.calls_matching("shutdown -r now"), 1);

    server
        .post("/api/services/system_shutdown")
        .json(&json!({ "delay": 300 }))
        .await
        .assert_status_ok();
    assert_eq!(t.host.calls_matching("shutdown +5"), 1);

    server
        .post("/api/services/system_shutdown")
        .json(&json!({ "delay": 7200 }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_force_update_and_clear_cache() {
    let t = test_app(FakeHost::new()).await;
    let server = TestServer::new(t.app).unwrap();
    server
        .post("/api/services/force_update")
        .await
        .assert_json(&json!({ "success": true }));
    server
        .post("/api/services/clear_cache")
        .await
        .assert_json(&json!({ "success": true }));
    assert_eq!(t.coordinator.metrics().update_count, 0);
}

// --- WebSocket message tests (require http_transport + ws feature) ---
// Receive until we get valid JSON of the wanted shape (server may send Ping first).

async fn receive_first_json_text<T: serde::de::DeserializeOwned>(
    ws: &mut axum_test::TestWebSocket,
) -> T {
    let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(3);
    loop {
        let text = ws.receive_text().await;
        if let Ok(v) = serde_json::from_str::<T>(&text) {
            return v;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for JSON"
        );
    }
}

#[tokio::test]
async fn test_ws_snapshot_sends_welcome_then_broadcasts() {
    let t = test_app(FakeHost::new()).await;
    let server = TestServer::builder()
        .http_transport()
        .build(t.app)
        .unwrap();
    let mut ws = server
        .get_websocket("/ws/snapshot")
        .await
        .into_websocket()
        .await;

    let welcome: serde_json::Value = receive_first_json_text(&mut ws).await;
    assert_eq!(welcome["type"], "info");
    assert_eq!(welcome["serverInfo"]["hostname"], "tower");

    let tx = t.tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        let _ = tx.send(sample_snapshot(42));
    });
    let received: UnraidSnapshot = receive_first_json_text(&mut ws).await;
    assert_eq!(received.timestamp, 42);
    assert_eq!(received.cpu.cores, 8);
}

#[tokio::test]
async fn test_ws_snapshot_sends_latest_on_connect() {
    let t = test_app(FakeHost::new()).await;
    t.snapshot_tx.send_replace(Some(sample_snapshot(7)));
    let server = TestServer::builder()
        .http_transport()
        .build(t.app)
        .unwrap();
    let mut ws = server
        .get_websocket("/ws/snapshot")
        .await
        .into_websocket()
        .await;

    let received: UnraidSnapshot = receive_first_json_text(&mut ws).await;
    assert_eq!(received.timestamp, 7);
}
