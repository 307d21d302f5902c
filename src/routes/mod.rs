// HTTP + WebSocket routes

mod http;
mod services;
mod ws;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

use crate::coordinator::CoordinatorHandle;
use crate::history_repo::HistoryRepo;
use crate::models::{ServerInfo, UnraidSnapshot};
use crate::pool::ConnectionPool;
use crate::unraid_repo::UnraidRepo;

#[derive(Clone)]
pub struct AppState {
    pub snapshot_tx: broadcast::Sender<UnraidSnapshot>,
    pub coordinator: CoordinatorHandle,
    pub repo: Arc<UnraidRepo>,
    pub pool: Arc<ConnectionPool>,
    pub history_repo: Arc<HistoryRepo>,
    pub server_info: Arc<ServerInfo>,
    pub ws_connections: Arc<AtomicUsize>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "Unraid monitor is running" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/info", get(http::api_info_handler)) // GET /api/info
        .route("/api/snapshot", get(http::snapshot_handler)) // GET /api/snapshot
        .route("/api/history", get(http::history_handler)) // GET /api/history
        .route("/api/metrics", get(http::metrics_handler)) // GET /api/metrics
        .route("/api/disks", get(http::disks_handler)) // GET /api/disks
        .route("/api/zfs/pools", get(http::zfs_pools_handler)) // GET /api/zfs/pools
        .route("/ws/snapshot", get(ws::ws_snapshot)) // WS /ws/snapshot
        .route("/api/services/force_update", post(services::force_update))
        .route("/api/services/clear_cache", post(services::clear_cache))
        .route("/api/services/execute_command", post(services::execute_command))
        .route(
            "/api/services/execute_in_container",
            post(services::execute_in_container),
        )
        .route(
            "/api/services/execute_user_script",
            post(services::execute_user_script),
        )
        .route(
            "/api/services/stop_user_script",
            post(services::stop_user_script),
        )
        .route("/api/services/system_reboot", post(services::system_reboot))
        .route(
            "/api/services/system_shutdown",
            post(services::system_shutdown),
        )
        .route("/api/services/docker/{action}", post(services::docker_action))
        .route("/api/services/vm/{action}", post(services::vm_action))
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
