// GET handlers: version, info, snapshot, history, metrics, live disk reads

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::AppState;
use crate::version::{NAME, VERSION};

pub(super) const DEFAULT_HISTORY_LIMIT: u32 = 100;
pub(super) const MAX_HISTORY_LIMIT: u32 = 10_000;

/// GET /version returns service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// GET /api/info: static server identity (fetched once at startup).
pub(super) async fn api_info_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(state.server_info.as_ref().clone())
}

/// GET /api/snapshot: latest snapshot, 503 until the first cycle completes.
pub(super) async fn snapshot_handler(State(state): State<AppState>) -> Response {
    match state.coordinator.latest() {
        Some(snapshot) => axum::Json(snapshot).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(serde_json::json!({ "error": "no data collected yet" })),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct HistoryQuery {
    limit: Option<u32>,
    /// Unix ms, inclusive.
    from: Option<i64>,
    /// Unix ms, exclusive.
    to: Option<i64>,
}

/// GET /api/history?limit=N or ?from=..&to=..
pub(super) async fn history_handler(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Response {
    let result = match (q.from, q.to) {
        (Some(from), Some(to)) => {
            if from >= to {
                return (
                    StatusCode::BAD_REQUEST,
                    axum::Json(serde_json::json!({ "error": "from must be before to" })),
                )
                    .into_response();
            }
            state.history_repo.get_snapshots_by_time_range(from, to).await
        }
        _ => {
            let limit = q
                .limit
                .unwrap_or(DEFAULT_HISTORY_LIMIT)
                .clamp(1, MAX_HISTORY_LIMIT);
            state.history_repo.get_recent_snapshots(limit).await
        }
    };
    match result {
        Ok(snapshots) => axum::Json(snapshots).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, operation = "get_history", "History query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// GET /api/metrics: SSH pool, cache and coordinator health.
pub(super) async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let pool = state.pool.metrics().await;
    axum::Json(serde_json::json!({
        "pool": pool,
        "cache": state.repo.cache().stats(),
        "coordinator": state.coordinator.metrics(),
        "wsClients": state.ws_connections.load(std::sync::atomic::Ordering::Relaxed),
    }))
}

/// GET /api/disks: live disk read, outside the coordinator's disk interval.
/// Disks in standby are reported without SMART data so they stay asleep.
pub(super) async fn disks_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(state.repo.get_disks().await)
}

/// GET /api/zfs/pools
pub(super) async fn zfs_pools_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(state.repo.get_zfs_pools().await)
}
