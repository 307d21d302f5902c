use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;
use unraid_monitor::*;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;
    tracing::info!(
        name = version::NAME,
        version = version::VERSION,
        host = %app_config.unraid.host,
        "Starting"
    );

    let connector = Arc::new(ssh::SshConnector::new(app_config.ssh_settings()));
    let pool = Arc::new(pool::ConnectionPool::new(
        connector,
        app_config.pool_settings(),
    ));
    pool.initialize().await.map_err(|e| {
        anyhow::anyhow!(
            "connecting to {}:{}: {}",
            app_config.unraid.host,
            app_config.unraid.port,
            e
        )
    })?;

    let cache = Arc::new(cache::CacheManager::new(
        app_config.cache.max_size_bytes,
        Duration::from_secs(app_config.cache.cleanup_interval_secs),
    ));
    let repo = Arc::new(unraid_repo::UnraidRepo::new(pool.clone(), cache));

    let history_repo = Arc::new(
        history_repo::HistoryRepo::connect(
            &app_config.database.path,
            app_config.database.retention_days,
        )
        .await?,
    );
    history_repo.init().await?;

    let mut server_info = repo.get_server_info().await;
    if server_info.hostname.is_empty() {
        match history_repo.get_stored_server_info().await {
            Ok(Some(stored)) => {
                tracing::warn!("Live server info incomplete, using stored copy");
                server_info = stored;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Reading stored server info failed"),
        }
    } else if let Err(e) = history_repo.save_server_info(&server_info).await {
        tracing::warn!(error = %e, "Saving server info failed");
    }
    tracing::info!(
        hostname = %server_info.hostname,
        unraid_version = %server_info.unraid_version,
        cores = server_info.cpu_cores,
        "Connected to Unraid server"
    );
    let server_info = Arc::new(server_info);

    let ups_detected = repo.detect_ups().await;
    if app_config.polling.has_ups && !ups_detected {
        tracing::warn!("polling.has_ups is set but apcupsd was not found; UPS data will be empty");
    } else if !app_config.polling.has_ups && ups_detected {
        tracing::info!("apcupsd detected; set polling.has_ups = true to collect UPS data");
    }

    let (tx, _) =
        broadcast::channel::<models::UnraidSnapshot>(app_config.publishing.broadcast_capacity);
    let (write_tx, write_rx) = mpsc::channel(coordinator::writer_channel_capacity(
        app_config.database.flush_rate,
    ));
    let ws_connections = Arc::new(AtomicUsize::new(0));
    let snapshots_saved_total = Arc::new(AtomicU64::new(0));
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let (handle, snapshot_tx) = coordinator::CoordinatorHandle::new();

    let writer_handle = coordinator::spawn_history_writer(
        write_rx,
        history_repo.clone(),
        coordinator::HistoryWriterConfig {
            flush_rate: app_config.database.flush_rate,
            flush_interval_secs: app_config.database.flush_interval_secs,
        },
        snapshots_saved_total.clone(),
    );

    let coordinator_handle = coordinator::spawn(
        coordinator::CoordinatorDeps {
            repo: repo.clone(),
            pool: pool.clone(),
            history_repo: history_repo.clone(),
            handle: handle.clone(),
            snapshot_tx,
            tx: tx.clone(),
            write_tx,
            ws_connections: ws_connections.clone(),
            snapshots_saved_total,
            shutdown_rx,
        },
        coordinator::CoordinatorConfig {
            update_interval: Duration::from_secs(app_config.polling.general_interval_mins * 60),
            disk_interval: Duration::from_secs(app_config.polling.disk_interval_hours * 3600),
            has_ups: app_config.polling.has_ups,
            stats_log_interval_secs: app_config.monitoring.stats_log_interval_secs,
            prune_interval_secs: app_config.monitoring.prune_interval_secs,
        },
    );

    let app = routes::app(routes::AppState {
        snapshot_tx: tx,
        coordinator: handle,
        repo,
        pool,
        history_repo,
        server_info,
        ws_connections,
    });
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    let in_container = std::path::Path::new("/.dockerenv").exists()
        || std::env::var("CONTAINER").as_deref() == Ok("1");

    if in_container {
        // In Docker: run server until error or SIGTERM (no signal handler; avoids immediate exit)
        axum::serve(listener, app).await?;
    } else {
        tokio::select! {
            result = axum::serve(listener, app) => {
                result?;
            }
            _ = async {
                #[cfg(unix)]
                {
                    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                        Ok(s) => s,
                        Err(_) => {
                            let _ = tokio::signal::ctrl_c().await;
                            return;
                        }
                    };
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = sigterm.recv() => {}
                    }
                }
                #[cfg(not(unix))]
                {
                    let _ = tokio::signal::ctrl_c().await;
                }
            } => {
                tracing::info!("Received shutdown signal");
                let _ = shutdown_tx.send(());
                let _ = coordinator_handle.await;
                let _ = writer_handle.await;
            }
        }
    }

    Ok(())
}
