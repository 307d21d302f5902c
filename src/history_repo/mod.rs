// SQLite history. server_info table stores the static ServerInfo once; snapshots keep
// a few headline columns next to the full blob.

mod blob;

use crate::models::{ServerInfo, UnraidSnapshot};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::instrument;

pub struct HistoryRepo {
    pool: SqlitePool,
    retention_ms: i64,
}

impl HistoryRepo {
    pub async fn connect(path: &str, retention_days: u32) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new().connect_with(opts).await?;
        let retention_ms = (retention_days as i64) * 24 * 60 * 60 * 1000;
        Ok(Self { pool, retention_ms })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshot_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at INTEGER NOT NULL,
                cpu_usage REAL NOT NULL,
                memory_percent REAL NOT NULL,
                array_used_percent REAL,
                data BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_snapshot_created_at ON snapshot_history(created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS server_info (id INTEGER PRIMARY KEY CHECK (id = 1), data BLOB NOT NULL)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, info), fields(repo = "history", operation = "save_server_info"))]
    pub async fn save_server_info(&self, info: &ServerInfo) -> anyhow::Result<()> {
        let blob = wincode::serialize(info)
            .map_err(|e| anyhow::anyhow!("wincode server_info: {}", e))?;
        sqlx::query("INSERT OR REPLACE INTO server_info (id, data) VALUES (1, $1)")
            .bind(&blob)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_stored_server_info(&self) -> anyhow::Result<Option<ServerInfo>> {
        let row = sqlx::query("SELECT data FROM server_info WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let data: Vec<u8> = row.try_get("data")?;
        let info = wincode::deserialize(&data)
            .map_err(|e| anyhow::anyhow!("wincode deserialize server_info: {}", e))?;
        Ok(Some(info))
    }

    #[instrument(skip(self, snapshots), fields(repo = "history", operation = "save_snapshots", snapshots_count = snapshots.len()))]
    pub async fn save_snapshots(&self, snapshots: &[UnraidSnapshot]) -> anyhow::Result<()> {
        if snapshots.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for s in snapshots {
            let data = blob::with_version_prefix(
                blob::SNAPSHOT_BLOB_VERSION,
                wincode::serialize(s).map_err(|e| anyhow::anyhow!("wincode: {}", e))?,
            );
            sqlx::query(
                "INSERT INTO snapshot_history (created_at, cpu_usage, memory_percent, array_used_percent, data) VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(s.timestamp as i64)
            .bind(s.cpu.usage_percent)
            .bind(s.memory.usage_percent)
            .bind(s.array_usage.as_ref().map(|u| u.usage_percent))
            .bind(&data)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Deletes rows older than the retention period. Returns the number removed.
    #[instrument(skip(self), fields(repo = "history", operation = "prune_old_data"))]
    pub async fn prune_old_data(&self) -> anyhow::Result<u64> {
        let cutoff = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)?
            .as_millis() as i64)
            - self.retention_ms;
        let r = sqlx::query("DELETE FROM snapshot_history WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }

    /// Latest `limit` snapshots, oldest first.
    #[instrument(skip(self), fields(repo = "history", operation = "get_recent_snapshots"))]
    pub async fn get_recent_snapshots(&self, limit: u32) -> anyhow::Result<Vec<UnraidSnapshot>> {
        let rows = sqlx::query(
            "SELECT created_at, data FROM snapshot_history ORDER BY id DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = parse_rows(&rows)?;
        out.reverse();
        Ok(out)
    }

    /// Snapshots in [from_ts, to_ts) (unix ms). Order: ascending by created_at.
    #[instrument(
        skip(self),
        fields(repo = "history", operation = "get_snapshots_by_time_range")
    )]
    pub async fn get_snapshots_by_time_range(
        &self,
        from_ts: i64,
        to_ts: i64,
    ) -> anyhow::Result<Vec<UnraidSnapshot>> {
        let rows = sqlx::query(
            "SELECT created_at, data FROM snapshot_history
             WHERE created_at >= $1 AND created_at < $2 ORDER BY created_at ASC",
        )
        .bind(from_ts)
        .bind(to_ts)
        .fetch_all(&self.pool)
        .await?;
        parse_rows(&rows)
    }

    pub async fn count_snapshots(&self) -> anyhow::Result<i64> {
        let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM snapshot_history")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// Reclaim space after deletes (run periodically after pruning).
    #[instrument(skip(self), fields(repo = "history", operation = "vacuum"))]
    pub async fn vacuum(&self) -> anyhow::Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }
}

/// Decodes rows, skipping blobs from another version or that fail to decode.
fn parse_rows(rows: &[sqlx::sqlite::SqliteRow]) -> anyhow::Result<Vec<UnraidSnapshot>> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let created_at: i64 = row.try_get("created_at")?;
        let data: Vec<u8> = row.try_get("data")?;
        let Some(payload) = blob::versioned_payload(&data, blob::SNAPSHOT_BLOB_VERSION) else {
            tracing::debug!(created_at, "Snapshot blob has unknown version, skipping");
            continue;
        };
        match wincode::deserialize::<UnraidSnapshot>(payload) {
            Ok(mut snapshot) => {
                snapshot.timestamp = created_at as u64;
                out.push(snapshot);
            }
            Err(e) => {
                tracing::debug!(created_at, error = %e, "wincode deserialize snapshot (legacy/corrupt), skipping");
            }
        }
    }
    Ok(out)
}
