use anyhow::{Context, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;
use uuid::Uuid;

use shared::domain::{MessageRecord, MessageStatusUpdate};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        // Every connection to an in-memory database gets its own empty schema.
        let max_connections = if is_in_memory(database_url) { 1 } else { 5 };
        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Inserts a status row or, when the protocol message id is already known,
    /// overwrites its timestamp, status and source in the same statement.
    pub async fn upsert_message_status(&self, update: &MessageStatusUpdate) -> Result<()> {
        sqlx::query(
            "INSERT INTO message_status (id, message_id, timestamp, status, source)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(message_id) DO UPDATE SET
                timestamp = excluded.timestamp,
                status = excluded.status,
                source = excluded.source",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&update.message_id)
        .bind(&update.timestamp)
        .bind(&update.status)
        .bind(&update.source)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to upsert status for message '{}'", update.message_id))?;
        debug!(message_id = %update.message_id, status = %update.status, "message status stored");
        Ok(())
    }

    pub async fn message_status_by_id(&self, message_id: &str) -> Result<Option<MessageRecord>> {
        let row = sqlx::query(
            "SELECT id, message_id, timestamp, status, source
             FROM message_status
             WHERE message_id = ?",
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load status for message '{message_id}'"))?;

        Ok(row.map(|r| MessageRecord {
            id: r.get::<String, _>("id"),
            message_id: r.get::<String, _>("message_id"),
            timestamp: r.get::<String, _>("timestamp"),
            status: r.get::<String, _>("status"),
            source: r.get::<String, _>("source"),
        }))
    }

    /// Returns `(message_id, timestamp)` of the newest record for `source`, or
    /// two empty strings when the source has no records.
    pub async fn latest_message_for_source(&self, source: &str) -> Result<(String, String)> {
        let row = sqlx::query(
            "SELECT message_id, timestamp
             FROM message_status
             WHERE source = ?
             ORDER BY timestamp DESC
             LIMIT 1",
        )
        .bind(source)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load latest message for source '{source}'"))?;

        Ok(row
            .map(|r| (r.get::<String, _>(0), r.get::<String, _>(1)))
            .unwrap_or_default())
    }

    pub async fn delete_all_message_statuses(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM message_status")
            .execute(&self.pool)
            .await
            .context("failed to delete message statuses")?;
        Ok(result.rows_affected())
    }
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.starts_with("sqlite::memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_in_memory(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
