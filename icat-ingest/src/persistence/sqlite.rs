//! SQLite gateway and item source (sqlx)
//!
//! Tables:
//! - `item_images`: catalog of items and their ordered photographs
//! - `raw_extractions`: audit trail, one row per (item, image)
//! - `consolidated_records`: one fused record per item
//! - `batch_checkpoint`: single-row batch progress
//!
//! Records and checkpoints are stored as JSON documents; writes go through
//! `retry_on_lock`.

use super::retry::retry_on_lock;
use super::{ItemSource, PersistenceError, PersistenceGateway};
use crate::types::{Checkpoint, ConsolidatedRecord, ImageRef, RawExtraction};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::path::Path;

/// Upper bound for lock-contention retries
const MAX_LOCK_WAIT_MS: u64 = 5000;

#[derive(Debug, Clone)]
pub struct SqliteGateway {
    pool: SqlitePool,
}

impl SqliteGateway {
    /// Open (or create) the database file and initialize tables
    pub async fn open(db_path: &Path) -> icat_common::Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        tracing::debug!(url = %db_url, "Connecting to database");

        let pool = SqlitePool::connect(&db_url).await?;
        Self::new(pool).await
    }

    /// Wrap an existing pool, creating tables if missing
    pub async fn new(pool: SqlitePool) -> icat_common::Result<Self> {
        init_tables(&pool).await?;
        Ok(Self { pool })
    }

    /// Wait for in-flight queries and close every connection
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("Database connections closed");
    }

    /// Register (or replace) an item and its ordered images
    pub async fn register_item(
        &self,
        item_id: &str,
        images: &[ImageRef],
    ) -> Result<(), PersistenceError> {
        retry_on_lock("register_item", MAX_LOCK_WAIT_MS, || async {
            let mut tx = self.pool.begin().await?;

            sqlx::query("DELETE FROM item_images WHERE item_id = ?")
                .bind(item_id)
                .execute(&mut *tx)
                .await?;

            for (position, image) in images.iter().enumerate() {
                sqlx::query("INSERT INTO item_images (item_id, position, image_ref) VALUES (?, ?, ?)")
                    .bind(item_id)
                    .bind(position as i64)
                    .bind(image.as_str())
                    .execute(&mut *tx)
                    .await?;
            }

            tx.commit().await?;
            Ok::<_, PersistenceError>(())
        })
        .await?;

        tracing::debug!(item_id, images = images.len(), "Registered item");
        Ok(())
    }
}

async fn init_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS item_images (
            item_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            image_ref TEXT NOT NULL,
            PRIMARY KEY (item_id, position)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS raw_extractions (
            item_id TEXT NOT NULL,
            image_ref TEXT NOT NULL,
            data TEXT NOT NULL,
            cost REAL NOT NULL DEFAULT 0.0,
            created_at TEXT NOT NULL,
            PRIMARY KEY (item_id, image_ref)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS consolidated_records (
            item_id TEXT PRIMARY KEY,
            data TEXT NOT NULL,
            overall_confidence REAL NOT NULL,
            conflict_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS batch_checkpoint (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            data TEXT NOT NULL,
            wave_index INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!(
        "Database tables initialized (item_images, raw_extractions, consolidated_records, batch_checkpoint)"
    );
    Ok(())
}

#[async_trait]
impl PersistenceGateway for SqliteGateway {
    async fn save_raw(
        &self,
        item_id: &str,
        image_ref: &ImageRef,
        extraction: &RawExtraction,
    ) -> Result<(), PersistenceError> {
        let data = serde_json::to_string(extraction)?;
        let created_at = extraction.created_at.to_rfc3339();

        retry_on_lock("save_raw", MAX_LOCK_WAIT_MS, || async {
            sqlx::query(
                r#"
                INSERT INTO raw_extractions (item_id, image_ref, data, cost, created_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(item_id, image_ref) DO UPDATE SET
                    data = excluded.data,
                    cost = excluded.cost,
                    created_at = excluded.created_at
                "#,
            )
            .bind(item_id)
            .bind(image_ref.as_str())
            .bind(&data)
            .bind(extraction.cost)
            .bind(&created_at)
            .execute(&self.pool)
            .await?;
            Ok::<_, PersistenceError>(())
        })
        .await
    }

    async fn load_raw(&self, item_id: &str) -> Result<Vec<RawExtraction>, PersistenceError> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT data FROM raw_extractions WHERE item_id = ? ORDER BY rowid",
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|data| serde_json::from_str(data).map_err(PersistenceError::from))
            .collect()
    }

    async fn save_consolidated(
        &self,
        item_id: &str,
        record: &ConsolidatedRecord,
    ) -> Result<(), PersistenceError> {
        let data = serde_json::to_string(record)?;
        let created_at = record.created_at.to_rfc3339();
        let conflict_count = record.conflicts.len() as i64;

        retry_on_lock("save_consolidated", MAX_LOCK_WAIT_MS, || async {
            sqlx::query(
                r#"
                INSERT INTO consolidated_records (item_id, data, overall_confidence, conflict_count, created_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(item_id) DO UPDATE SET
                    data = excluded.data,
                    overall_confidence = excluded.overall_confidence,
                    conflict_count = excluded.conflict_count,
                    created_at = excluded.created_at
                "#,
            )
            .bind(item_id)
            .bind(&data)
            .bind(record.overall_confidence)
            .bind(conflict_count)
            .bind(&created_at)
            .execute(&self.pool)
            .await?;
            Ok::<_, PersistenceError>(())
        })
        .await
    }

    async fn get_consolidated(
        &self,
        item_id: &str,
    ) -> Result<Option<ConsolidatedRecord>, PersistenceError> {
        let data: Option<String> =
            sqlx::query_scalar("SELECT data FROM consolidated_records WHERE item_id = ?")
                .bind(item_id)
                .fetch_optional(&self.pool)
                .await?;

        data.map(|d| serde_json::from_str(&d))
            .transpose()
            .map_err(PersistenceError::from)
    }

    async fn load_checkpoint(&self) -> Result<Option<Checkpoint>, PersistenceError> {
        let data: Option<String> =
            sqlx::query_scalar("SELECT data FROM batch_checkpoint WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        data.map(|d| serde_json::from_str(&d))
            .transpose()
            .map_err(PersistenceError::from)
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), PersistenceError> {
        let data = serde_json::to_string(checkpoint)?;
        let wave_index = checkpoint.wave_index as i64;
        let updated_at = checkpoint.updated_at.to_rfc3339();

        retry_on_lock("save_checkpoint", MAX_LOCK_WAIT_MS, || async {
            sqlx::query(
                r#"
                INSERT INTO batch_checkpoint (id, data, wave_index, updated_at)
                VALUES (1, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    data = excluded.data,
                    wave_index = excluded.wave_index,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&data)
            .bind(wave_index)
            .bind(&updated_at)
            .execute(&self.pool)
            .await?;
            Ok::<_, PersistenceError>(())
        })
        .await
    }

    async fn clear_checkpoint(&self) -> Result<(), PersistenceError> {
        retry_on_lock("clear_checkpoint", MAX_LOCK_WAIT_MS, || async {
            sqlx::query("DELETE FROM batch_checkpoint")
                .execute(&self.pool)
                .await?;
            Ok::<_, PersistenceError>(())
        })
        .await
    }
}

#[async_trait]
impl ItemSource for SqliteGateway {
    async fn list_images(&self, item_id: &str) -> Result<Vec<ImageRef>, PersistenceError> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT image_ref FROM item_images WHERE item_id = ? ORDER BY position",
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ImageRef).collect())
    }

    async fn pending_items(&self) -> Result<Vec<String>, PersistenceError> {
        let rows: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT item_id FROM item_images
            WHERE item_id NOT IN (SELECT item_id FROM consolidated_records)
            GROUP BY item_id
            ORDER BY MIN(rowid)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
