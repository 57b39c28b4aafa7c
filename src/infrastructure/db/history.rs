use chrono::{DateTime, SubsecRound, TimeZone, Utc};
use sqlx::sqlite::{Sqlite, SqlitePool};
use sqlx::Transaction;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::dataset::{report_blob_key, source_blob_key, DatasetRecord, NewDataset};
use crate::domain::error::{AppError, Result};
use crate::domain::summary::{Summary, TypeDistribution};
use crate::infrastructure::storage::BlobStore;

use super::connection::connect_history_pool;

/// Outcome of one retention pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrimReport {
    /// Records removed because they fell outside the window
    pub evicted: Vec<Uuid>,
    /// Blob keys confirmed deleted during this pass
    pub deleted_blobs: Vec<String>,
    /// Blob keys whose deletion failed and remain queued for the next pass
    pub failed_blobs: Vec<String>,
}

impl TrimReport {
    pub fn is_clean(&self) -> bool {
        self.failed_blobs.is_empty()
    }
}

/// Dataset history with a fixed retention window.
///
/// Owns both the record rows and the blobs they reference. Row insertion and
/// eviction share one async lock, so the retained set never exceeds the
/// window once an append has returned.
pub struct HistoryStore {
    pool: SqlitePool,
    blobs: Arc<dyn BlobStore>,
    window_size: usize,
    retention_lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(pool: SqlitePool, blobs: Arc<dyn BlobStore>, window_size: usize) -> Self {
        Self {
            pool,
            blobs,
            window_size: window_size.max(1),
            retention_lock: Mutex::new(()),
        }
    }

    pub async fn connect(
        database_url: &str,
        blobs: Arc<dyn BlobStore>,
        window_size: usize,
    ) -> Result<Self> {
        let pool = connect_history_pool(database_url).await?;
        Ok(Self::new(pool, blobs, window_size))
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Persist a dataset with its blobs, then enforce the retention window.
    ///
    /// Blobs are written first. A failed write removes whatever was already
    /// written and no row is inserted.
    pub async fn append(&self, dataset: NewDataset) -> Result<DatasetRecord> {
        let NewDataset {
            id,
            original_filename,
            uploaded_at,
            summary,
            source_bytes,
            report_bytes,
        } = dataset;

        let record = DatasetRecord {
            id,
            source_key: source_blob_key(&id, &original_filename),
            report_key: report_bytes.as_ref().map(|_| report_blob_key(&id)),
            original_filename,
            uploaded_at: uploaded_at.trunc_subsecs(3),
            summary,
        };

        self.blobs.save(&record.source_key, &source_bytes).await?;

        if let (Some(report_key), Some(bytes)) = (&record.report_key, &report_bytes) {
            if let Err(err) = self.blobs.save(report_key, bytes).await {
                error!(dataset_id = %id, error = %err, "Failed to store report blob");
                self.discard_blobs(&id, &[record.source_key.as_str()]).await;
                return Err(err);
            }
        }

        let _guard = self.retention_lock.lock().await;

        if let Err(err) = self.insert_record(&record).await {
            error!(dataset_id = %id, error = %err, "Failed to insert dataset record");
            let mut written = vec![record.source_key.as_str()];
            if let Some(report_key) = &record.report_key {
                written.push(report_key.as_str());
            }
            self.discard_blobs(&id, &written).await;
            return Err(err);
        }

        info!(
            dataset_id = %id,
            filename = %record.original_filename,
            total_records = record.summary.total_records,
            "Dataset appended to history"
        );

        // The window must hold once this returns, so a failed eviction undoes the insert
        let evicted = match self.evict_beyond(self.window_size).await {
            Ok(evicted) => evicted,
            Err(err) => {
                error!(dataset_id = %id, error = %err, "Retention trim failed, rolling back append");
                self.remove_record(&record).await;
                return Err(err);
            }
        };

        match self.sweep_pending_deletions().await {
            Ok(report) if !report.is_clean() => {
                warn!(
                    evicted = evicted.len(),
                    failed_blobs = ?report.failed_blobs,
                    "Retention left blobs pending deletion"
                );
            }
            Ok(_) => {}
            Err(err) => error!(error = %err, "Blob sweep failed after append"),
        }

        Ok(record)
    }

    /// Most recent records, newest first, never more than the window.
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<DatasetRecord>> {
        let limit = limit.min(self.window_size) as i64;
        let entities = sqlx::query_as::<_, DatasetEntity>(
            "SELECT id, original_filename, uploaded_at_ms, total_records, avg_flowrate,
                    avg_pressure, avg_temperature, type_distribution, source_key, report_key
             FROM datasets ORDER BY uploaded_at_ms DESC, seq DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to list datasets: {e}")))?;

        entities.into_iter().map(DatasetRecord::try_from).collect()
    }

    pub async fn get(&self, id: &Uuid) -> Result<DatasetRecord> {
        let entity = sqlx::query_as::<_, DatasetEntity>(
            "SELECT id, original_filename, uploaded_at_ms, total_records, avg_flowrate,
                    avg_pressure, avg_temperature, type_distribution, source_key, report_key
             FROM datasets WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to fetch dataset: {e}")))?;

        match entity {
            Some(entity) => entity.try_into(),
            None => Err(AppError::NotFound(format!("Dataset not found: {}", id))),
        }
    }

    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM datasets")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to count datasets: {e}")))
    }

    /// Store (or replace) the rendered report of an existing record.
    pub async fn attach_report(&self, id: &Uuid, report_bytes: &[u8]) -> Result<DatasetRecord> {
        let _guard = self.retention_lock.lock().await;

        let mut record = self.get(id).await?;
        let report_key = report_blob_key(id);
        self.blobs.save(&report_key, report_bytes).await?;

        let result = self.link_report(id, &report_key).await;

        match result {
            Ok(1) => {
                if let Some(previous) = record.report_key.replace(report_key.clone()) {
                    if previous != report_key {
                        self.discard_blobs(id, &[previous.as_str()]).await;
                    }
                }
                debug!(dataset_id = %id, "Report attached");
                Ok(record)
            }
            Ok(_) => {
                self.discard_blobs(id, &[report_key.as_str()]).await;
                Err(AppError::NotFound(format!("Dataset not found: {}", id)))
            }
            Err(err) => {
                if record.report_key.is_none() {
                    self.discard_blobs(id, &[report_key.as_str()]).await;
                }
                Err(err)
            }
        }
    }

    /// The record together with its report bytes.
    ///
    /// Fails with [`AppError::NotFound`] for unknown ids and for records that
    /// have no report attached yet.
    pub async fn open_report(&self, id: &Uuid) -> Result<(DatasetRecord, Vec<u8>)> {
        let record = self.get(id).await?;
        let Some(report_key) = record.report_key.clone() else {
            return Err(AppError::NotFound("Report not available yet".to_string()));
        };
        let bytes = self.blobs.open(&report_key).await?;
        Ok((record, bytes))
    }

    pub async fn open_source(&self, id: &Uuid) -> Result<Vec<u8>> {
        let record = self.get(id).await?;
        self.blobs.open(&record.source_key).await
    }

    /// Evict every record beyond `window_size` together with its blobs.
    pub async fn trim(&self, window_size: usize) -> Result<TrimReport> {
        let _guard = self.retention_lock.lock().await;
        self.trim_locked(window_size).await
    }

    /// Blob keys still waiting to be deleted
    pub async fn pending_blob_deletions(&self) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT blob_key FROM pending_blob_deletions ORDER BY queued_at_ms, blob_key")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to list pending deletions: {e}")))
    }

    async fn insert_record(&self, record: &DatasetRecord) -> Result<()> {
        let distribution = serde_json::to_string(&record.summary.type_distribution)
            .map_err(|e| AppError::Internal(format!("Failed to encode type distribution: {e}")))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to begin insert: {e}")))?;

        sqlx::query(
            "INSERT INTO datasets (id, original_filename, uploaded_at_ms, total_records,
                avg_flowrate, avg_pressure, avg_temperature, type_distribution, source_key, report_key)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(&record.original_filename)
        .bind(record.uploaded_at.timestamp_millis())
        .bind(record.summary.total_records as i64)
        .bind(record.summary.avg_flowrate)
        .bind(record.summary.avg_pressure)
        .bind(record.summary.avg_temperature)
        .bind(distribution)
        .bind(&record.source_key)
        .bind(&record.report_key)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to insert dataset: {e}")))?;

        let keys = [Some(&record.source_key), record.report_key.as_ref()];
        for key in keys.into_iter().flatten() {
            unqueue_deletion(&mut tx, key).await?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to commit insert: {e}")))?;

        Ok(())
    }

    /// Point a record at its report key; the key leaves the deletion queue in the same transaction.
    async fn link_report(&self, id: &Uuid, report_key: &str) -> Result<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to begin attach: {e}")))?;

        let done = sqlx::query("UPDATE datasets SET report_key = ? WHERE id = ?")
            .bind(report_key)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to attach report: {e}")))?;

        if done.rows_affected() == 1 {
            unqueue_deletion(&mut tx, report_key).await?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to commit attach: {e}")))?;

        Ok(done.rows_affected())
    }

    /// Undo an insert whose retention pass failed.
    async fn remove_record(&self, record: &DatasetRecord) {
        let removed = sqlx::query("DELETE FROM datasets WHERE id = ?")
            .bind(record.id.to_string())
            .execute(&self.pool)
            .await;

        match removed {
            Ok(_) => {
                let mut written = vec![record.source_key.as_str()];
                if let Some(report_key) = &record.report_key {
                    written.push(report_key.as_str());
                }
                self.discard_blobs(&record.id, &written).await;
            }
            Err(e) => error!(dataset_id = %record.id, error = %e, "Failed to roll back dataset"),
        }
    }

    /// Caller must hold `retention_lock`.
    async fn trim_locked(&self, window_size: usize) -> Result<TrimReport> {
        let evicted = self.evict_beyond(window_size).await?;
        let mut report = self.sweep_pending_deletions().await?;
        report.evicted = evicted;

        if !report.evicted.is_empty() {
            info!(
                evicted = report.evicted.len(),
                window_size,
                "Evicted datasets beyond the retention window"
            );
        }

        Ok(report)
    }

    /// Delete rows beyond the window and queue their blobs, in one transaction.
    async fn evict_beyond(&self, window_size: usize) -> Result<Vec<Uuid>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to begin trim: {e}")))?;

        let evicted = sqlx::query_as::<_, EvictedEntity>(
            "SELECT id, source_key, report_key FROM datasets
             ORDER BY uploaded_at_ms DESC, seq DESC LIMIT -1 OFFSET ?",
        )
        .bind(window_size as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to select evictions: {e}")))?;

        let queued_at = Utc::now().timestamp_millis();
        for entity in &evicted {
            sqlx::query("DELETE FROM datasets WHERE id = ?")
                .bind(&entity.id)
                .execute(&mut *tx)
                .await
                .map_err(|e| AppError::DatabaseError(format!("Failed to evict dataset: {e}")))?;

            for key in [Some(&entity.source_key), entity.report_key.as_ref()]
                .into_iter()
                .flatten()
            {
                sqlx::query(
                    "INSERT OR IGNORE INTO pending_blob_deletions (blob_key, dataset_id, queued_at_ms)
                     VALUES (?, ?, ?)",
                )
                .bind(key)
                .bind(&entity.id)
                .bind(queued_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(format!("Failed to queue blob deletion: {e}"))
                })?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to commit trim: {e}")))?;

        let mut ids = Vec::with_capacity(evicted.len());
        for entity in &evicted {
            match Uuid::from_str(&entity.id) {
                Ok(id) => ids.push(id),
                Err(e) => warn!(dataset_id = %entity.id, error = %e, "Evicted row had a malformed id"),
            }
        }

        Ok(ids)
    }

    /// Delete every queued blob; failures stay queued.
    async fn sweep_pending_deletions(&self) -> Result<TrimReport> {
        let keys = self.pending_blob_deletions().await?;
        let mut report = TrimReport::default();

        for key in keys {
            match self.blobs.delete(&key).await {
                Ok(_) => {
                    sqlx::query("DELETE FROM pending_blob_deletions WHERE blob_key = ?")
                        .bind(&key)
                        .execute(&self.pool)
                        .await
                        .map_err(|e| {
                            AppError::DatabaseError(format!("Failed to clear pending deletion: {e}"))
                        })?;
                    report.deleted_blobs.push(key);
                }
                Err(err) => {
                    warn!(blob_key = %key, error = %err, "Blob deletion failed, will retry");
                    sqlx::query(
                        "UPDATE pending_blob_deletions
                         SET attempts = attempts + 1, last_error = ?
                         WHERE blob_key = ?",
                    )
                    .bind(err.to_string())
                    .bind(&key)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| {
                        AppError::DatabaseError(format!("Failed to update pending deletion: {e}"))
                    })?;
                    report.failed_blobs.push(key);
                }
            }
        }

        Ok(report)
    }

    /// Remove blobs that no record will reference; undeletable ones are queued.
    async fn discard_blobs(&self, id: &Uuid, keys: &[&str]) {
        for key in keys {
            if let Err(err) = self.blobs.delete(key).await {
                warn!(dataset_id = %id, blob_key = %key, error = %err, "Queueing orphaned blob");
                let queued = sqlx::query(
                    "INSERT OR IGNORE INTO pending_blob_deletions (blob_key, dataset_id, queued_at_ms, last_error)
                     VALUES (?, ?, ?, ?)",
                )
                .bind(*key)
                .bind(id.to_string())
                .bind(Utc::now().timestamp_millis())
                .bind(err.to_string())
                .execute(&self.pool)
                .await;

                if let Err(e) = queued {
                    error!(blob_key = %key, error = %e, "Failed to queue orphaned blob");
                }
            }
        }
    }
}

async fn unqueue_deletion(tx: &mut Transaction<'_, Sqlite>, blob_key: &str) -> Result<()> {
    sqlx::query("DELETE FROM pending_blob_deletions WHERE blob_key = ?")
        .bind(blob_key)
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to unqueue blob deletion: {e}")))?;
    Ok(())
}

// Internal entities for database mapping
#[derive(sqlx::FromRow)]
struct DatasetEntity {
    id: String,
    original_filename: String,
    uploaded_at_ms: i64,
    total_records: i64,
    avg_flowrate: Option<f64>,
    avg_pressure: Option<f64>,
    avg_temperature: Option<f64>,
    type_distribution: String,
    source_key: String,
    report_key: Option<String>,
}

#[derive(sqlx::FromRow)]
struct EvictedEntity {
    id: String,
    source_key: String,
    report_key: Option<String>,
}

impl TryFrom<DatasetEntity> for DatasetRecord {
    type Error = AppError;

    fn try_from(entity: DatasetEntity) -> Result<Self> {
        let id = Uuid::from_str(&entity.id)
            .map_err(|e| AppError::DatabaseError(format!("Invalid dataset id {}: {e}", entity.id)))?;
        let uploaded_at: DateTime<Utc> = Utc
            .timestamp_millis_opt(entity.uploaded_at_ms)
            .single()
            .ok_or_else(|| {
                AppError::DatabaseError(format!("Invalid upload timestamp for {}", entity.id))
            })?;
        let type_distribution: TypeDistribution = serde_json::from_str(&entity.type_distribution)
            .map_err(|e| {
                AppError::DatabaseError(format!("Invalid type distribution for {}: {e}", entity.id))
            })?;

        Ok(Self {
            id,
            original_filename: entity.original_filename,
            uploaded_at,
            summary: Summary {
                total_records: entity.total_records.max(0) as u64,
                avg_flowrate: entity.avg_flowrate,
                avg_pressure: entity.avg_pressure,
                avg_temperature: entity.avg_temperature,
                type_distribution,
            },
            source_key: entity.source_key,
            report_key: entity.report_key,
        })
    }
}
