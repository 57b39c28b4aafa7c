use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};

use crate::application::IngestDatasetUseCase;
use crate::domain::error::Result;
use crate::infrastructure::config::{AppConfig, BlobBackend};
use crate::infrastructure::db::HistoryStore;
use crate::infrastructure::storage::{BlobStore, InMemoryBlobStore, LocalBlobStore};
use crate::interfaces::http::{add_log, HttpState, LogEntry};

pub async fn build_blob_store(config: &AppConfig) -> Result<Arc<dyn BlobStore>> {
    match config.storage.blob_backend {
        BlobBackend::Local => {
            let store = LocalBlobStore::open_root(&config.storage.media_root)
                .await
                .map_err(|err| {
                    error!(
                        error = %err,
                        media_root = %config.storage.media_root,
                        "Failed to open media root"
                    );
                    err
                })?;
            Ok(Arc::new(store))
        }
        BlobBackend::Memory => {
            warn!("Using in-memory blob storage; uploads will not survive a restart");
            Ok(Arc::new(InMemoryBlobStore::new()))
        }
    }
}

/// Wire storage, history and the use case into the HTTP state
pub async fn setup(config: &AppConfig) -> Result<HttpState> {
    let logs: Arc<Mutex<Vec<LogEntry>>> = Arc::new(Mutex::new(Vec::new()));

    let blobs = build_blob_store(config).await?;
    let history = HistoryStore::connect(
        &config.storage.database_url,
        blobs,
        config.history.window_size,
    )
    .await
    .map_err(|err| {
        error!(
            error = %err,
            database_url = %config.storage.database_url,
            "Failed to init history DB"
        );
        err
    })?;

    // Catch up on evictions a previous run could not finish
    let report = history.trim(config.history.window_size).await?;
    if !report.is_clean() {
        warn!(
            failed_blobs = report.failed_blobs.len(),
            "Startup trim left blob deletions queued"
        );
    }

    let ingest_use_case = Arc::new(IngestDatasetUseCase::new(Arc::new(history)));

    info!(
        window_size = config.history.window_size,
        blob_backend = ?config.storage.blob_backend,
        "History store ready"
    );
    add_log(&logs, "INFO", "System", "Equipment summary service initialized");

    Ok(HttpState {
        ingest_use_case,
        logs,
        max_upload_bytes: config.server.max_upload_bytes,
    })
}
