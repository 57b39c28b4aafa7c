use crate::application::use_cases::summarize::summarize;
use crate::domain::dataset::{DatasetRecord, NewDataset};
use crate::domain::error::{AppError, Result};
use crate::domain::summary::Summary;
use crate::infrastructure::csv::TableNormalizer;
use crate::infrastructure::db::HistoryStore;
use crate::infrastructure::report::render_report;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const FALLBACK_FILENAME: &str = "upload.csv";

pub struct IngestDatasetUseCase {
    history: Arc<HistoryStore>,
}

impl IngestDatasetUseCase {
    pub fn new(history: Arc<HistoryStore>) -> Self {
        Self { history }
    }

    pub fn window_size(&self) -> usize {
        self.history.window_size()
    }

    /// Normalize, summarize and render an upload, then record it.
    ///
    /// Nothing reaches the history store unless every stage succeeds.
    pub async fn ingest(&self, original_filename: &str, bytes: Vec<u8>) -> Result<DatasetRecord> {
        let filename = match original_filename.trim() {
            "" => FALLBACK_FILENAME.to_string(),
            name => name.to_string(),
        };

        let (summary, report, bytes) = {
            let filename = filename.clone();
            tokio::task::spawn_blocking(move || -> Result<(Summary, Vec<u8>, Vec<u8>)> {
                let table = TableNormalizer::new().normalize(&bytes)?;
                let summary = summarize(&table);
                let report = render_report(&summary, &filename)?;
                Ok((summary, report, bytes))
            })
            .await
            .map_err(|e| AppError::Internal(format!("Ingestion task failed: {}", e)))?
        }
        .map_err(|err| {
            warn!(filename = %filename, error = %err, "Rejected upload");
            err
        })?;

        let dataset = NewDataset::new(filename, summary, bytes).with_report(report);
        let record = self.history.append(dataset).await?;

        info!(
            dataset_id = %record.id,
            total_records = record.summary.total_records,
            distinct_types = record.summary.type_distribution.len(),
            "Upload processed"
        );
        Ok(record)
    }

    pub async fn history(&self) -> Result<Vec<DatasetRecord>> {
        self.history.list_recent(self.history.window_size()).await
    }

    pub async fn get(&self, id: &Uuid) -> Result<DatasetRecord> {
        self.history.get(id).await
    }

    pub async fn report(&self, id: &Uuid) -> Result<(DatasetRecord, Vec<u8>)> {
        self.history.open_report(id).await
    }

    /// Re-render the report from the stored summary and attach it.
    pub async fn regenerate_report(&self, id: &Uuid) -> Result<DatasetRecord> {
        let record = self.history.get(id).await?;
        let report = tokio::task::spawn_blocking(move || {
            render_report(&record.summary, &record.original_filename)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Report task failed: {}", e)))??;
        self.history.attach_report(id, &report).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::{BlobStore, InMemoryBlobStore};

    const SAMPLE: &str = "Equipment Name,Type,Flowrate,Pressure,Temperature\n\
                          Pump1,Pump,10,2,300\n\
                          Pump2,Pump,20,3,310\n\
                          Valve1,Valve,,5,290\n";

    async fn use_case(window_size: usize) -> (IngestDatasetUseCase, Arc<InMemoryBlobStore>) {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let history = HistoryStore::connect("sqlite::memory:", blobs.clone(), window_size)
            .await
            .unwrap();
        (IngestDatasetUseCase::new(Arc::new(history)), blobs)
    }

    #[tokio::test]
    async fn test_ingest_records_summary_and_blobs() {
        let (use_case, blobs) = use_case(5).await;
        let record = use_case
            .ingest("plant.csv", SAMPLE.as_bytes().to_vec())
            .await
            .unwrap();

        assert_eq!(record.original_filename, "plant.csv");
        assert_eq!(record.summary.total_records, 3);
        assert_eq!(record.summary.avg_pressure, Some(3.33));
        assert!(record.has_report());

        let source = blobs.open(&record.source_key).await.unwrap();
        assert_eq!(source, SAMPLE.as_bytes());

        let (_, report) = use_case.report(&record.id).await.unwrap();
        assert!(report.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn test_malformed_upload_leaves_history_untouched() {
        let (use_case, blobs) = use_case(5).await;
        let err = use_case
            .ingest("bad.csv", b"Type,Flowrate\nPump,1,2,3\n".to_vec())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::MalformedInput(_)));
        assert!(use_case.history().await.unwrap().is_empty());
        assert!(blobs.is_empty());
    }

    #[tokio::test]
    async fn test_blank_filename_gets_fallback() {
        let (use_case, _) = use_case(5).await;
        let record = use_case.ingest("  ", SAMPLE.as_bytes().to_vec()).await.unwrap();
        assert_eq!(record.original_filename, FALLBACK_FILENAME);
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_bounded() {
        let (use_case, blobs) = use_case(2).await;
        let mut ids = Vec::new();
        for name in ["a.csv", "b.csv", "c.csv"] {
            ids.push(use_case.ingest(name, SAMPLE.as_bytes().to_vec()).await.unwrap().id);
        }

        let history: Vec<_> = use_case.history().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(history, vec![ids[2], ids[1]]);
        assert_eq!(blobs.len(), 4);
    }

    #[tokio::test]
    async fn test_regenerate_report() {
        let (use_case, _) = use_case(5).await;
        let record = use_case.ingest("plant.csv", SAMPLE.as_bytes().to_vec()).await.unwrap();

        let regenerated = use_case.regenerate_report(&record.id).await.unwrap();
        assert_eq!(regenerated.report_key, record.report_key);
        let (_, report) = use_case.report(&record.id).await.unwrap();
        assert!(report.starts_with(b"%PDF"));

        let err = use_case.regenerate_report(&Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
