use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::summary::Summary;

/// One completed ingestion as held by the history store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub id: Uuid,
    pub original_filename: String,
    pub uploaded_at: DateTime<Utc>,
    pub summary: Summary,
    pub source_key: String,
    pub report_key: Option<String>,
}

impl DatasetRecord {
    pub fn has_report(&self) -> bool {
        self.report_key.is_some()
    }

    /// Download name for the rendered report
    pub fn report_filename(&self) -> String {
        format!("{}_summary.pdf", self.original_filename)
    }
}

/// A record that has not been persisted yet, together with the bytes it owns.
#[derive(Debug, Clone)]
pub struct NewDataset {
    pub id: Uuid,
    pub original_filename: String,
    pub uploaded_at: DateTime<Utc>,
    pub summary: Summary,
    pub source_bytes: Vec<u8>,
    pub report_bytes: Option<Vec<u8>>,
}

impl NewDataset {
    pub fn new(original_filename: impl Into<String>, summary: Summary, source_bytes: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            original_filename: original_filename.into(),
            uploaded_at: Utc::now(),
            summary,
            source_bytes,
            report_bytes: None,
        }
    }

    pub fn with_report(mut self, report_bytes: Vec<u8>) -> Self {
        self.report_bytes = Some(report_bytes);
        self
    }
}

/// Blob key of the uploaded source file
pub fn source_blob_key(id: &Uuid, original_filename: &str) -> String {
    format!("datasets/{}_{}", id, sanitize_filename(original_filename))
}

/// Blob key of the rendered report
pub fn report_blob_key(id: &Uuid) -> String {
    format!("reports/{}_summary_report.pdf", id)
}

/// Replace anything outside `[A-Za-z0-9._-]` so the name is safe as a key segment
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload.csv".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("plant data (v2).csv"), "plant_data__v2_.csv");
        assert_eq!(sanitize_filename("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_filename(""), "upload.csv");
        assert_eq!(sanitize_filename("..."), "upload.csv");
    }

    #[test]
    fn test_blob_keys_embed_id() {
        let id = Uuid::new_v4();
        assert_eq!(
            source_blob_key(&id, "equipment.csv"),
            format!("datasets/{}_equipment.csv", id)
        );
        assert_eq!(report_blob_key(&id), format!("reports/{}_summary_report.pdf", id));
    }
}
