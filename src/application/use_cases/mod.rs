pub mod ingest_dataset;
pub mod summarize;
