pub mod use_cases;

pub use use_cases::ingest_dataset::IngestDatasetUseCase;
pub use use_cases::summarize::summarize;
