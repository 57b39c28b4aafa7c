// ============================================================
// CSV INFRASTRUCTURE LAYER
// ============================================================
// Upload decoding and CSV normalization

mod table_normalizer;

pub use table_normalizer::{decode_upload, TableNormalizer};
