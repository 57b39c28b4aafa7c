// ============================================================
// CSV DOMAIN LAYER
// ============================================================
// Core types for normalized equipment tables
// No I/O, no async, no external dependencies

mod canonical_column;
mod normalized_table;

pub use canonical_column::CanonicalColumn;
pub use normalized_table::{NormalizedTable, TableRow};
