pub mod dataset;
pub mod error;
pub mod summary;

// Normalized CSV tables
pub mod csv;
