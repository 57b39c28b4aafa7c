pub mod connection;
pub mod history;

pub use history::{HistoryStore, TrimReport};
