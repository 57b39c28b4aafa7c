// ============================================================
// REPORT RENDERING
// ============================================================
// Summary -> page layout -> PDF bytes

mod layout;
mod pdf;

pub use layout::{layout_report, PageLayout, ReportFont, TextLine};
pub use pdf::encode_pdf;

use chrono::{DateTime, Utc};

use crate::domain::error::Result;
use crate::domain::summary::Summary;

/// Render a printable summary report stamped with the current time.
pub fn render_report(summary: &Summary, dataset_name: &str) -> Result<Vec<u8>> {
    render_report_at(summary, dataset_name, Utc::now())
}

/// Render a printable summary report with an explicit generation timestamp.
pub fn render_report_at(
    summary: &Summary,
    dataset_name: &str,
    generated_at: DateTime<Utc>,
) -> Result<Vec<u8>> {
    let pages = layout_report(summary, dataset_name, generated_at);
    encode_pdf(&pages, dataset_name)
}
