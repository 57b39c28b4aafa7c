use chrono::{DateTime, Utc};

use crate::domain::summary::Summary;

/// US Letter, in points
pub const PAGE_WIDTH: f32 = 612.0;
pub const PAGE_HEIGHT: f32 = 792.0;
pub const MARGIN: f32 = 50.0;

pub const REPORT_TITLE: &str = "Chemical Equipment Summary Report";
pub const NO_TYPE_INFORMATION: &str = "No type information available.";
const NOT_AVAILABLE: &str = "N/A";

const BODY_INDENT: f32 = 10.0;
const LINE_ADVANCE: f32 = 16.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFont {
    Regular,
    Bold,
}

/// One positioned line of text; `y` is the baseline measured from the page bottom
#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub font: ReportFont,
    pub size: f32,
    pub x: f32,
    pub y: f32,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageLayout {
    pub lines: Vec<TextLine>,
}

struct Cursor {
    pages: Vec<PageLayout>,
    y: f32,
}

impl Cursor {
    fn new() -> Self {
        Self {
            pages: vec![PageLayout::default()],
            y: PAGE_HEIGHT - MARGIN,
        }
    }

    fn draw(&mut self, font: ReportFont, size: f32, x: f32, text: impl Into<String>) {
        let y = self.y;
        if let Some(page) = self.pages.last_mut() {
            page.lines.push(TextLine {
                font,
                size,
                x,
                y,
                text: text.into(),
            });
        }
    }

    fn advance(&mut self, amount: f32) {
        self.y -= amount;
    }

    /// Continue on a fresh page once the cursor has left the printable area
    fn break_page_if_needed(&mut self) {
        if self.y < MARGIN {
            self.pages.push(PageLayout::default());
            self.y = PAGE_HEIGHT - MARGIN;
        }
    }
}

/// Lay the report out into pages.
///
/// Only the distribution listing can overflow; it continues on the next page
/// without repeating the section header.
pub fn layout_report(
    summary: &Summary,
    dataset_name: &str,
    generated_at: DateTime<Utc>,
) -> Vec<PageLayout> {
    let mut cursor = Cursor::new();

    cursor.draw(ReportFont::Bold, 18.0, MARGIN, REPORT_TITLE);
    cursor.advance(30.0);

    cursor.draw(ReportFont::Regular, 12.0, MARGIN, format!("Dataset: {}", dataset_name));
    cursor.advance(18.0);
    cursor.draw(
        ReportFont::Regular,
        12.0,
        MARGIN,
        format!("Generated: {} UTC", generated_at.format("%Y-%m-%d %H:%M")),
    );
    cursor.advance(24.0);

    cursor.draw(ReportFont::Bold, 14.0, MARGIN, "Key Metrics");
    cursor.advance(20.0);

    let metrics = [
        ("Total Records", summary.total_records.to_string()),
        ("Average Flowrate", format_average(summary.avg_flowrate)),
        ("Average Pressure", format_average(summary.avg_pressure)),
        ("Average Temperature", format_average(summary.avg_temperature)),
    ];
    for (label, value) in metrics {
        cursor.draw(
            ReportFont::Regular,
            12.0,
            MARGIN + BODY_INDENT,
            format!("{}: {}", label, value),
        );
        cursor.advance(LINE_ADVANCE);
    }

    cursor.advance(6.0);
    cursor.draw(ReportFont::Bold, 14.0, MARGIN, "Equipment Type Distribution");
    cursor.advance(20.0);

    if summary.type_distribution.is_empty() {
        cursor.draw(ReportFont::Regular, 12.0, MARGIN + BODY_INDENT, NO_TYPE_INFORMATION);
    } else {
        for (label, count) in summary.type_distribution.iter() {
            cursor.break_page_if_needed();
            cursor.draw(
                ReportFont::Regular,
                12.0,
                MARGIN + BODY_INDENT,
                format!("{}: {}", label, count),
            );
            cursor.advance(LINE_ADVANCE);
        }
    }

    cursor.pages
}

/// Print an average the way the report always has: `N/A` when absent and at
/// least one fractional digit otherwise (`15.0`, `3.33`).
pub fn format_average(value: Option<f64>) -> String {
    match value {
        None => NOT_AVAILABLE.to_string(),
        Some(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 => format!("{:.1}", v),
        Some(v) => v.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::summary::TypeDistribution;
    use chrono::TimeZone;

    fn generated_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap()
    }

    fn texts(page: &PageLayout) -> Vec<&str> {
        page.lines.iter().map(|line| line.text.as_str()).collect()
    }

    #[test]
    fn test_layout_sections_in_order() {
        let summary = Summary {
            total_records: 3,
            avg_flowrate: Some(15.0),
            avg_pressure: Some(3.33),
            avg_temperature: None,
            type_distribution: vec![("Pump", 2u64), ("Valve", 1)].into_iter().collect(),
        };

        let pages = layout_report(&summary, "plant.csv", generated_at());
        assert_eq!(pages.len(), 1);
        assert_eq!(
            texts(&pages[0]),
            vec![
                REPORT_TITLE,
                "Dataset: plant.csv",
                "Generated: 2024-03-09 14:05 UTC",
                "Key Metrics",
                "Total Records: 3",
                "Average Flowrate: 15.0",
                "Average Pressure: 3.33",
                "Average Temperature: N/A",
                "Equipment Type Distribution",
                "Pump: 2",
                "Valve: 1",
            ]
        );
        assert_eq!(pages[0].lines[0].font, ReportFont::Bold);
        assert_eq!(pages[0].lines[0].y, PAGE_HEIGHT - MARGIN);
    }

    #[test]
    fn test_empty_distribution_prints_explanation() {
        let pages = layout_report(&Summary::default(), "empty.csv", generated_at());
        let lines = texts(&pages[0]);
        assert_eq!(lines.last(), Some(&NO_TYPE_INFORMATION));
        assert!(lines.contains(&"Average Flowrate: N/A"));
        assert!(lines.contains(&"Total Records: 0"));
    }

    #[test]
    fn test_long_distribution_continues_on_new_pages() {
        let distribution: TypeDistribution =
            (0..100).map(|i| (format!("Type {}", i), 1u64)).collect();
        let summary = Summary {
            total_records: 100,
            type_distribution: distribution,
            ..Summary::default()
        };

        let pages = layout_report(&summary, "many.csv", generated_at());
        assert_eq!(pages.len(), 3);

        // 32 entries fit below the header block, 44 on a full page
        assert_eq!(pages[0].lines.len(), 9 + 32);
        assert_eq!(pages[1].lines.len(), 44);
        assert_eq!(pages[2].lines.len(), 24);
        assert_eq!(pages[1].lines[0].text, "Type 32: 1");
        assert_eq!(pages[1].lines[0].y, PAGE_HEIGHT - MARGIN);

        for page in &pages {
            assert!(page.lines.iter().all(|line| line.y >= MARGIN));
        }
    }

    #[test]
    fn test_format_average() {
        assert_eq!(format_average(None), "N/A");
        assert_eq!(format_average(Some(15.0)), "15.0");
        assert_eq!(format_average(Some(3.33)), "3.33");
        assert_eq!(format_average(Some(-0.5)), "-0.5");
    }
}
