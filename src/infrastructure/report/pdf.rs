use encoding_rs::WINDOWS_1252;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

use super::layout::{PageLayout, ReportFont, PAGE_HEIGHT, PAGE_WIDTH, REPORT_TITLE};
use crate::domain::error::{AppError, Result};

const REGULAR_FONT_KEY: &str = "F1";
const BOLD_FONT_KEY: &str = "F2";

/// Encode laid-out pages as a PDF document using the standard Helvetica fonts.
pub fn encode_pdf(pages: &[PageLayout], dataset_name: &str) -> Result<Vec<u8>> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let regular_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            REGULAR_FONT_KEY => regular_id,
            BOLD_FONT_KEY => bold_id,
        },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for page in pages {
        let content = Content {
            operations: page_operations(page),
        };
        let encoded = content
            .encode()
            .map_err(|e| AppError::Internal(format!("Failed to encode report page: {}", e)))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let page_count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal(encode_win_ansi(REPORT_TITLE)),
        "Subject" => Object::string_literal(encode_win_ansi(dataset_name)),
        "Producer" => Object::string_literal("equipment-summary"),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| AppError::Internal(format!("Failed to write report PDF: {}", e)))?;
    Ok(buffer)
}

fn page_operations(page: &PageLayout) -> Vec<Operation> {
    let mut operations = Vec::with_capacity(page.lines.len() * 5);
    for line in &page.lines {
        let font_key = match line.font {
            ReportFont::Regular => REGULAR_FONT_KEY,
            ReportFont::Bold => BOLD_FONT_KEY,
        };
        operations.push(Operation::new("BT", vec![]));
        operations.push(Operation::new(
            "Tf",
            vec![Object::Name(font_key.as_bytes().to_vec()), line.size.into()],
        ));
        operations.push(Operation::new("Td", vec![line.x.into(), line.y.into()]));
        operations.push(Operation::new(
            "Tj",
            vec![Object::string_literal(encode_win_ansi(&line.text))],
        ));
        operations.push(Operation::new("ET", vec![]));
    }
    operations
}

/// Encode text for the WinAnsi standard fonts; unmappable characters become `?`
pub fn encode_win_ansi(text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(text.len());
    let mut scratch = [0u8; 4];
    for ch in text.chars() {
        let (encoded, _, had_errors) = WINDOWS_1252.encode(ch.encode_utf8(&mut scratch));
        if had_errors {
            bytes.push(b'?');
        } else {
            bytes.extend_from_slice(&encoded);
        }
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::summary::Summary;
    use crate::infrastructure::report::{layout_report, render_report, render_report_at};
    use chrono::{TimeZone, Utc};

    /// Collect the `Tj` strings of every page, in drawing order
    fn page_texts(bytes: &[u8]) -> Vec<Vec<Vec<u8>>> {
        let doc = Document::load_mem(bytes).unwrap();
        doc.get_pages()
            .into_values()
            .map(|page_id| {
                let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();
                content
                    .operations
                    .iter()
                    .filter(|op| op.operator == "Tj")
                    .map(|op| op.operands[0].as_str().unwrap().to_vec())
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_pdf_contains_report_lines() {
        let summary = Summary {
            total_records: 3,
            avg_flowrate: Some(15.0),
            avg_pressure: Some(3.33),
            avg_temperature: Some(300.0),
            type_distribution: vec![("Pump", 2u64), ("Valve", 1)].into_iter().collect(),
        };
        let generated_at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let bytes = render_report_at(&summary, "plant (1).csv", generated_at).unwrap();

        assert!(bytes.starts_with(b"%PDF-1.5"));
        let pages = page_texts(&bytes);
        assert_eq!(pages.len(), 1);

        let lines: Vec<String> = pages[0]
            .iter()
            .map(|raw| String::from_utf8(raw.clone()).unwrap())
            .collect();
        assert_eq!(lines[1], "Dataset: plant (1).csv");
        assert_eq!(lines[2], "Generated: 2024-01-02 03:04 UTC");
        assert!(lines.contains(&"Average Temperature: 300.0".to_string()));
        assert!(lines.contains(&"Valve: 1".to_string()));
    }

    #[test]
    fn test_render_is_total_for_empty_summary() {
        let bytes = render_report(&Summary::default(), "").unwrap();
        let pages = page_texts(&bytes);
        assert_eq!(pages.len(), 1);
        assert_eq!(
            pages[0].last().map(|raw| raw.as_slice()),
            Some(b"No type information available.".as_slice())
        );
    }

    #[test]
    fn test_pdf_page_count_matches_layout() {
        let summary = Summary {
            total_records: 80,
            type_distribution: (0..80).map(|i| (format!("T{}", i), 1u64)).collect(),
            ..Summary::default()
        };
        let generated_at = Utc::now();
        let layout = layout_report(&summary, "wide.csv", generated_at);
        let bytes = render_report_at(&summary, "wide.csv", generated_at).unwrap();
        assert_eq!(layout.len(), 3);
        assert_eq!(layout[2].lines.len(), 4);
        assert_eq!(page_texts(&bytes).len(), 3);
    }

    #[test]
    fn test_encode_win_ansi() {
        assert_eq!(encode_win_ansi("Réacteur"), b"R\xE9acteur".to_vec());
        assert_eq!(encode_win_ansi("泵 Pump"), b"? Pump".to_vec());
        assert_eq!(encode_win_ansi("€"), vec![0x80]);
    }
}
