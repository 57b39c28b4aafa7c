// ============================================================
// TABLE NORMALIZER
// ============================================================
// Parse uploaded CSV bytes into a table with canonical column names

use std::borrow::Cow;

use csv::{ReaderBuilder, StringRecord, Trim};
use encoding_rs::{Encoding, WINDOWS_1252};

use crate::domain::csv::{CanonicalColumn, NormalizedTable};
use crate::domain::error::{AppError, Result};

/// CSV normalizer for equipment uploads
pub struct TableNormalizer {
    /// Delimiter character (default: comma)
    delimiter: u8,
}

impl Default for TableNormalizer {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

impl TableNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set custom delimiter
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Parse raw upload bytes.
    ///
    /// Fails with [`AppError::MalformedInput`] when there is no header row or a
    /// data row carries more fields than the header. Cell values are kept as
    /// raw text; empty cells become missing values.
    pub fn normalize(&self, raw: &[u8]) -> Result<NormalizedTable> {
        let content = decode_upload(raw);
        if content.trim().is_empty() {
            return Err(AppError::MalformedInput(
                "No columns to parse from file".to_string(),
            ));
        }

        let mut reader = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .trim(Trim::None)
            .flexible(true)
            .from_reader(content.as_bytes());

        let headers = reader
            .headers()
            .map_err(|e| AppError::MalformedInput(format!("Failed to read CSV headers: {}", e)))?
            .clone();

        if headers.iter().all(|header| header.trim().is_empty()) {
            return Err(AppError::MalformedInput(
                "No parseable header row".to_string(),
            ));
        }

        let columns = normalize_headers(&headers);
        let width = columns.len();

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result.map_err(|e| {
                AppError::MalformedInput(format!("Failed to parse CSV row {}: {}", rows.len() + 1, e))
            })?;

            if record.len() > width {
                let line = record.position().map(|p| p.line()).unwrap_or(0);
                return Err(AppError::MalformedInput(format!(
                    "Expected {} fields in line {}, saw {}",
                    width,
                    line,
                    record.len()
                )));
            }

            rows.push(parse_cells(&record));
        }

        Ok(NormalizedTable::new(columns, rows))
    }
}

/// Decode upload bytes to text.
///
/// A byte-order mark picks the encoding. Otherwise valid UTF-8 is used as is
/// and anything else is read as Windows-1252.
pub fn decode_upload(raw: &[u8]) -> Cow<'_, str> {
    if let Some((encoding, bom_len)) = Encoding::for_bom(raw) {
        let (text, _) = encoding.decode_without_bom_handling(&raw[bom_len..]);
        return text;
    }

    match std::str::from_utf8(raw) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => {
            let (text, _) = WINDOWS_1252.decode_without_bom_handling(raw);
            text
        }
    }
}

fn normalize_headers(headers: &StringRecord) -> Vec<String> {
    let mut columns: Vec<String> = Vec::with_capacity(headers.len());

    for (idx, raw) in headers.iter().enumerate() {
        let trimmed = raw.trim();
        let name = if trimmed.is_empty() {
            format!("Unnamed: {}", idx)
        } else {
            match CanonicalColumn::match_header(trimmed) {
                Some(column) => column.name().to_string(),
                None => trimmed.to_string(),
            }
        };

        let name = dedupe_column_name(name, &columns);
        columns.push(name);
    }

    columns
}

fn dedupe_column_name(name: String, existing: &[String]) -> String {
    if !existing.contains(&name) {
        return name;
    }

    let mut suffix = 1;
    loop {
        let candidate = format!("{}.{}", name, suffix);
        if !existing.contains(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

fn parse_cells(record: &StringRecord) -> Vec<Option<String>> {
    record
        .iter()
        .map(|value| {
            if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Equipment Name,Type,Flowrate,Pressure,Temperature\n\
                          Pump1,Pump,10,2,300\n\
                          Pump2,Pump,20,3,310\n\
                          Valve1,Valve,,5,290\n";

    #[test]
    fn test_normalize_sample_upload() {
        let table = TableNormalizer::new().normalize(SAMPLE.as_bytes()).unwrap();

        assert_eq!(
            table.columns(),
            &["Equipment Name", "Type", "Flowrate", "Pressure", "Temperature"]
        );
        assert_eq!(table.row_count(), 3);

        let valve = table.rows().nth(2).unwrap();
        assert_eq!(valve.get("Equipment Name"), Some("Valve1"));
        assert_eq!(valve.get("Flowrate"), None);
        assert_eq!(valve.get("Temperature"), Some("290"));
    }

    #[test]
    fn test_headers_are_trimmed_and_canonicalized() {
        let content = " equipment NAME , TYPE,flowrate ,Operator \nP1,Pump,1,ann\n";
        let table = TableNormalizer::new().normalize(content.as_bytes()).unwrap();
        assert_eq!(
            table.columns(),
            &["Equipment Name", "Type", "Flowrate", "Operator"]
        );
    }

    #[test]
    fn test_values_are_kept_as_raw_text() {
        let content = "Flowrate,Type\n 10.50 , Pump \n";
        let table = TableNormalizer::new().normalize(content.as_bytes()).unwrap();
        let row = table.rows().next().unwrap();
        assert_eq!(row.get("Flowrate"), Some(" 10.50 "));
        assert_eq!(row.get("Type"), Some(" Pump "));
    }

    #[test]
    fn test_blank_and_duplicate_headers() {
        let content = "Type,,type,Type\na,b,c,d\n";
        let table = TableNormalizer::new().normalize(content.as_bytes()).unwrap();
        assert_eq!(table.columns(), &["Type", "Unnamed: 1", "Type.1", "Type.2"]);
    }

    #[test]
    fn test_short_rows_and_blank_lines() {
        let content = "Type,Flowrate,Pressure\nPump,1\n\nValve,2,3\n";
        let table = TableNormalizer::new().normalize(content.as_bytes()).unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.rows().next().unwrap().get("Pressure"), None);
    }

    #[test]
    fn test_header_only_upload_has_no_rows() {
        let table = TableNormalizer::new()
            .normalize(b"Type,Flowrate\n")
            .unwrap();
        assert!(table.is_empty());
        assert_eq!(table.columns().len(), 2);
    }

    #[test]
    fn test_empty_upload_is_malformed() {
        let err = TableNormalizer::new().normalize(b"").unwrap_err();
        assert!(matches!(err, AppError::MalformedInput(_)));

        let err = TableNormalizer::new().normalize(b"  \n\n").unwrap_err();
        assert!(matches!(err, AppError::MalformedInput(_)));
    }

    #[test]
    fn test_row_wider_than_header_is_malformed() {
        let content = "Type,Flowrate\nPump,1\nValve,2,3\n";
        let err = TableNormalizer::new().normalize(content.as_bytes()).unwrap_err();
        match err {
            AppError::MalformedInput(msg) => {
                assert!(msg.contains("Expected 2 fields in line 3, saw 3"), "{msg}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_custom_delimiter() {
        let content = "Type;Flowrate\nPump;4\n";
        let table = TableNormalizer::new()
            .with_delimiter(b';')
            .normalize(content.as_bytes())
            .unwrap();
        assert_eq!(table.columns(), &["Type", "Flowrate"]);
    }

    #[test]
    fn test_decode_upload_handles_bom_and_legacy_bytes() {
        let with_bom = b"\xEF\xBB\xBFType\nPump\n";
        assert_eq!(decode_upload(with_bom), "Type\nPump\n");

        let latin = b"Type\nR\xE9acteur\n";
        assert_eq!(decode_upload(latin), "Type\nRéacteur\n");
    }

    #[test]
    fn test_whitespace_cells_are_values_not_missing() {
        let content = "Type,Flowrate\n   ,\n";
        let table = TableNormalizer::new().normalize(content.as_bytes()).unwrap();
        let row = table.rows().next().unwrap();
        assert_eq!(row.get("Type"), Some("   "));
        assert_eq!(row.get("Flowrate"), None);
    }
}
