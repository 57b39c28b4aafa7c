// ============================================================
// NORMALIZED TABLE
// ============================================================
// Parsed upload with canonical column names and raw text cells

use serde::{Deserialize, Serialize};

/// An ordered, header-aware table of raw cell values.
///
/// Every row holds exactly one cell per column. A cell is `None` when the
/// source cell was empty or the row was shorter than the header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTable {
    /// Column names in source order
    columns: Vec<String>,

    /// Row cells, aligned with `columns`
    rows: Vec<Vec<Option<String>>>,
}

impl NormalizedTable {
    /// Build a table, padding short rows with missing cells.
    ///
    /// Rows longer than the header are truncated; callers that must reject
    /// them (the CSV normalizer does) check before building.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut cells| {
                cells.resize(width, None);
                cells
            })
            .collect();

        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Exact lookup of a column position
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Case-insensitive lookup, first match wins
    pub fn find_column_ignore_case(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))
    }

    /// All cells of one column, top to bottom
    pub fn column_values(&self, index: usize) -> impl Iterator<Item = Option<&str>> + '_ {
        self.rows
            .iter()
            .map(move |cells| cells.get(index).and_then(|cell| cell.as_deref()))
    }

    pub fn rows(&self) -> impl Iterator<Item = TableRow<'_>> + '_ {
        self.rows.iter().map(move |cells| TableRow {
            columns: &self.columns,
            cells,
        })
    }
}

/// Borrowed view of a single row, addressable by column name
#[derive(Debug, Clone, Copy)]
pub struct TableRow<'a> {
    columns: &'a [String],
    cells: &'a [Option<String>],
}

impl<'a> TableRow<'a> {
    pub fn get(&self, column: &str) -> Option<&'a str> {
        let index = self.columns.iter().position(|name| name == column)?;
        self.cells.get(index).and_then(|cell| cell.as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, Option<&'a str>)> + 'a {
        let cells = self.cells;
        self.columns
            .iter()
            .enumerate()
            .map(move |(idx, name)| (name.as_str(), cells.get(idx).and_then(|c| c.as_deref())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(value: &str) -> Option<String> {
        Some(value.to_string())
    }

    #[test]
    fn test_short_rows_are_padded() {
        let table = NormalizedTable::new(
            vec!["Type".to_string(), "Flowrate".to_string()],
            vec![vec![cell("Pump")]],
        );

        let row = table.rows().next().unwrap();
        assert_eq!(row.get("Type"), Some("Pump"));
        assert_eq!(row.get("Flowrate"), None);
        assert_eq!(table.row_count(), 1);
    }

    #[test]
    fn test_case_insensitive_column_lookup() {
        let table = NormalizedTable::new(vec!["Name".to_string(), "TYPE".to_string()], vec![]);
        assert_eq!(table.column_index("Type"), None);
        assert_eq!(table.find_column_ignore_case("type"), Some(1));
    }

    #[test]
    fn test_column_values_follow_row_order() {
        let table = NormalizedTable::new(
            vec!["Pressure".to_string()],
            vec![vec![cell("1")], vec![None], vec![cell("3")]],
        );
        let values: Vec<_> = table.column_values(0).collect();
        assert_eq!(values, vec![Some("1"), None, Some("3")]);
    }
}
