// ============================================================
// CANONICAL COLUMNS
// ============================================================
// The fixed set of equipment columns the summarizer understands

use serde::{Deserialize, Serialize};

/// A recognized equipment column, independent of the casing used in the upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CanonicalColumn {
    EquipmentName,
    Type,
    Flowrate,
    Pressure,
    Temperature,
}

impl CanonicalColumn {
    pub const ALL: [CanonicalColumn; 5] = [
        CanonicalColumn::EquipmentName,
        CanonicalColumn::Type,
        CanonicalColumn::Flowrate,
        CanonicalColumn::Pressure,
        CanonicalColumn::Temperature,
    ];

    /// Numeric columns averaged into the summary
    pub const NUMERIC: [CanonicalColumn; 3] = [
        CanonicalColumn::Flowrate,
        CanonicalColumn::Pressure,
        CanonicalColumn::Temperature,
    ];

    /// Title-cased spelling used as the column name after normalization
    pub fn name(&self) -> &'static str {
        match self {
            CanonicalColumn::EquipmentName => "Equipment Name",
            CanonicalColumn::Type => "Type",
            CanonicalColumn::Flowrate => "Flowrate",
            CanonicalColumn::Pressure => "Pressure",
            CanonicalColumn::Temperature => "Temperature",
        }
    }

    /// Match a raw header against the recognized set.
    ///
    /// Surrounding whitespace is ignored and the comparison is case-insensitive,
    /// so `" FLOWRATE "` resolves to [`CanonicalColumn::Flowrate`].
    pub fn match_header(header: &str) -> Option<Self> {
        let trimmed = header.trim();
        Self::ALL
            .into_iter()
            .find(|column| column.name().eq_ignore_ascii_case(trimmed))
    }
}

impl std::fmt::Display for CanonicalColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
