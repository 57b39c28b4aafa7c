use std::str::FromStr;

use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive, Zero};

use crate::domain::csv::{CanonicalColumn, NormalizedTable};
use crate::domain::summary::{Summary, TypeDistribution};

/// Label used for rows whose Type cell is missing
pub const UNKNOWN_TYPE: &str = "Unknown";

/// Decimal places kept on averaged values
pub const AVERAGE_SCALE: i64 = 2;

/// Largest decimal scale summed exactly; finer values go through `f64`
const MAX_EXACT_SCALE: i64 = 400;

/// Compute the summary of a normalized table.
///
/// Pure and deterministic: averages are exact decimal means rounded
/// half-to-even, and the distribution keeps first-seen label order.
pub fn summarize(table: &NormalizedTable) -> Summary {
    let mut summary = Summary {
        total_records: table.row_count() as u64,
        ..Summary::default()
    };

    for column in CanonicalColumn::NUMERIC {
        let average = column_average(table, column);
        match column {
            CanonicalColumn::Flowrate => summary.avg_flowrate = average,
            CanonicalColumn::Pressure => summary.avg_pressure = average,
            CanonicalColumn::Temperature => summary.avg_temperature = average,
            _ => {}
        }
    }

    summary.type_distribution = type_distribution(table);
    summary
}

fn column_average(table: &NormalizedTable, column: CanonicalColumn) -> Option<f64> {
    let index = table.column_index(column.name())?;

    let mut sum = BigDecimal::zero();
    let mut count: u64 = 0;
    for value in table.column_values(index).flatten().filter_map(parse_decimal) {
        sum += value;
        count += 1;
    }

    if count == 0 {
        return None;
    }

    let mean = sum / BigDecimal::from(count);
    round_half_even(&mean).to_f64()
}

/// Parse a cell as a finite decimal, ignoring surrounding whitespace
pub fn parse_decimal(raw: &str) -> Option<BigDecimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let value = BigDecimal::from_str(trimmed).ok()?;
    let float = value.to_f64().filter(|f| f.is_finite())?;

    let (_, scale) = value.as_bigint_and_exponent();
    if scale.abs() <= MAX_EXACT_SCALE {
        return Some(value);
    }

    // f64 Display never uses exponent notation, so the scale stays bounded
    BigDecimal::from_str(&float.to_string()).ok()
}

pub fn round_half_even(value: &BigDecimal) -> BigDecimal {
    value.with_scale_round(AVERAGE_SCALE, RoundingMode::HalfEven)
}

fn type_distribution(table: &NormalizedTable) -> TypeDistribution {
    // "Type" after normalization, but tolerate tables built elsewhere
    let Some(index) = table.find_column_ignore_case(CanonicalColumn::Type.name()) else {
        return TypeDistribution::new();
    };

    table
        .column_values(index)
        .fold(TypeDistribution::new(), |mut distribution, cell| {
            let label = cell.map(str::trim).unwrap_or(UNKNOWN_TYPE);
            distribution.increment(label);
            distribution
        })
}
