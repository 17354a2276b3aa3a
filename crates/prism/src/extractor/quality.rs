//! Data-quality score: `0.7 × non-empty ratio + 0.3 × type-validity ratio`.
//!
//! A non-empty cell is type-valid when its kind matches the dominant kind
//! of its column. Empty tables score 0.

use std::collections::HashMap;

use super::cell::CellKind;
use super::Table;

const NON_EMPTY_WEIGHT: f64 = 0.7;
const TYPE_VALIDITY_WEIGHT: f64 = 0.3;

pub fn data_quality(table: &Table) -> f64 {
    let width = table.width();
    let total_cells = width * table.rows.len();
    if total_cells == 0 {
        return 0.0;
    }

    let mut non_empty = 0usize;
    let mut valid = 0usize;

    for col in 0..width {
        let mut counts: HashMap<CellKind, usize> = HashMap::new();
        for row in &table.rows {
            if let Some(kind) = row.get(col).and_then(|c| c.kind()) {
                *counts.entry(kind).or_default() += 1;
            }
        }
        let column_non_empty: usize = counts.values().sum();
        let dominant = counts.values().copied().max().unwrap_or(0);
        non_empty += column_non_empty;
        valid += dominant;
    }

    let non_empty_ratio = non_empty as f64 / total_cells as f64;
    let validity_ratio = if non_empty == 0 {
        0.0
    } else {
        valid as f64 / non_empty as f64
    };

    (NON_EMPTY_WEIGHT * non_empty_ratio + TYPE_VALIDITY_WEIGHT * validity_ratio).clamp(0.0, 1.0)
}
