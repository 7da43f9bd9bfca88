//! Deterministic sample data.

use serde::{Deserialize, Serialize};

/// A small typed record that maps cleanly to CSV, JSONL and Parquet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRow {
    pub id: u64,
    pub name: String,
    pub score: f64,
    pub active: bool,
}

/// `n` rows with ids `0..n`; the same `n` always yields the same rows.
///
/// ```
/// use ironshard::testing::sample_rows;
///
/// let rows = sample_rows(3);
/// assert_eq!(rows[2].id, 2);
/// assert_eq!(rows, sample_rows(3));
/// ```
#[must_use]
pub fn sample_rows(n: u64) -> Vec<SampleRow> {
    (0..n)
        .map(|id| SampleRow {
            id,
            name: format!("user-{id:06}"),
            #[allow(clippy::cast_precision_loss)]
            score: (id % 1000) as f64 / 4.0,
            active: id % 3 != 0,
        })
        .collect()
}
