use std::collections::HashMap;

// ---------------------------------------------------------------------------
// CycleRecord – one row of the processed dataset
// ---------------------------------------------------------------------------

/// A single measurement cycle (one row of the source DataFrame).
#[derive(Debug, Clone, PartialEq)]
pub struct CycleRecord {
    /// Cycle number, the DataFrame index.
    pub cycle_number: i64,
    /// Feature values in dataset column order. Null cells are NaN.
    pub features: Vec<f64>,
    /// Value of the label column. Never fed to the model.
    pub label: f64,
}

// ---------------------------------------------------------------------------
// FeatureTable – request-scoped slice of the dataset
// ---------------------------------------------------------------------------

/// Rows of raw feature values with their column names, label excluded.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl FeatureTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<f64>>) -> Self {
        FeatureTable { columns, rows }
    }

    /// `(rows, features)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.columns.len())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Dataset – the complete loaded dataset
// ---------------------------------------------------------------------------

/// The processed dataset with a pre-computed cycle-number index.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Ordered feature column names (excludes index and label).
    pub feature_names: Vec<String>,
    /// Name of the label column dropped on lookup.
    pub label_column: String,
    /// All records, in file order.
    pub records: Vec<CycleRecord>,
    /// cycle number → positions in `records`.
    positions: HashMap<i64, Vec<usize>>,
}

impl Dataset {
    /// Build the cycle index from the loaded records.
    pub fn from_records(
        feature_names: Vec<String>,
        label_column: String,
        records: Vec<CycleRecord>,
    ) -> Self {
        let mut positions: HashMap<i64, Vec<usize>> = HashMap::with_capacity(records.len());
        for (pos, rec) in records.iter().enumerate() {
            positions.entry(rec.cycle_number).or_default().push(pos);
        }
        Dataset {
            feature_names,
            label_column,
            records,
            positions,
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Exact-match lookup by cycle number. Returns `None` when no row has
    /// that index.
    pub fn lookup(&self, cycle_number: i64) -> Option<FeatureTable> {
        let positions = self.positions.get(&cycle_number)?;
        let rows = positions
            .iter()
            .map(|&pos| self.records[pos].features.clone())
            .collect();
        Some(FeatureTable::new(self.feature_names.clone(), rows))
    }

    /// Count of records per label value, sorted by label. NaN labels are
    /// skipped.
    pub fn label_counts(&self) -> Vec<(f64, usize)> {
        let mut counts: Vec<(f64, usize)> = Vec::new();
        for rec in &self.records {
            if rec.label.is_nan() {
                continue;
            }
            match counts.iter_mut().find(|(label, _)| *label == rec.label) {
                Some((_, n)) => *n += 1,
                None => counts.push((rec.label, 1)),
            }
        }
        counts.sort_by(|a, b| a.0.total_cmp(&b.0));
        counts
    }
}
