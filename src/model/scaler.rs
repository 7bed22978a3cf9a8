use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::FeatureTable;

/// Why a feature table could not be standardised.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScaleError {
    #[error("X has {got} features, but StandardScaler is expecting {expected} features as input.")]
    FeatureCount { got: usize, expected: usize },

    #[error(
        "The feature names should match those that were passed during fit. \
         Expected [{}], got [{}]",
        .expected.join(", "),
        .got.join(", ")
    )]
    FeatureNames { got: Vec<String>, expected: Vec<String> },

    #[error("Row {row} has {got} values, expected {expected}")]
    RaggedRow { row: usize, got: usize, expected: usize },

    #[error("Input X contains infinity or a value too large for dtype('float64').")]
    Infinite,
}

/// Per-feature standardisation: `(x - mean) / scale`.
///
/// The JSON layout mirrors a fitted scikit-learn `StandardScaler`, so the
/// trailing-underscore attribute names are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    #[serde(alias = "mean_")]
    pub mean: Vec<f64>,
    #[serde(alias = "scale_")]
    pub scale: Vec<f64>,
    #[serde(
        default,
        alias = "feature_names_in_",
        skip_serializing_if = "Option::is_none"
    )]
    pub feature_names: Option<Vec<String>>,
}

impl StandardScaler {
    /// Fit on raw rows using the population standard deviation. Constant
    /// features get a scale of 1.
    pub fn fit(rows: &[Vec<f64>], feature_names: Option<Vec<String>>) -> Result<Self> {
        let Some(first) = rows.first() else {
            bail!("cannot fit a scaler on zero rows");
        };
        let k = first.len();
        let n = rows.len() as f64;

        let mut mean = vec![0.0; k];
        for row in rows {
            if row.len() != k {
                bail!("rows have inconsistent widths");
            }
            for (m, &x) in mean.iter_mut().zip(row) {
                *m += x / n;
            }
        }

        let mut var = vec![0.0; k];
        for row in rows {
            for ((v, &x), &m) in var.iter_mut().zip(row).zip(&mean) {
                *v += (x - m).powi(2) / n;
            }
        }
        let scale = var
            .into_iter()
            .map(|v| if v > 0.0 { v.sqrt() } else { 1.0 })
            .collect();

        let scaler = StandardScaler {
            mean,
            scale,
            feature_names,
        };
        scaler.validated()
    }

    /// Check structural consistency after deserialisation. Zero scales are
    /// replaced by 1, matching how a constant feature is fitted.
    pub fn validated(mut self) -> Result<Self> {
        if self.mean.is_empty() {
            bail!("scaler has no features");
        }
        if self.mean.len() != self.scale.len() {
            bail!(
                "scaler has {} means but {} scales",
                self.mean.len(),
                self.scale.len()
            );
        }
        if let Some(names) = &self.feature_names {
            if names.len() != self.mean.len() {
                bail!(
                    "scaler has {} feature names but {} features",
                    names.len(),
                    self.mean.len()
                );
            }
        }
        if let Some(i) = self.mean.iter().position(|m| !m.is_finite()) {
            bail!("scaler mean[{i}] is not finite");
        }
        if let Some(i) = self.scale.iter().position(|s| !s.is_finite() || *s < 0.0) {
            bail!("scaler scale[{i}] must be finite and non-negative");
        }
        for s in &mut self.scale {
            if *s == 0.0 {
                *s = 1.0;
            }
        }
        Ok(self)
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// Standardise every row of `table`. The output has the table's shape.
    /// NaN is carried through; infinite inputs are rejected.
    pub fn transform(&self, table: &FeatureTable) -> Result<Vec<Vec<f64>>, ScaleError> {
        let expected = self.n_features();
        let got = table.columns.len();
        if got != expected {
            return Err(ScaleError::FeatureCount { got, expected });
        }
        if let Some(names) = &self.feature_names {
            if *names != table.columns {
                return Err(ScaleError::FeatureNames {
                    got: table.columns.clone(),
                    expected: names.clone(),
                });
            }
        }

        table
            .rows
            .iter()
            .enumerate()
            .map(|(row, values)| {
                if values.len() != expected {
                    return Err(ScaleError::RaggedRow {
                        row,
                        got: values.len(),
                        expected,
                    });
                }
                if values.iter().any(|x| x.is_infinite()) {
                    return Err(ScaleError::Infinite);
                }
                Ok(values
                    .iter()
                    .zip(self.mean.iter().zip(&self.scale))
                    .map(|(&x, (&m, &s))| (x - m) / s)
                    .collect())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_features() -> StandardScaler {
        StandardScaler {
            mean: vec![1.0, 10.0],
            scale: vec![2.0, 5.0],
            feature_names: Some(vec!["fs1".into(), "ps2".into()]),
        }
    }

    #[test]
    fn transform_preserves_shape_and_standardises() {
        let table = FeatureTable::new(
            vec!["fs1".into(), "ps2".into()],
            vec![vec![3.0, 0.0], vec![1.0, 20.0]],
        );
        let scaled = two_features().transform(&table).unwrap();
        assert_eq!(scaled, vec![vec![1.0, -2.0], vec![0.0, 2.0]]);
    }

    #[test]
    fn nan_passes_through() {
        let table = FeatureTable::new(vec!["fs1".into(), "ps2".into()], vec![vec![f64::NAN, 10.0]]);
        let scaled = two_features().transform(&table).unwrap();
        assert!(scaled[0][0].is_nan());
        assert_eq!(scaled[0][1], 0.0);
    }

    #[test]
    fn infinite_input_is_rejected() {
        let table = FeatureTable::new(
            vec!["fs1".into(), "ps2".into()],
            vec![vec![1.0, 10.0], vec![f64::NEG_INFINITY, 10.0]],
        );
        let err = two_features().transform(&table).unwrap_err();
        assert_eq!(err, ScaleError::Infinite);
        assert_eq!(
            err.to_string(),
            "Input X contains infinity or a value too large for dtype('float64')."
        );
    }

    #[test]
    fn wrong_width_is_reported() {
        let table = FeatureTable::new(vec!["fs1".into()], vec![vec![3.0]]);
        let err = two_features().transform(&table).unwrap_err();
        assert_eq!(err, ScaleError::FeatureCount { got: 1, expected: 2 });
        assert_eq!(
            err.to_string(),
            "X has 1 features, but StandardScaler is expecting 2 features as input."
        );
    }

    #[test]
    fn reordered_names_are_rejected() {
        let table = FeatureTable::new(vec!["ps2".into(), "fs1".into()], vec![vec![0.0, 0.0]]);
        let err = two_features().transform(&table).unwrap_err();
        assert!(matches!(err, ScaleError::FeatureNames { .. }));
    }

    #[test]
    fn unnamed_scaler_only_checks_width() {
        let scaler = StandardScaler {
            feature_names: None,
            ..two_features()
        };
        let table = FeatureTable::new(vec!["x".into(), "y".into()], vec![vec![1.0, 10.0]]);
        assert_eq!(scaler.transform(&table).unwrap(), vec![vec![0.0, 0.0]]);
    }

    #[test]
    fn sklearn_attribute_names_deserialize() {
        let json = r#"{"mean_": [0.5], "scale_": [0.0], "feature_names_in_": ["fs1"]}"#;
        let scaler: StandardScaler = serde_json::from_str(json).unwrap();
        let scaler = scaler.validated().unwrap();
        assert_eq!(scaler.scale, vec![1.0]);
        assert_eq!(scaler.feature_names, Some(vec!["fs1".to_string()]));
    }

    #[test]
    fn inconsistent_parameters_fail_validation() {
        let scaler = StandardScaler {
            mean: vec![0.0, 1.0],
            scale: vec![1.0],
            feature_names: None,
        };
        assert!(scaler.validated().is_err());

        let scaler = StandardScaler {
            mean: vec![f64::NAN],
            scale: vec![1.0],
            feature_names: None,
        };
        assert!(scaler.validated().is_err());
    }

    #[test]
    fn fit_centres_and_scales() {
        let rows = vec![vec![1.0, 5.0], vec![3.0, 5.0]];
        let scaler = StandardScaler::fit(&rows, None).unwrap();
        assert_eq!(scaler.mean, vec![2.0, 5.0]);
        assert_eq!(scaler.scale, vec![1.0, 1.0]);
    }
}
