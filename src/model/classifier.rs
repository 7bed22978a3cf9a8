use anyhow::{bail, ensure, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Why a batch of scaled rows could not be classified.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClassifyError {
    #[error("X has {got} features, but the classifier is expecting {expected} features as input.")]
    FeatureCount { got: usize, expected: usize },

    #[error("Input X contains NaN.")]
    NaN,

    #[error("Input X contains infinity.")]
    Infinite,

    #[error("Found array with 0 sample(s) while a minimum of 1 is required.")]
    Empty,

    #[error("only a single prediction can be converted to a classification, got {0}")]
    NotScalar(usize),

    #[error("classifier parameters are inconsistent with its structure")]
    Malformed,
}

fn binary_classes() -> Vec<i64> {
    vec![0, 1]
}

// ---------------------------------------------------------------------------
// Classifier – the serialized decision function
// ---------------------------------------------------------------------------

/// A pre-trained binary classifier, tagged by `kind` in its JSON file:
///
/// ```json
/// { "kind": "logistic", "coef": [...], "intercept": -0.3 }
/// { "kind": "forest", "n_features": 12, "trees": [ { "children_left": [...], ... } ] }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classifier {
    Logistic(LinearModel),
    Forest(TreeEnsemble),
}

impl Classifier {
    /// Structural checks run once at load time. A classifier that skipped
    /// them fails in `predict` with `ClassifyError::Malformed`.
    pub fn validated(self) -> Result<Self> {
        match &self {
            Classifier::Logistic(m) => m.validate()?,
            Classifier::Forest(f) => f.validate()?,
        }
        Ok(self)
    }

    pub fn n_features(&self) -> usize {
        match self {
            Classifier::Logistic(m) => m.coef.len(),
            Classifier::Forest(f) => f.n_features,
        }
    }

    /// One label per input row.
    pub fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<i64>, ClassifyError> {
        self.check_input(rows)?;
        let labels: Option<Vec<i64>> = match self {
            Classifier::Logistic(m) => rows.iter().map(|r| m.predict_row(r)).collect(),
            Classifier::Forest(f) => rows.iter().map(|r| f.predict_row(r)).collect(),
        };
        labels.ok_or(ClassifyError::Malformed)
    }

    fn check_input(&self, rows: &[Vec<f64>]) -> Result<(), ClassifyError> {
        if rows.is_empty() {
            return Err(ClassifyError::Empty);
        }
        let expected = self.n_features();
        for row in rows {
            if row.len() != expected {
                return Err(ClassifyError::FeatureCount {
                    got: row.len(),
                    expected,
                });
            }
            if row.iter().any(|x| x.is_nan()) {
                return Err(ClassifyError::NaN);
            }
            if row.iter().any(|x| x.is_infinite()) {
                return Err(ClassifyError::Infinite);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Linear model
// ---------------------------------------------------------------------------

/// Logistic regression: class 1 when `coef · x + intercept > 0`.
///
/// scikit-learn stores `coef_` as a `(1, n_features)` matrix and `intercept_`
/// as a one-element array; both shapes are accepted alongside flat values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    #[serde(alias = "coef_", deserialize_with = "single_row")]
    pub coef: Vec<f64>,
    #[serde(alias = "intercept_", deserialize_with = "single_value")]
    pub intercept: f64,
    /// `[negative, positive]` labels.
    #[serde(default = "binary_classes", alias = "classes_")]
    pub classes: Vec<i64>,
}

impl LinearModel {
    fn validate(&self) -> Result<()> {
        ensure!(!self.coef.is_empty(), "linear model has no coefficients");
        ensure!(
            self.classes.len() == 2,
            "linear model needs exactly 2 classes, got {}",
            self.classes.len()
        );
        ensure!(
            self.coef.iter().all(|c| c.is_finite()) && self.intercept.is_finite(),
            "linear model parameters must be finite"
        );
        Ok(())
    }

    fn decision(&self, row: &[f64]) -> f64 {
        self.coef.iter().zip(row).map(|(c, x)| c * x).sum::<f64>() + self.intercept
    }

    fn predict_row(&self, row: &[f64]) -> Option<i64> {
        if self.classes.len() != 2 || row.len() != self.coef.len() {
            return None;
        }
        let class = usize::from(self.decision(row) > 0.0);
        Some(self.classes[class])
    }
}

fn single_row<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<f64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Coef {
        Flat(Vec<f64>),
        Matrix(Vec<Vec<f64>>),
    }

    match Coef::deserialize(deserializer)? {
        Coef::Flat(coef) => Ok(coef),
        Coef::Matrix(mut rows) if rows.len() == 1 => Ok(rows.remove(0)),
        Coef::Matrix(rows) => Err(D::Error::custom(format!(
            "binary coef must have exactly 1 row, got {}",
            rows.len()
        ))),
    }
}

fn single_value<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Intercept {
        Scalar(f64),
        Array(Vec<f64>),
    }

    match Intercept::deserialize(deserializer)? {
        Intercept::Scalar(v) => Ok(v),
        Intercept::Array(values) => match values.as_slice() {
            [v] => Ok(*v),
            _ => Err(D::Error::custom(format!(
                "binary intercept must have exactly 1 value, got {}",
                values.len()
            ))),
        },
    }
}

// ---------------------------------------------------------------------------
// Tree ensemble
// ---------------------------------------------------------------------------

/// Marker in `children_left` / `children_right` for a leaf node.
const LEAF: i64 = -1;

/// One fitted decision tree in parallel-array layout: node `i` splits on
/// `feature[i] <= threshold[i]` and, at a leaf, holds per-class weights in
/// `value[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub children_left: Vec<i64>,
    pub children_right: Vec<i64>,
    pub feature: Vec<i64>,
    pub threshold: Vec<f64>,
    pub value: Vec<Vec<f64>>,
}

impl DecisionTree {
    fn validate(&self, n_features: usize, n_classes: usize) -> Result<()> {
        let n = self.children_left.len();
        ensure!(n > 0, "tree has no nodes");
        ensure!(
            self.children_right.len() == n
                && self.feature.len() == n
                && self.threshold.len() == n
                && self.value.len() == n,
            "tree node arrays have different lengths"
        );

        for node in 0..n {
            let (left, right) = (self.children_left[node], self.children_right[node]);
            if left == LEAF {
                ensure!(right == LEAF, "node {node}: only one child is a leaf marker");
                let weights = &self.value[node];
                ensure!(
                    weights.len() == n_classes,
                    "node {node}: {} leaf weights for {n_classes} classes",
                    weights.len()
                );
                ensure!(
                    weights.iter().all(|w| w.is_finite() && *w >= 0.0)
                        && weights.iter().sum::<f64>() > 0.0,
                    "node {node}: leaf weights must be non-negative with a positive sum"
                );
                continue;
            }
            // Children always follow their parent, which also rules out cycles.
            for child in [left, right] {
                if child <= node as i64 || child >= n as i64 {
                    bail!("node {node}: child index {child} out of range");
                }
            }
            let f = self.feature[node];
            ensure!(
                f >= 0 && (f as usize) < n_features,
                "node {node}: feature index {f} out of range for {n_features} features"
            );
            ensure!(
                !self.threshold[node].is_nan(),
                "node {node}: threshold is NaN"
            );
        }
        Ok(())
    }

    /// Leaf weights reached by `row`, normalised to probabilities. `None`
    /// when the walk leaves the node arrays or does not reach a leaf.
    fn predict_proba(&self, row: &[f64]) -> Option<Vec<f64>> {
        let mut node = 0usize;
        for _ in 0..self.children_left.len() {
            let left = *self.children_left.get(node)?;
            if left == LEAF {
                let weights = self.value.get(node)?;
                let total: f64 = weights.iter().sum();
                return Some(weights.iter().map(|w| w / total).collect());
            }
            let feature = usize::try_from(*self.feature.get(node)?).ok()?;
            let next = if *row.get(feature)? <= *self.threshold.get(node)? {
                left
            } else {
                *self.children_right.get(node)?
            };
            node = usize::try_from(next).ok()?;
        }
        None
    }
}

/// Random forest (or a single tree): class probabilities averaged over trees,
/// highest wins, first class on ties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEnsemble {
    pub n_features: usize,
    #[serde(default = "binary_classes", alias = "classes_")]
    pub classes: Vec<i64>,
    pub trees: Vec<DecisionTree>,
}

impl TreeEnsemble {
    fn validate(&self) -> Result<()> {
        ensure!(self.n_features > 0, "forest has no features");
        ensure!(!self.classes.is_empty(), "forest has no classes");
        ensure!(!self.trees.is_empty(), "forest has no trees");
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features, self.classes.len())
                .map_err(|e| e.context(format!("tree {i}")))?;
        }
        Ok(())
    }

    fn predict_row(&self, row: &[f64]) -> Option<i64> {
        let mut proba = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            let tree_proba = tree.predict_proba(row)?;
            if tree_proba.len() != proba.len() {
                return None;
            }
            for (acc, p) in proba.iter_mut().zip(tree_proba) {
                *acc += p;
            }
        }
        let mut best = 0;
        for (i, p) in proba.iter().enumerate() {
            if *p > proba[best] {
                best = i;
            }
        }
        self.classes.get(best).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logistic() -> Classifier {
        Classifier::Logistic(LinearModel {
            coef: vec![2.0, -1.0],
            intercept: 0.5,
            classes: binary_classes(),
        })
    }

    /// Stump on feature 0 at 0.0 plus a tree that always votes class 1.
    fn forest() -> Classifier {
        let stump = DecisionTree {
            children_left: vec![1, LEAF, LEAF],
            children_right: vec![2, LEAF, LEAF],
            feature: vec![0, -2, -2],
            threshold: vec![0.0, -2.0, -2.0],
            value: vec![vec![5.0, 5.0], vec![9.0, 1.0], vec![1.0, 9.0]],
        };
        let constant = DecisionTree {
            children_left: vec![LEAF],
            children_right: vec![LEAF],
            feature: vec![-2],
            threshold: vec![-2.0],
            value: vec![vec![0.4, 0.6]],
        };
        Classifier::Forest(TreeEnsemble {
            n_features: 2,
            classes: binary_classes(),
            trees: vec![stump, constant],
        })
    }

    #[test]
    fn logistic_predicts_one_label_per_row() {
        let rows = vec![vec![1.0, 0.0], vec![-1.0, 0.0], vec![0.0, 0.5]];
        let labels = logistic().predict(&rows).unwrap();
        // decision: 2.5, -1.5, 0.0 (boundary goes to the negative class)
        assert_eq!(labels, vec![1, 0, 0]);
    }

    #[test]
    fn forest_averages_tree_probabilities() {
        let c = forest().validated().unwrap();
        // left leaf: (0.9 + 0.4, 0.1 + 0.6) -> class 0
        // right leaf: (0.1 + 0.4, 0.9 + 0.6) -> class 1
        assert_eq!(c.predict(&[vec![-1.0, 0.0], vec![1.0, 0.0]]).unwrap(), vec![0, 1]);
        // threshold is inclusive on the left
        assert_eq!(c.predict(&[vec![0.0, 0.0]]).unwrap(), vec![0]);
    }

    #[test]
    fn labels_stay_binary() {
        let rows: Vec<Vec<f64>> = (-20..20).map(|i| vec![i as f64 / 4.0, 1.0]).collect();
        for c in [logistic(), forest()] {
            let labels = c.predict(&rows).unwrap();
            assert_eq!(labels.len(), rows.len());
            assert!(labels.iter().all(|l| *l == 0 || *l == 1));
        }
    }

    #[test]
    fn bad_input_is_rejected() {
        let c = logistic();
        assert_eq!(c.predict(&[]).unwrap_err(), ClassifyError::Empty);
        assert_eq!(
            c.predict(&[vec![1.0]]).unwrap_err(),
            ClassifyError::FeatureCount { got: 1, expected: 2 }
        );
        assert_eq!(c.predict(&[vec![f64::NAN, 0.0]]).unwrap_err(), ClassifyError::NaN);
        assert_eq!(
            c.predict(&[vec![f64::INFINITY, 0.0]]).unwrap_err(),
            ClassifyError::Infinite
        );
        assert_eq!(ClassifyError::NaN.to_string(), "Input X contains NaN.");
    }

    #[test]
    fn json_is_tagged_by_kind() {
        let json = r#"{"kind": "logistic", "coef": [2.0, -1.0], "intercept": 0.5}"#;
        let c: Classifier = serde_json::from_str(json).unwrap();
        assert_eq!(c, logistic());

        let back = serde_json::to_string(&forest()).unwrap();
        let parsed: Classifier = serde_json::from_str(&back).unwrap();
        assert_eq!(parsed.validated().unwrap(), forest());
    }

    #[test]
    fn sklearn_shaped_parameters_deserialize() {
        let json = r#"{
            "kind": "logistic",
            "coef_": [[2.0, -1.0]],
            "intercept_": [0.5],
            "classes_": [0, 1]
        }"#;
        let c: Classifier = serde_json::from_str(json).unwrap();
        assert_eq!(c.validated().unwrap(), logistic());

        let two_rows = r#"{"kind": "logistic", "coef_": [[1.0], [2.0]], "intercept_": [0.0]}"#;
        let err = serde_json::from_str::<Classifier>(two_rows).unwrap_err();
        assert!(err.to_string().contains("exactly 1 row"), "{err}");

        let two_intercepts = r#"{"kind": "logistic", "coef_": [1.0], "intercept_": [0.0, 1.0]}"#;
        assert!(serde_json::from_str::<Classifier>(two_intercepts).is_err());
    }

    #[test]
    fn unvalidated_models_fail_without_panicking() {
        let one_class = Classifier::Logistic(LinearModel {
            coef: vec![1.0],
            intercept: 0.0,
            classes: vec![1],
        });
        assert_eq!(one_class.predict(&[vec![1.0]]).unwrap_err(), ClassifyError::Malformed);

        // child pointing back at the root
        let Classifier::Forest(mut f) = forest() else { unreachable!() };
        f.trees[0].children_left[0] = 0;
        let looping = Classifier::Forest(f);
        assert_eq!(
            looping.predict(&[vec![-1.0, 0.0]]).unwrap_err(),
            ClassifyError::Malformed
        );

        let Classifier::Forest(mut f) = forest() else { unreachable!() };
        f.trees[0].feature[0] = 9;
        f.trees[1].value.clear();
        let out_of_range = Classifier::Forest(f);
        assert_eq!(
            out_of_range.predict(&[vec![1.0, 0.0]]).unwrap_err(),
            ClassifyError::Malformed
        );
    }

    #[test]
    fn malformed_trees_fail_validation() {
        let Classifier::Forest(mut f) = forest() else { unreachable!() };
        f.trees[0].children_left[0] = 0;
        let err = Classifier::Forest(f).validated().unwrap_err();
        assert!(format!("{err:#}").contains("child index 0 out of range"), "{err:#}");

        let Classifier::Forest(mut f) = forest() else { unreachable!() };
        f.trees[0].feature[0] = 5;
        assert!(Classifier::Forest(f).validated().is_err());

        let Classifier::Forest(mut f) = forest() else { unreachable!() };
        f.trees[1].value[0] = vec![1.0];
        assert!(Classifier::Forest(f).validated().is_err());
    }
}
