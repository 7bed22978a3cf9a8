//! Lookup → scale → classify.

use std::fmt;

use log::{info, warn};
use serde::Serialize;

use crate::config::ArtifactPaths;
use crate::data::{load_dataset, Dataset, DatasetOptions, FeatureTable};
use crate::error::{LoadError, PredictError};
use crate::model::{load_classifier, load_scaler, Classifier, ClassifyError, StandardScaler};

// ---------------------------------------------------------------------------
// Prediction result
// ---------------------------------------------------------------------------

/// Valve condition surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValveCondition {
    #[serde(rename = "Optimale")]
    Optimal,
    #[serde(rename = "Non Optimale")]
    NonOptimal,
}

impl ValveCondition {
    /// `1` is optimal; every other label is not.
    pub fn from_classification(classification: i64) -> Self {
        if classification == 1 {
            ValveCondition::Optimal
        } else {
            ValveCondition::NonOptimal
        }
    }
}

impl fmt::Display for ValveCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValveCondition::Optimal => write!(f, "Optimale"),
            ValveCondition::NonOptimal => write!(f, "Non Optimale"),
        }
    }
}

/// Response body of `POST /predict`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Prediction {
    #[serde(rename = "Condition Valve")]
    pub condition: ValveCondition,
    #[serde(rename = "Classification")]
    pub classification: i64,
}

impl Prediction {
    pub fn from_classification(classification: i64) -> Self {
        Prediction {
            condition: ValveCondition::from_classification(classification),
            classification,
        }
    }
}

// ---------------------------------------------------------------------------
// Predictor – the immutable artifact context
// ---------------------------------------------------------------------------

/// Dataset, scaler and classifier, loaded once and shared read-only by
/// every request.
#[derive(Debug)]
pub struct Predictor {
    dataset: Dataset,
    scaler: StandardScaler,
    classifier: Classifier,
}

impl Predictor {
    pub fn new(dataset: Dataset, scaler: StandardScaler, classifier: Classifier) -> Self {
        Predictor {
            dataset,
            scaler,
            classifier,
        }
    }

    /// Load all three artifacts, stopping at the first failure.
    pub fn load(paths: &ArtifactPaths, options: &DatasetOptions) -> Result<Self, LoadError> {
        let dataset = load_dataset(&paths.dataset, options)?;
        let scaler = load_scaler(&paths.scaler)?;
        let classifier = load_classifier(&paths.classifier)?;

        let labels: Vec<String> = dataset
            .label_counts()
            .iter()
            .map(|(label, n)| format!("{label}={n}"))
            .collect();
        info!(
            "Loaded {} cycles x {} features from {} (labels: {})",
            dataset.len(),
            dataset.n_features(),
            paths.dataset.display(),
            labels.join(", ")
        );
        if dataset.n_features() != scaler.n_features() {
            warn!(
                "Dataset has {} features but the scaler expects {}; every prediction will fail",
                dataset.n_features(),
                scaler.n_features()
            );
        }
        if scaler.n_features() != classifier.n_features() {
            warn!(
                "Scaler produces {} features but the classifier expects {}",
                scaler.n_features(),
                classifier.n_features()
            );
        }

        Ok(Predictor::new(dataset, scaler, classifier))
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Feature rows for `cycle_number`, label dropped.
    pub fn lookup(&self, cycle_number: i64) -> Result<FeatureTable, PredictError> {
        self.dataset
            .lookup(cycle_number)
            .ok_or(PredictError::NotFound { cycle_number })
    }

    /// Standardise then classify: one label per row of `table`.
    pub fn scale_and_classify(&self, table: &FeatureTable) -> Result<Vec<i64>, PredictError> {
        let scaled = self.scaler.transform(table)?;
        Ok(self.classifier.predict(&scaled)?)
    }

    /// Full pipeline for one cycle.
    pub fn predict(&self, cycle_number: i64) -> Result<Prediction, PredictError> {
        let table = self.lookup(cycle_number)?;
        let labels = self.scale_and_classify(&table)?;
        match labels.as_slice() {
            [classification] => Ok(Prediction::from_classification(*classification)),
            other => Err(ClassifyError::NotScalar(other.len()).into()),
        }
    }
}
