//! Pre-trained model artifacts: the feature scaler and the classifier.
//!
//! Both are JSON documents read once at startup and validated before the
//! service accepts requests.

pub mod classifier;
pub mod scaler;

use std::io::BufReader;
use std::path::Path;

use anyhow::Context;
use serde::de::DeserializeOwned;

pub use classifier::{Classifier, ClassifyError};
pub use scaler::{ScaleError, StandardScaler};

use crate::error::{open_artifact, Artifact, LoadError};

/// Load and validate the scaler file.
pub fn load_scaler(path: &Path) -> Result<StandardScaler, LoadError> {
    let scaler: StandardScaler = read_json(Artifact::Scaler, path)?;
    scaler
        .validated()
        .map_err(|e| LoadError::corrupt(Artifact::Scaler, path, e))
}

/// Load and validate the classifier file.
pub fn load_classifier(path: &Path) -> Result<Classifier, LoadError> {
    let classifier: Classifier = read_json(Artifact::Classifier, path)?;
    classifier
        .validated()
        .map_err(|e| LoadError::corrupt(Artifact::Classifier, path, e))
}

fn read_json<T: DeserializeOwned>(artifact: Artifact, path: &Path) -> Result<T, LoadError> {
    let file = open_artifact(artifact, path)?;
    serde_json::from_reader(BufReader::new(file))
        .context("parsing JSON")
        .map_err(|e| LoadError::corrupt(artifact, path, e))
}
