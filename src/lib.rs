//! Valve condition prediction service.
//!
//! Loads a processed hydraulic-cycle dataset, a fitted standard scaler and a
//! binary classifier at startup, then answers `POST /predict` by looking up a
//! cycle, scaling its features and classifying the valve as optimal or not.

pub mod config;
pub mod data;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod server;

pub use config::{ArtifactPaths, Config};
pub use error::{Artifact, LoadError, PredictError};
pub use pipeline::{Prediction, Predictor, ValveCondition};
