use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::data::{DatasetOptions, DEFAULT_LABEL_COLUMN};

/// Command-line configuration. Every flag falls back to an environment
/// variable, then to the default layout of a checked-out repository.
#[derive(Debug, Clone, Parser)]
#[command(name = "valve-condition-api", version, about)]
pub struct Config {
    /// Processed dataset (.feather, .parquet or .csv).
    #[arg(
        long,
        env = "VALVE_DATASET_PATH",
        default_value = "data/processed_dataset.feather"
    )]
    pub dataset: PathBuf,

    /// Fitted StandardScaler parameters (JSON).
    #[arg(
        long,
        env = "VALVE_SCALER_PATH",
        default_value = "models/standard_scaler.json"
    )]
    pub scaler: PathBuf,

    /// Trained classifier (JSON).
    #[arg(
        long,
        env = "VALVE_CLASSIFIER_PATH",
        default_value = "models/classifier.json"
    )]
    pub classifier: PathBuf,

    /// Column holding the target label; dropped before scaling.
    #[arg(long, env = "VALVE_LABEL_COLUMN", default_value = DEFAULT_LABEL_COLUMN)]
    pub label_column: String,

    /// Column holding the cycle number. Auto-detected when omitted.
    #[arg(long, env = "VALVE_INDEX_COLUMN")]
    pub index_column: Option<String>,

    /// Address the HTTP server listens on.
    #[arg(long, env = "VALVE_BIND", default_value = "127.0.0.1:8000")]
    pub bind: SocketAddr,
}

/// Locations of the three startup artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub dataset: PathBuf,
    pub scaler: PathBuf,
    pub classifier: PathBuf,
}

impl Config {
    pub fn artifact_paths(&self) -> ArtifactPaths {
        ArtifactPaths {
            dataset: self.dataset.clone(),
            scaler: self.scaler.clone(),
            classifier: self.classifier.clone(),
        }
    }

    pub fn dataset_options(&self) -> DatasetOptions {
        DatasetOptions {
            label_column: self.label_column.clone(),
            index_column: self.index_column.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let config = Config::try_parse_from([
            "valve-condition-api",
            "--dataset",
            "/srv/cycles.parquet",
            "--index-column",
            "cycle",
            "--bind",
            "0.0.0.0:9000",
        ])
        .unwrap();

        assert_eq!(config.artifact_paths().dataset, PathBuf::from("/srv/cycles.parquet"));
        assert_eq!(config.dataset_options().index_column.as_deref(), Some("cycle"));
        assert_eq!(config.bind.port(), 9000);
    }

    #[test]
    fn bad_bind_address_is_rejected() {
        let result = Config::try_parse_from(["valve-condition-api", "--bind", "localhost"]);
        assert!(result.is_err());
    }
}
