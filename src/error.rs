use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::model::classifier::ClassifyError;
use crate::model::scaler::ScaleError;

// ---------------------------------------------------------------------------
// Startup: artifact loading
// ---------------------------------------------------------------------------

/// The three files read at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    Dataset,
    Scaler,
    Classifier,
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Artifact::Dataset => write!(f, "processed dataset"),
            Artifact::Scaler => write!(f, "scaler model"),
            Artifact::Classifier => write!(f, "classifier model"),
        }
    }
}

/// Fatal error raised while loading an artifact. The service never starts
/// serving after one of these.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{artifact} file not found at {}", .path.display())]
    NotFound { artifact: Artifact, path: PathBuf },

    #[error("An error occurred while loading the {artifact}: {message}")]
    Corrupt {
        artifact: Artifact,
        path: PathBuf,
        message: String,
    },
}

impl LoadError {
    /// Flatten an anyhow chain into a `Corrupt` error.
    pub fn corrupt(artifact: Artifact, path: &Path, err: anyhow::Error) -> Self {
        LoadError::Corrupt {
            artifact,
            path: path.to_path_buf(),
            message: format!("{err:#}"),
        }
    }

    pub fn artifact(&self) -> Artifact {
        match self {
            LoadError::NotFound { artifact, .. } | LoadError::Corrupt { artifact, .. } => *artifact,
        }
    }
}

/// Open an artifact file, telling a missing file apart from every other I/O
/// failure.
pub fn open_artifact(artifact: Artifact, path: &Path) -> Result<File, LoadError> {
    File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => LoadError::NotFound {
            artifact,
            path: path.to_path_buf(),
        },
        _ => LoadError::corrupt(artifact, path, anyhow::Error::new(e).context("opening file")),
    })
}

// ---------------------------------------------------------------------------
// Per-request: prediction
// ---------------------------------------------------------------------------

/// Outcome of a failed prediction. The `Display` text is the message
/// returned to HTTP clients.
#[derive(Debug, Error)]
pub enum PredictError {
    #[error("Cycle number not found in dataset")]
    NotFound { cycle_number: i64 },

    #[error("Error scaling input data: {0}")]
    Transform(#[from] ScaleError),

    #[error("Error making prediction: {0}")]
    Prediction(#[from] ClassifyError),
}
