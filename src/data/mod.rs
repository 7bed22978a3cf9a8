/// Data layer: the processed cycle dataset and its loaders.
///
/// Architecture:
/// ```text
///  .feather / .parquet / .csv
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → Dataset
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  Dataset  │  Vec<CycleRecord>, cycle-number index
///   └──────────┘
///        │
///        ▼
///   lookup(cycle) → FeatureTable (label dropped)
/// ```

pub mod loader;
pub mod model;

pub use loader::{load_dataset, DatasetOptions, DEFAULT_LABEL_COLUMN};
pub use model::{CycleRecord, Dataset, FeatureTable};
