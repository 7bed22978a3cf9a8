use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context, Result};
use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::ipc::reader::FileReader;
use arrow::record_batch::RecordBatch;
use log::debug;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::Deserialize;

use super::model::{CycleRecord, Dataset};
use crate::error::{open_artifact, Artifact, LoadError};

/// Label column of the processed hydraulic dataset.
pub const DEFAULT_LABEL_COLUMN: &str = "Valve condition Status";

/// Column names that hold a stored DataFrame index, tried in order when no
/// index column is configured. pyarrow writes `__index_level_0__`; pandas
/// `to_csv` writes an unnamed first column.
const INDEX_CANDIDATES: [&str; 2] = ["__index_level_0__", ""];

/// Schema metadata key under which pyarrow records the DataFrame layout.
const PANDAS_METADATA_KEY: &str = "pandas";

/// How to interpret the columns of the dataset file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetOptions {
    pub label_column: String,
    /// Explicit index column. `None` follows the pandas schema metadata,
    /// then a conventional index column, then row position.
    pub index_column: Option<String>,
}

impl Default for DatasetOptions {
    fn default() -> Self {
        Self {
            label_column: DEFAULT_LABEL_COLUMN.to_string(),
            index_column: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load the processed dataset.  Dispatch by extension.
///
/// Supported formats:
/// * `.feather` / `.arrow` / `.ipc` – Arrow IPC file, as written by
///   `DataFrame.to_feather()` (recommended)
/// * `.parquet` – Parquet file
/// * `.csv`     – header row, one column per feature
pub fn load_dataset(path: &Path, options: &DatasetOptions) -> Result<Dataset, LoadError> {
    let file = open_artifact(Artifact::Dataset, path)?;
    load_file(file, path, options).map_err(|e| LoadError::corrupt(Artifact::Dataset, path, e))
}

fn load_file(file: File, path: &Path, options: &DatasetOptions) -> Result<Dataset> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let dataset = match ext.as_str() {
        "feather" | "arrow" | "ipc" => load_feather(file, options)?,
        "parquet" | "pq" => load_parquet(file, options)?,
        "csv" => load_csv(file, options)?,
        other => bail!("Unsupported file extension: .{other}"),
    };

    if dataset.is_empty() {
        bail!("dataset contains no rows");
    }
    debug!(
        "parsed {} rows x {} features from {}",
        dataset.len(),
        dataset.n_features(),
        path.display()
    );
    Ok(dataset)
}

// ---------------------------------------------------------------------------
// Column layout
// ---------------------------------------------------------------------------

/// Where cycle numbers come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexSource {
    /// An integer column of the file.
    Column(usize),
    /// A pandas `RangeIndex`, `start + position * step`. Plain row position
    /// is `Range { start: 0, step: 1 }`.
    Range { start: i64, step: i64 },
}

impl IndexSource {
    const POSITION: IndexSource = IndexSource::Range { start: 0, step: 1 };

    fn column(self) -> Option<usize> {
        match self {
            IndexSource::Column(i) => Some(i),
            IndexSource::Range { .. } => None,
        }
    }

    /// Cycle number of the row at `position` when no column is stored.
    fn range_at(self, position: i64) -> i64 {
        match self {
            IndexSource::Range { start, step } => start + position * step,
            IndexSource::Column(_) => position,
        }
    }
}

/// Positions of the index, label and feature columns in the file header.
#[derive(Debug)]
struct ColumnLayout {
    index: IndexSource,
    label: usize,
    features: Vec<usize>,
}

impl ColumnLayout {
    /// Index precedence: configured column, pandas schema metadata, a
    /// conventional index column name, row position.
    fn resolve(
        names: &[String],
        options: &DatasetOptions,
        pandas: Option<&PandasIndexColumn>,
    ) -> Result<Self> {
        let label = names
            .iter()
            .position(|n| *n == options.label_column)
            .with_context(|| format!("label column '{}' not found", options.label_column))?;

        let index = match (&options.index_column, pandas) {
            (Some(col), _) => IndexSource::Column(
                names
                    .iter()
                    .position(|n| n == col)
                    .with_context(|| format!("index column '{col}' not found"))?,
            ),
            (None, Some(PandasIndexColumn::Stored(col))) => IndexSource::Column(
                names
                    .iter()
                    .position(|n| n == col)
                    .with_context(|| format!("pandas index column '{col}' not found"))?,
            ),
            (None, Some(PandasIndexColumn::Range { kind, start, step })) => {
                if kind != "range" {
                    bail!("unsupported pandas index kind '{kind}'");
                }
                if *step == 0 {
                    bail!("pandas RangeIndex has a step of 0");
                }
                IndexSource::Range {
                    start: *start,
                    step: *step,
                }
            }
            (None, None) => INDEX_CANDIDATES
                .iter()
                .find_map(|candidate| names.iter().position(|n| n == candidate))
                .map(IndexSource::Column)
                .unwrap_or(IndexSource::POSITION),
        };

        if index.column() == Some(label) {
            bail!("column '{}' cannot be both index and label", names[label]);
        }

        let features: Vec<usize> = (0..names.len())
            .filter(|&i| Some(i) != index.column() && i != label)
            .collect();
        if features.is_empty() {
            bail!("dataset has no feature columns");
        }

        Ok(ColumnLayout {
            index,
            label,
            features,
        })
    }

    fn feature_names(&self, names: &[String]) -> Vec<String> {
        self.features.iter().map(|&i| names[i].clone()).collect()
    }
}

// -- pandas schema metadata --

/// The part of pyarrow's `pandas` schema metadata that describes the
/// DataFrame index.
#[derive(Debug, Deserialize)]
struct PandasMetadata {
    #[serde(default)]
    index_columns: Vec<PandasIndexColumn>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PandasIndexColumn {
    /// Index written as a column, `__index_level_0__` or the index name.
    Stored(String),
    /// `RangeIndex` kept only in the metadata.
    Range { kind: String, start: i64, step: i64 },
}

/// The index declared by the `pandas` metadata entry, if the file has one.
fn pandas_index(schema: &Schema) -> Result<Option<PandasIndexColumn>> {
    let Some(raw) = schema.metadata().get(PANDAS_METADATA_KEY) else {
        return Ok(None);
    };
    let meta: PandasMetadata =
        serde_json::from_str(raw).context("parsing pandas schema metadata")?;

    let mut levels = meta.index_columns.into_iter();
    let first = levels.next();
    if levels.next().is_some() {
        bail!("multi-level DataFrame index is not supported");
    }
    Ok(first)
}

// ---------------------------------------------------------------------------
// Feather / Parquet loaders
// ---------------------------------------------------------------------------

/// Feather v2 is the Arrow IPC file format. LZ4 and ZSTD buffers (pyarrow's
/// default) are decompressed by the reader.
fn load_feather(file: File, options: &DatasetOptions) -> Result<Dataset> {
    let reader = FileReader::try_new(file, None).context("reading Arrow IPC file")?;
    let schema = reader.schema();
    dataset_from_batches(schema, reader, options)
}

fn load_parquet(file: File, options: &DatasetOptions) -> Result<Dataset> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?;
    let schema = builder.schema().clone();
    let reader = builder.build().context("building parquet reader")?;
    dataset_from_batches(schema, reader, options)
}

fn dataset_from_batches<I>(schema: SchemaRef, batches: I, options: &DatasetOptions) -> Result<Dataset>
where
    I: IntoIterator<Item = std::result::Result<RecordBatch, ArrowError>>,
{
    let names: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();
    let pandas = pandas_index(&schema)?;
    let layout = ColumnLayout::resolve(&names, options, pandas.as_ref())?;

    let mut records = Vec::new();
    let mut position: i64 = 0;

    for batch_result in batches {
        let batch = batch_result.context("reading record batch")?;
        let n_rows = batch.num_rows();

        let stored_index = layout
            .index
            .column()
            .map(|i| index_values(batch.column(i), &names[i]))
            .transpose()?;
        let labels = label_values(batch.column(layout.label), &names[layout.label])?;
        let features = layout
            .features
            .iter()
            .map(|&i| float_values(batch.column(i), &names[i]))
            .collect::<Result<Vec<_>>>()?;

        for row in 0..n_rows {
            let cycle_number = match &stored_index {
                Some(values) => values[row],
                None => layout.index.range_at(position),
            };
            records.push(CycleRecord {
                cycle_number,
                features: features.iter().map(|col| col[row]).collect(),
                label: labels[row],
            });
            position += 1;
        }
    }

    Ok(Dataset::from_records(
        layout.feature_names(&names),
        options.label_column.clone(),
        records,
    ))
}

// -- Arrow helpers --

fn is_numeric_like(dt: &DataType) -> bool {
    dt.is_numeric() || matches!(dt, DataType::Boolean | DataType::Null)
}

/// Read a numeric or boolean column as `f64`. Nulls become NaN.
fn float_values(col: &ArrayRef, name: &str) -> Result<Vec<f64>> {
    let dt = col.data_type();
    if !is_numeric_like(dt) {
        bail!("column '{name}' has non-numeric type {dt:?}");
    }
    let floats = cast(col.as_ref(), &DataType::Float64)
        .with_context(|| format!("column '{name}': casting {dt:?} to Float64"))?;
    Ok(floats
        .as_primitive::<Float64Type>()
        .iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect())
}

/// The label is only summarised, never scored: a non-numeric label column
/// reads as NaN instead of failing the load.
fn label_values(col: &ArrayRef, name: &str) -> Result<Vec<f64>> {
    if is_numeric_like(col.data_type()) {
        return float_values(col, name);
    }
    debug!("label column '{name}' is {:?}; not summarised", col.data_type());
    Ok(vec![f64::NAN; col.len()])
}

/// Read an integer index column. Nulls and out-of-range values are errors.
fn index_values(col: &ArrayRef, name: &str) -> Result<Vec<i64>> {
    let dt = col.data_type();
    if !dt.is_integer() {
        bail!("index column '{name}' must hold integers, got {dt:?}");
    }
    let ints = cast(col.as_ref(), &DataType::Int64)
        .with_context(|| format!("index column '{name}': casting {dt:?} to Int64"))?;
    if ints.null_count() > 0 {
        bail!("index column '{name}' contains nulls or values outside the i64 range");
    }
    Ok(ints.as_primitive::<Int64Type>().values().to_vec())
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout: header row with column names, one numeric value per cell.
/// Empty cells are read as NaN.
fn load_csv(file: File, options: &DatasetOptions) -> Result<Dataset> {
    let mut reader = csv::Reader::from_reader(file);
    let names: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();
    let layout = ColumnLayout::resolve(&names, options, None)?;

    let mut records = Vec::new();

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;

        let cycle_number = match layout.index.column() {
            Some(i) => {
                let cell = record.get(i).unwrap_or("").trim();
                cell.parse::<i64>()
                    .with_context(|| format!("Row {row_no}: index '{cell}' is not an integer"))?
            }
            None => layout.index.range_at(row_no as i64),
        };
        let label = parse_float_cell(record.get(layout.label), row_no, &names[layout.label])
            .unwrap_or(f64::NAN);
        let features = layout
            .features
            .iter()
            .map(|&i| parse_float_cell(record.get(i), row_no, &names[i]))
            .collect::<Result<Vec<_>>>()?;

        records.push(CycleRecord {
            cycle_number,
            features,
            label,
        });
    }

    Ok(Dataset::from_records(
        layout.feature_names(&names),
        options.label_column.clone(),
        records,
    ))
}

fn parse_float_cell(cell: Option<&str>, row: usize, col: &str) -> Result<f64> {
    let s = cell.unwrap_or("").trim();
    match s {
        "" => Ok(f64::NAN),
        "True" | "true" => Ok(1.0),
        "False" | "false" => Ok(0.0),
        _ => s
            .parse::<f64>()
            .with_context(|| format!("Row {row}, column '{col}': '{s}' is not a number")),
    }
}
