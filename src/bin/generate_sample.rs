use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::ipc::writer::{FileWriter, IpcWriteOptions};
use arrow::ipc::CompressionType;
use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;

use valve_condition_api::data::{FeatureTable, DEFAULT_LABEL_COLUMN};
use valve_condition_api::model::classifier::LinearModel;
use valve_condition_api::model::{Classifier, StandardScaler};

const N_CYCLES: usize = 2205;
const SECONDS: [u32; 6] = [10, 20, 30, 40, 50, 60];

/// Mean flow (l/min) and pressure (bar) at each sampled second for a healthy
/// valve.
const FS1_BASE: [f64; 6] = [0.95, 7.84, 7.69, 7.95, 7.94, 7.88];
const PS2_BASE: [f64; 6] = [9.54, 121.1, 131.2, 139.5, 129.9, 125.1];

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

fn feature_names() -> Vec<String> {
    let fs1 = SECONDS.iter().map(|s| format!("fs1_mean_measure_at_{s}th_second"));
    let ps2 = SECONDS.iter().map(|s| format!("ps2_mean_measure_at_{s}th_second"));
    fs1.chain(ps2).collect()
}

/// One cycle of readings. A degraded valve (severity 1..=3) switches slower,
/// which lowers both flow and pressure.
fn generate_cycle(severity: u32, rng: &mut SimpleRng) -> Vec<f64> {
    let lag = severity as f64;
    let mut row: Vec<f64> = FS1_BASE
        .iter()
        .map(|&base| rng.gauss(base * (1.0 - 0.008 * lag), 0.02))
        .collect();
    row.extend(PS2_BASE.iter().map(|&base| rng.gauss(base - 0.6 * lag, 0.35)));
    row
}

/// Plain batch gradient descent on the log-loss.
fn fit_logistic(rows: &[Vec<f64>], labels: &[i64], epochs: usize, lr: f64) -> LinearModel {
    let k = rows[0].len();
    let n = rows.len() as f64;
    let mut coef = vec![0.0; k];
    let mut intercept = 0.0;

    for _ in 0..epochs {
        let mut grad = vec![0.0; k];
        let mut grad_b = 0.0;
        for (row, &y) in rows.iter().zip(labels) {
            let z: f64 = coef.iter().zip(row).map(|(c, x)| c * x).sum::<f64>() + intercept;
            let err = 1.0 / (1.0 + (-z).exp()) - y as f64;
            for (g, x) in grad.iter_mut().zip(row) {
                *g += err * x / n;
            }
            grad_b += err / n;
        }
        for (c, g) in coef.iter_mut().zip(&grad) {
            *c -= lr * g;
        }
        intercept -= lr * grad_b;
    }

    LinearModel {
        coef,
        intercept,
        classes: vec![0, 1],
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text).with_context(|| format!("writing {}", path.display()))
}

fn main() -> Result<()> {
    let mut rng = SimpleRng::new(42);
    let names = feature_names();

    let mut rows: Vec<Vec<f64>> = Vec::with_capacity(N_CYCLES);
    let mut labels: Vec<i64> = Vec::with_capacity(N_CYCLES);
    for _ in 0..N_CYCLES {
        let severity = if rng.next_f64() < 0.5 {
            0
        } else {
            1 + (rng.next_u64() % 3) as u32
        };
        rows.push(generate_cycle(severity, &mut rng));
        labels.push(i64::from(severity == 0));
    }

    // Build Arrow arrays, column-major
    let mut fields: Vec<Field> = Vec::new();
    let mut columns: Vec<ArrayRef> = Vec::new();
    for (j, name) in names.iter().enumerate() {
        fields.push(Field::new(name, DataType::Float64, false));
        columns.push(Arc::new(Float64Array::from(
            rows.iter().map(|r| r[j]).collect::<Vec<_>>(),
        )));
    }
    fields.push(Field::new(DEFAULT_LABEL_COLUMN, DataType::Int64, false));
    columns.push(Arc::new(Int64Array::from(labels.clone())));
    fields.push(Field::new("__index_level_0__", DataType::Int64, false));
    columns.push(Arc::new(Int64Array::from_iter_values(0..N_CYCLES as i64)));

    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), columns).context("building RecordBatch")?;

    // Write Feather (LZ4, as pyarrow does by default)
    fs::create_dir_all("data")?;
    fs::create_dir_all("models")?;
    let dataset_path = Path::new("data/processed_dataset.feather");
    let options = IpcWriteOptions::default().try_with_compression(Some(CompressionType::LZ4_FRAME))?;
    let file = fs::File::create(dataset_path).context("creating dataset file")?;
    let mut writer = FileWriter::try_new_with_options(file, &schema, options)?;
    writer.write(&batch)?;
    writer.finish()?;

    // Fit scaler and classifier on the same rows
    let scaler = StandardScaler::fit(&rows, Some(names.clone()))?;
    let scaled = scaler
        .transform(&FeatureTable::new(names.clone(), rows))
        .context("scaling training rows")?;
    let classifier = Classifier::Logistic(fit_logistic(&scaled, &labels, 400, 0.5));

    let predicted = classifier.predict(&scaled).context("scoring training rows")?;
    let correct = predicted.iter().zip(&labels).filter(|(p, y)| p == y).count();

    write_json(Path::new("models/standard_scaler.json"), &scaler)?;
    write_json(Path::new("models/classifier.json"), &classifier)?;

    println!("{}", pretty_format_batches(&[batch.slice(0, 5)])?);
    println!(
        "Wrote {N_CYCLES} cycles ({} features) to {}; training accuracy {:.3}",
        names.len(),
        dataset_path.display(),
        correct as f64 / N_CYCLES as f64
    );
    Ok(())
}
