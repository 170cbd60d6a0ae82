//! Dataset-wide feature extraction.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use heartsound::constants::CONFIG_FILENAME;
use heartsound::dataset::{LabeledRecording, load_reference_labels};
use heartsound::{FeaturePipeline, HeartSoundClass, PreprocessConfig, npy};

const RESULTS_FILENAME: &str = "preprocessing_results.csv";

#[derive(Debug)]
pub struct BatchOptions {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub force: bool,
    pub limit: Option<usize>,
    pub config: PreprocessConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Processed,
    Cached,
}

impl Status {
    fn as_str(self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Cached => "cached",
        }
    }
}

#[derive(Debug)]
struct Row {
    file_id: String,
    label: HeartSoundClass,
    spectrogram_path: PathBuf,
    status: Status,
}

#[derive(Debug)]
pub struct Failure {
    pub file_id: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub processed: usize,
    pub cached: usize,
    pub failed: Vec<Failure>,
}

/// Directory that receives the config and results files: the parent of the
/// output directory, or `.` when it has none.
fn sidecar_dir(output_dir: &Path) -> &Path {
    output_dir
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
}

pub fn run(opts: &BatchOptions) -> Result<BatchSummary> {
    let mut records = load_reference_labels(&opts.data_dir)
        .with_context(|| format!("read labels under {}", opts.data_dir.display()))?;
    if records.is_empty() {
        anyhow::bail!(
            "no labeled recordings found under {} (expected training-*/REFERENCE.csv)",
            opts.data_dir.display()
        );
    }
    if let Some(limit) = opts.limit {
        records.truncate(limit);
        tracing::info!(limit, "limiting batch");
    }

    let sidecar = sidecar_dir(&opts.output_dir);
    fs::create_dir_all(sidecar).with_context(|| format!("create {}", sidecar.display()))?;
    let config_path = sidecar.join(CONFIG_FILENAME);
    opts.config
        .save(&config_path)
        .with_context(|| format!("write {}", config_path.display()))?;
    tracing::info!(path = %config_path.display(), "saved preprocessing config");

    for class in [HeartSoundClass::Normal, HeartSoundClass::Abnormal] {
        let dir = opts.output_dir.join(class.dir_name());
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    }

    let pipeline = FeaturePipeline::new(opts.config);
    let mut rows = Vec::with_capacity(records.len());
    let mut summary = BatchSummary::default();
    let total = records.len();

    for (idx, record) in records.into_iter().enumerate() {
        let out_path = opts
            .output_dir
            .join(record.label.dir_name())
            .join(format!("{}.npy", record.file_id));

        if (idx + 1) % 100 == 0 {
            tracing::info!(done = idx + 1, total, "progress");
        }

        let status = if !opts.force && is_reusable(&out_path, &opts.config) {
            Status::Cached
        } else {
            match extract_one(&pipeline, &record, &out_path) {
                Ok(()) => Status::Processed,
                Err(err) => {
                    tracing::warn!(file_id = %record.file_id, "failed: {err:#}");
                    summary.failed.push(Failure {
                        file_id: record.file_id,
                        error: format!("{err:#}"),
                    });
                    continue;
                }
            }
        };
        match status {
            Status::Processed => summary.processed += 1,
            Status::Cached => summary.cached += 1,
        }
        rows.push(Row {
            file_id: record.file_id,
            label: record.label,
            spectrogram_path: out_path,
            status,
        });
    }

    let results_path = sidecar.join(RESULTS_FILENAME);
    write_results(&results_path, &rows)
        .with_context(|| format!("write {}", results_path.display()))?;

    eprintln!(
        "processed={} cached={} failed={} results={}",
        summary.processed,
        summary.cached,
        summary.failed.len(),
        results_path.display()
    );
    for failure in summary.failed.iter().take(5) {
        eprintln!("  {}: {}", failure.file_id, failure.error);
    }
    let normal = rows.iter().filter(|r| r.label == HeartSoundClass::Normal).count();
    eprintln!("by class: normal={normal} abnormal={}", rows.len() - normal);

    Ok(summary)
}

/// An existing spectrogram is reused only if it reads back at the configured shape.
fn is_reusable(path: &Path, config: &PreprocessConfig) -> bool {
    if !path.exists() {
        return false;
    }
    let (n_mels, frames) = config.expected_shape();
    match npy::read_f32(path) {
        Ok(array) if array.shape() == [n_mels, frames] => true,
        Ok(array) => {
            tracing::info!(path = %path.display(), shape = ?array.shape(), "stale spectrogram, recomputing");
            false
        }
        Err(err) => {
            tracing::info!(path = %path.display(), "unreadable spectrogram, recomputing: {err}");
            false
        }
    }
}

fn extract_one(pipeline: &FeaturePipeline, record: &LabeledRecording, out_path: &Path) -> Result<()> {
    let output = pipeline
        .run_path(&record.wav_path)
        .with_context(|| format!("extract {}", record.wav_path.display()))?;
    npy::write_f32(out_path, &output.spectrogram())
        .with_context(|| format!("write {}", out_path.display()))?;
    tracing::debug!(file_id = %record.file_id, label = %record.label, "saved spectrogram");
    Ok(())
}

fn write_results(path: &Path, rows: &[Row]) -> Result<()> {
    let mut out = BufWriter::new(fs::File::create(path)?);
    writeln!(out, "file_id,label,spectrogram_path,status")?;
    for row in rows {
        writeln!(
            out,
            "{},{},{},{}",
            row.file_id,
            row.label.dir_name(),
            row.spectrogram_path.display(),
            row.status.as_str()
        )?;
    }
    out.flush()?;
    Ok(())
}
