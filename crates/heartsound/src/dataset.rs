//! PhysioNet/CinC 2016 layout: `training-*/REFERENCE.csv` label files next to
//! the `<file_id>.wav` recordings they describe.

use std::fs;
use std::path::{Path, PathBuf};

use crate::verdict::HeartSoundClass;

const REFERENCE_FILE: &str = "REFERENCE.csv";
const SUBSET_PREFIX: &str = "training-";

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}: expected `<file_id>,<label>`, got {content:?}")]
    MalformedRow {
        path: PathBuf,
        line: usize,
        content: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledRecording {
    pub file_id: String,
    pub label: HeartSoundClass,
    /// Subset directory name, e.g. `training-a`.
    pub subset: String,
    pub wav_path: PathBuf,
}

impl HeartSoundClass {
    /// Lower-case directory name used for per-class output folders.
    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Abnormal => "abnormal",
        }
    }

    /// Label `1` is abnormal; every other value (`-1` in PhysioNet) is normal.
    #[must_use]
    pub fn from_reference_label(label: i32) -> Self {
        if label == 1 { Self::Abnormal } else { Self::Normal }
    }
}

/// Collect every labeled recording under `root`, subsets in name order.
///
/// Subset directories without a `REFERENCE.csv` are skipped.
pub fn load_reference_labels(root: impl AsRef<Path>) -> Result<Vec<LabeledRecording>, DatasetError> {
    let root = root.as_ref();

    let mut subsets = Vec::new();
    for entry in fs::read_dir(root).map_err(io_err(root))? {
        let entry = entry.map_err(io_err(root))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(SUBSET_PREFIX) && entry.path().is_dir() {
            subsets.push((name, entry.path()));
        }
    }
    subsets.sort();

    let mut records = Vec::new();
    for (subset, dir) in subsets {
        let reference = dir.join(REFERENCE_FILE);
        if !reference.is_file() {
            tracing::debug!(subset = %subset, "no {REFERENCE_FILE}, skipping");
            continue;
        }
        let text = fs::read_to_string(&reference).map_err(io_err(&reference))?;
        let before = records.len();
        parse_reference(&text, &reference, &subset, &dir, &mut records)?;
        tracing::debug!(subset = %subset, recordings = records.len() - before, "loaded labels");
    }
    Ok(records)
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> DatasetError + use<> {
    let path = path.to_path_buf();
    move |source| DatasetError::Io { path, source }
}

fn parse_reference(
    text: &str,
    reference: &Path,
    subset: &str,
    dir: &Path,
    out: &mut Vec<LabeledRecording>,
) -> Result<(), DatasetError> {
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let malformed = || DatasetError::MalformedRow {
            path: reference.to_path_buf(),
            line: idx + 1,
            content: raw.to_string(),
        };
        let (file_id, label) = line.split_once(',').ok_or_else(malformed)?;
        let file_id = file_id.trim();
        let label: i32 = label.trim().parse().map_err(|_| malformed())?;
        if file_id.is_empty() {
            return Err(malformed());
        }
        out.push(LabeledRecording {
            file_id: file_id.to_string(),
            label: HeartSoundClass::from_reference_label(label),
            subset: subset.to_string(),
            wav_path: dir.join(format!("{file_id}.wav")),
        });
    }
    Ok(())
}
