//! Preprocessing parameters (`preprocess_config.json`).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DURATION_SECONDS, HOP_LENGTH, MAX_TARGET_SAMPLES, MEL_BINS, N_FFT, SAMPLE_RATE_HZ, TOP_DB,
    TRIM_TOP_DB,
};
use crate::{PipelineError, Result};

/// How FFT power bins are projected onto `n_mels` bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterbankKind {
    /// Slaney-scale triangular filters up to Nyquist (what the classifier was trained on).
    #[default]
    Mel,
    /// Evenly spaced FFT bins relabeled as bands. Cheaper, but a different distribution.
    Approximate,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Immutable parameter set shared by every pipeline stage.
///
/// Every constructor validates; there is no way to obtain an instance that
/// violates `n_fft > hop_length > 0`, `n_mels > 0`, `sample_rate > 0`, or
/// `n_fft <= target_samples <= MAX_TARGET_SAMPLES`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ConfigFile", into = "ConfigFile")]
pub struct PreprocessConfig {
    sample_rate: u32,
    duration_seconds: f64,
    n_mels: usize,
    n_fft: usize,
    hop_length: usize,
    filterbank: FilterbankKind,
    trim_top_db: f32,
    top_db: f32,
}

/// On-disk layout. `expected_shape` is written for consumers that only read the
/// file, and checked against the parameters when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
    sample_rate: u32,
    duration: f64,
    n_mels: usize,
    n_fft: usize,
    hop_length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expected_shape: Option<[usize; 2]>,
    #[serde(default)]
    filterbank: FilterbankKind,
    #[serde(default = "default_trim_top_db")]
    trim_top_db: f32,
    #[serde(default = "default_top_db")]
    top_db: f32,
}

fn default_trim_top_db() -> f32 {
    TRIM_TOP_DB
}

fn default_top_db() -> f32 {
    TOP_DB
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE_HZ,
            duration_seconds: DURATION_SECONDS,
            n_mels: MEL_BINS,
            n_fft: N_FFT,
            hop_length: HOP_LENGTH,
            filterbank: FilterbankKind::Mel,
            trim_top_db: TRIM_TOP_DB,
            top_db: TOP_DB,
        }
    }
}

fn ensure(cond: bool, msg: impl FnOnce() -> String) -> Result<()> {
    if cond {
        Ok(())
    } else {
        Err(PipelineError::InvalidConfig(msg()))
    }
}

impl PreprocessConfig {
    pub fn new(
        sample_rate: u32,
        duration_seconds: f64,
        n_mels: usize,
        n_fft: usize,
        hop_length: usize,
    ) -> Result<Self> {
        Self {
            sample_rate,
            duration_seconds,
            n_mels,
            n_fft,
            hop_length,
            ..Self::default()
        }
        .validated()
    }

    pub fn with_filterbank(self, filterbank: FilterbankKind) -> Self {
        Self { filterbank, ..self }
    }

    pub fn with_trim_top_db(self, trim_top_db: f32) -> Result<Self> {
        Self {
            trim_top_db,
            ..self
        }
        .validated()
    }

    pub fn with_top_db(self, top_db: f32) -> Result<Self> {
        Self { top_db, ..self }.validated()
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let json = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
            path: path_ref.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path_ref = path.as_ref();
        let json = self.to_json_pretty()?;
        std::fs::write(path_ref, json).map_err(|source| ConfigError::Io {
            path: path_ref.display().to_string(),
            source,
        })
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        self.duration_seconds
    }

    #[must_use]
    pub fn n_mels(&self) -> usize {
        self.n_mels
    }

    #[must_use]
    pub fn n_fft(&self) -> usize {
        self.n_fft
    }

    #[must_use]
    pub fn hop_length(&self) -> usize {
        self.hop_length
    }

    #[must_use]
    pub fn filterbank(&self) -> FilterbankKind {
        self.filterbank
    }

    #[must_use]
    pub fn trim_top_db(&self) -> f32 {
        self.trim_top_db
    }

    #[must_use]
    pub fn top_db(&self) -> f32 {
        self.top_db
    }

    /// Number of FFT bins per frame (`n_fft / 2 + 1`).
    #[must_use]
    pub fn n_freq(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// `round(duration_seconds * sample_rate)`.
    #[must_use]
    pub fn target_samples(&self) -> usize {
        target_samples(self.duration_seconds, self.sample_rate)
    }

    /// Frames produced for a fixed-length input: `target_samples / hop_length + 1`.
    #[must_use]
    pub fn n_frames(&self) -> usize {
        self.target_samples() / self.hop_length + 1
    }

    /// Spectrogram shape `(n_mels, n_frames)`.
    #[must_use]
    pub fn expected_shape(&self) -> (usize, usize) {
        (self.n_mels, self.n_frames())
    }

    /// Model input shape `(1, n_mels, n_frames, 1)`.
    #[must_use]
    pub fn model_input_shape(&self) -> [usize; 4] {
        [1, self.n_mels, self.n_frames(), 1]
    }

    pub fn validate(&self) -> Result<()> {
        ensure(self.sample_rate > 0, || "sample_rate must be > 0".into())?;
        ensure(
            self.duration_seconds.is_finite() && self.duration_seconds > 0.0,
            || format!("duration must be > 0 (got {})", self.duration_seconds),
        )?;
        ensure(self.n_mels > 0, || "n_mels must be > 0".into())?;
        ensure(self.hop_length > 0, || "hop_length must be > 0".into())?;
        ensure(self.n_fft > self.hop_length, || {
            format!(
                "n_fft ({}) must be greater than hop_length ({})",
                self.n_fft, self.hop_length
            )
        })?;
        let target = checked_target_samples(self.duration_seconds, self.sample_rate)
            .ok_or_else(|| {
                PipelineError::InvalidConfig(format!(
                    "duration {}s at {} Hz exceeds {MAX_TARGET_SAMPLES} samples",
                    self.duration_seconds, self.sample_rate
                ))
            })?;
        ensure(target > 0, || {
            format!(
                "duration {}s at {} Hz yields no samples",
                self.duration_seconds, self.sample_rate
            )
        })?;
        ensure(self.n_fft <= target, || {
            format!("n_fft ({}) exceeds the {target}-sample waveform", self.n_fft)
        })?;
        ensure(
            self.trim_top_db.is_finite() && self.trim_top_db > 0.0,
            || format!("trim_top_db must be > 0 (got {})", self.trim_top_db),
        )?;
        ensure(self.top_db.is_finite() && self.top_db > 0.0, || {
            format!("top_db must be > 0 (got {})", self.top_db)
        })?;
        Ok(())
    }

    fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }
}

pub(crate) fn target_samples(duration_seconds: f64, sample_rate: u32) -> usize {
    (duration_seconds * f64::from(sample_rate)).round() as usize
}

/// `round(duration * sample_rate)`, or `None` past [`MAX_TARGET_SAMPLES`].
pub(crate) fn checked_target_samples(duration_seconds: f64, sample_rate: u32) -> Option<usize> {
    let n = (duration_seconds * f64::from(sample_rate)).round();
    (n.is_finite() && n >= 0.0 && n <= MAX_TARGET_SAMPLES as f64).then_some(n as usize)
}

impl TryFrom<ConfigFile> for PreprocessConfig {
    type Error = PipelineError;

    fn try_from(file: ConfigFile) -> Result<Self> {
        let config = Self {
            sample_rate: file.sample_rate,
            duration_seconds: file.duration,
            n_mels: file.n_mels,
            n_fft: file.n_fft,
            hop_length: file.hop_length,
            filterbank: file.filterbank,
            trim_top_db: file.trim_top_db,
            top_db: file.top_db,
        }
        .validated()?;

        if let Some([mels, frames]) = file.expected_shape {
            let expected = config.expected_shape();
            ensure((mels, frames) == expected, || {
                format!("expected_shape [{mels}, {frames}] does not match parameters {expected:?}")
            })?;
        }
        Ok(config)
    }
}

impl From<PreprocessConfig> for ConfigFile {
    fn from(config: PreprocessConfig) -> Self {
        let (mels, frames) = config.expected_shape();
        Self {
            sample_rate: config.sample_rate,
            duration: config.duration_seconds,
            n_mels: config.n_mels,
            n_fft: config.n_fft,
            hop_length: config.hop_length,
            expected_shape: Some([mels, frames]),
            filterbank: config.filterbank,
            trim_top_db: config.trim_top_db,
            top_db: config.top_db,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FilterbankKind, PreprocessConfig};
    use crate::PipelineError;
    use crate::constants::MAX_TARGET_SAMPLES;

    #[test]
    fn defaults_match_trained_model() {
        let cfg = PreprocessConfig::default();
        cfg.validate().expect("defaults are valid");
        assert_eq!(cfg.target_samples(), 40_000);
        assert_eq!(cfg.n_freq(), 513);
        assert_eq!(cfg.expected_shape(), (128, 157));
        assert_eq!(cfg.model_input_shape(), [1, 128, 157, 1]);
    }

    #[test]
    fn rejects_nonsensical_parameters() {
        let cases = [
            (0, 5.0, 128, 1024, 256),
            (8_000, 0.0, 128, 1024, 256),
            (8_000, f64::NAN, 128, 1024, 256),
            (8_000, 5.0, 0, 1024, 256),
            (8_000, 5.0, 128, 256, 256),
            (8_000, 5.0, 128, 1024, 0),
            (8_000, 1e-6, 128, 1024, 256),
            (8_000, 1e15, 128, 1024, 256),
            (8_000, f64::MAX, 128, 1024, 256),
            (8_000, 0.05, 128, 1024, 256),
        ];
        for (sr, dur, mels, n_fft, hop) in cases {
            let err = PreprocessConfig::new(sr, dur, mels, n_fft, hop).unwrap_err();
            assert!(
                matches!(err, PipelineError::InvalidConfig(_)),
                "({sr}, {dur}, {mels}, {n_fft}, {hop}) gave {err:?}"
            );
        }
    }

    #[test]
    fn target_length_bounds() {
        let at_limit = MAX_TARGET_SAMPLES as f64 / 8_000.0;
        assert!(PreprocessConfig::new(8_000, at_limit, 128, 1024, 256).is_ok());
        assert!(PreprocessConfig::new(8_000, at_limit * 1.01, 128, 1024, 256).is_err());
        // 0.128 s at 8 kHz is exactly one 1024-sample window.
        assert!(PreprocessConfig::new(8_000, 0.128, 128, 1024, 256).is_ok());

        let json = r#"{"sample_rate": 8000, "duration": 1e15, "n_mels": 128,
                       "n_fft": 1024, "hop_length": 256}"#;
        assert!(PreprocessConfig::from_json_str(json).is_err());
    }

    #[test]
    fn target_samples_rounds() {
        let cfg = PreprocessConfig::new(22_050, 0.1, 64, 512, 128).expect("valid");
        // 2205.0 exactly; 0.15 s would be 3307.5 -> 3308
        assert_eq!(cfg.target_samples(), 2205);
        let cfg = PreprocessConfig::new(22_050, 0.15, 64, 512, 128).expect("valid");
        assert_eq!(cfg.target_samples(), 3308);
    }

    #[test]
    fn extension_knobs_are_validated() {
        let cfg = PreprocessConfig::default();
        assert!(cfg.with_top_db(-1.0).is_err());
        assert!(cfg.with_trim_top_db(f32::INFINITY).is_err());
        let cfg = cfg
            .with_filterbank(FilterbankKind::Approximate)
            .with_top_db(60.0)
            .expect("valid");
        assert_eq!(cfg.filterbank(), FilterbankKind::Approximate);
        assert_eq!(cfg.top_db(), 60.0);
    }

    #[test]
    fn parses_original_config_file() {
        let json = r#"
        {
          "sample_rate": 8000,
          "duration": 5.0,
          "n_mels": 128,
          "n_fft": 1024,
          "hop_length": 256,
          "expected_shape": [128, 157]
        }
        "#;
        let cfg = PreprocessConfig::from_json_str(json).expect("config parse");
        assert_eq!(cfg, PreprocessConfig::default());
    }

    #[test]
    fn json_written_by_save_reads_back() {
        let cfg = PreprocessConfig::new(4_000, 2.5, 64, 512, 128)
            .expect("valid")
            .with_filterbank(FilterbankKind::Approximate);
        let json = cfg.to_json_pretty().expect("serialize");
        assert!(json.contains("\"expected_shape\""));
        assert!(json.contains("\"approximate\""));
        let back = PreprocessConfig::from_json_str(&json).expect("parse");
        assert_eq!(back, cfg);
    }

    #[test]
    fn rejects_mismatched_expected_shape_and_invalid_values() {
        let json = r#"{"sample_rate": 8000, "duration": 5.0, "n_mels": 128,
                       "n_fft": 1024, "hop_length": 256, "expected_shape": [128, 156]}"#;
        let err = PreprocessConfig::from_json_str(json).unwrap_err();
        assert!(err.to_string().contains("expected_shape"), "{err}");

        let json = r#"{"sample_rate": 8000, "duration": 5.0, "n_mels": 128,
                       "n_fft": 128, "hop_length": 256}"#;
        assert!(PreprocessConfig::from_json_str(json).is_err());
    }
}
