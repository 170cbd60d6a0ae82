//! Heart sound feature pipeline.
//!
//! Turns a recording into the fixed-shape log-mel tensor a heart sound
//! classifier consumes:
//! - Audio loading (WAV + compressed containers, mono mixdown, linear resample)
//! - Preprocessing (silence trim, peak normalize, fixed duration)
//! - Log-mel spectrogram (Hann STFT, Slaney mel filterbank, relative dB)
//! - Tensor layout `(1, n_mels, frames, 1)`

pub mod audio;
pub mod config;
pub mod constants;
pub mod dataset;
pub mod mel;
pub mod npy;
pub mod pipeline;
pub mod preprocess;
pub mod tensor;
pub mod verdict;

pub use audio::{AudioBuffer, DecodeError};
pub use config::{FilterbankKind, PreprocessConfig};
pub use mel::SpectrogramExtractor;
pub use pipeline::{Classifier, FeaturePipeline, PipelineOutput};
pub use tensor::{ModelInputTensor, Spectrogram};
pub use verdict::{Classification, HeartSoundClass};

/// Boxed error returned by classifier collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by the feature pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to decode audio: {0}")]
    Decode(#[from] DecodeError),
    #[error("empty audio signal: {0}")]
    EmptySignal(&'static str),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("tensor shape error: {0}")]
    Shape(String),
    #[error("classifier failed: {0}")]
    Classifier(#[source] BoxError),
    #[error("classifier probability {0} is outside [0, 1]")]
    InvalidProbability(f32),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
