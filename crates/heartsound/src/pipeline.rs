//! End-to-end feature pipeline: load -> preprocess -> log-mel -> model tensor.
//!
//! The pipeline refuses to produce a tensor for empty or entirely silent audio,
//! so a classifier is never fed a zero spectrogram by accident.

use std::path::Path;

use ndarray::ArrayView2;

use crate::audio::{self, AudioBuffer};
use crate::config::PreprocessConfig;
use crate::mel::SpectrogramExtractor;
use crate::preprocess::preprocess;
use crate::tensor::{ModelInputTensor, assemble};
use crate::verdict::Classification;
use crate::{BoxError, PipelineError, Result};

/// Heart sound classifier collaborator.
pub trait Classifier {
    /// Probability in `[0, 1]` that the recording is abnormal.
    fn abnormal_probability(&self, input: &ModelInputTensor) -> Result<f32, BoxError>;
}

impl<F> Classifier for F
where
    F: Fn(&ModelInputTensor) -> Result<f32, BoxError>,
{
    fn abnormal_probability(&self, input: &ModelInputTensor) -> Result<f32, BoxError> {
        self(input)
    }
}

/// Result of one pipeline run, owned by the caller.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Trimmed, normalized, fixed-length waveform.
    pub waveform: AudioBuffer,
    /// `(1, n_mels, frames, 1)` classifier input.
    pub tensor: ModelInputTensor,
}

impl PipelineOutput {
    #[must_use]
    pub fn spectrogram(&self) -> ArrayView2<'_, f32> {
        self.tensor.spectrogram_view()
    }
}

#[derive(Debug)]
pub struct FeaturePipeline {
    config: PreprocessConfig,
    extractor: SpectrogramExtractor,
}

impl FeaturePipeline {
    #[must_use]
    pub fn new(config: PreprocessConfig) -> Self {
        let extractor = SpectrogramExtractor::new(&config);
        Self { config, extractor }
    }

    #[must_use]
    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    pub fn run_path(&self, path: impl AsRef<Path>) -> Result<PipelineOutput> {
        let buffer = audio::load(path, self.config.sample_rate())?;
        self.run_buffer(buffer)
    }

    pub fn run_bytes(&self, bytes: &[u8], extension_hint: Option<&str>) -> Result<PipelineOutput> {
        let buffer = audio::load_bytes(bytes, extension_hint, self.config.sample_rate())?;
        self.run_buffer(buffer)
    }

    /// Run from an already decoded buffer. It is resampled when its rate differs
    /// from the configured one.
    pub fn run_buffer(&self, buffer: AudioBuffer) -> Result<PipelineOutput> {
        if buffer.is_empty() {
            return Err(PipelineError::EmptySignal("audio contains no frames"));
        }
        if buffer.sample_rate_hz() == 0 {
            return Err(PipelineError::InvalidConfig(
                "audio buffer declares a 0 Hz sample rate".into(),
            ));
        }
        if buffer.is_silent() {
            return Err(PipelineError::EmptySignal("audio is entirely silent"));
        }

        let target_rate = self.config.sample_rate();
        let buffer = if buffer.sample_rate_hz() == target_rate {
            buffer
        } else {
            let samples = audio::resample_linear_mono_f32(
                buffer.samples(),
                buffer.sample_rate_hz(),
                target_rate,
            );
            AudioBuffer::new(samples, target_rate)
        };
        if buffer.is_empty() {
            return Err(PipelineError::EmptySignal("audio too short to resample"));
        }

        let waveform = preprocess(buffer, &self.config)?;
        let spectrogram = self.extractor.extract(&waveform)?;
        let tensor = assemble(spectrogram);

        let expected = self.config.model_input_shape();
        if tensor.shape() != expected {
            return Err(PipelineError::Shape(format!(
                "model input shape {:?} differs from configured {expected:?}",
                tensor.shape()
            )));
        }

        Ok(PipelineOutput { waveform, tensor })
    }

    /// Ask `classifier` for a verdict on a finished pipeline run.
    pub fn classify_output(
        &self,
        output: &PipelineOutput,
        classifier: &dyn Classifier,
        threshold: f32,
    ) -> Result<Classification> {
        let probability = classifier
            .abnormal_probability(&output.tensor)
            .map_err(PipelineError::Classifier)?;
        let verdict = Classification::from_probability(probability, threshold)?;
        tracing::debug!(
            class = %verdict.class,
            probability,
            threshold,
            "classification complete"
        );
        Ok(verdict)
    }

    /// Run the pipeline and, only if it succeeded, ask `classifier` for a verdict.
    pub fn classify_path(
        &self,
        path: impl AsRef<Path>,
        classifier: &dyn Classifier,
        threshold: f32,
    ) -> Result<(PipelineOutput, Classification)> {
        let output = self.run_path(path)?;
        let verdict = self.classify_output(&output, classifier, threshold)?;
        Ok((output, verdict))
    }

    pub fn classify_bytes(
        &self,
        bytes: &[u8],
        extension_hint: Option<&str>,
        classifier: &dyn Classifier,
        threshold: f32,
    ) -> Result<(PipelineOutput, Classification)> {
        let output = self.run_bytes(bytes, extension_hint)?;
        let verdict = self.classify_output(&output, classifier, threshold)?;
        Ok((output, verdict))
    }
}
