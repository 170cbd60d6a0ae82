//! Spectrogram and model-input tensor layouts.

use ndarray::{Array2, Array4, ArrayD, ArrayView2, Axis, Ix2};

use crate::{PipelineError, Result};

/// Log-mel spectrogram, shape `(n_mels, frames)`, values in dB relative to its own peak.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    data: Array2<f32>,
}

impl Spectrogram {
    #[must_use]
    pub fn new(data: Array2<f32>) -> Self {
        Self { data }
    }

    #[must_use]
    pub fn n_mels(&self) -> usize {
        self.data.nrows()
    }

    #[must_use]
    pub fn n_frames(&self) -> usize {
        self.data.ncols()
    }

    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    #[must_use]
    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.data.view()
    }

    #[must_use]
    pub fn into_array(self) -> Array2<f32> {
        self.data
    }

    /// Largest value (0 dB for any non-silent input).
    #[must_use]
    pub fn max_db(&self) -> f32 {
        self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    #[must_use]
    pub fn min_db(&self) -> f32 {
        self.data.iter().copied().fold(f32::INFINITY, f32::min)
    }
}

/// Classifier input, shape `(1, n_mels, frames, 1)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInputTensor {
    data: Array4<f32>,
}

impl ModelInputTensor {
    #[must_use]
    pub fn shape(&self) -> [usize; 4] {
        let (b, m, t, c) = self.data.dim();
        [b, m, t, c]
    }

    #[must_use]
    pub fn as_array(&self) -> &Array4<f32> {
        &self.data
    }

    #[must_use]
    pub fn into_array(self) -> Array4<f32> {
        self.data
    }

    /// Contiguous row-major data, for runtimes that take a flat buffer.
    #[must_use]
    pub fn as_slice(&self) -> Option<&[f32]> {
        self.data.as_slice()
    }

    /// Spectrogram view without the batch and channel axes.
    #[must_use]
    pub fn spectrogram_view(&self) -> ArrayView2<'_, f32> {
        self.data
            .view()
            .index_axis_move(Axis(3), 0)
            .index_axis_move(Axis(0), 0)
    }

    /// Drop the batch and channel axes.
    #[must_use]
    pub fn squeeze(self) -> Spectrogram {
        Spectrogram::new(
            self.data
                .index_axis_move(Axis(3), 0)
                .index_axis_move(Axis(0), 0),
        )
    }
}

/// Add a leading batch axis and a trailing channel axis, both of size 1.
#[must_use]
pub fn assemble(spec: Spectrogram) -> ModelInputTensor {
    let data = spec.data.insert_axis(Axis(0)).insert_axis(Axis(3));
    ModelInputTensor { data }
}

/// [`assemble`] for arrays whose rank is only known at runtime.
pub fn assemble_dyn(data: ArrayD<f32>) -> Result<ModelInputTensor> {
    let shape = data.shape().to_vec();
    let data = data.into_dimensionality::<Ix2>().map_err(|_| {
        PipelineError::Shape(format!(
            "spectrogram must be 2-dimensional (n_mels, frames), got shape {shape:?}"
        ))
    })?;
    Ok(assemble(Spectrogram::new(data)))
}
