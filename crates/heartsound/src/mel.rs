//! Log-mel spectrogram (librosa-style).
//!
//! - Centered frames, zero padded at both edges
//! - Periodic Hann window
//! - Power spectrum through `rustfft`
//! - Slaney mel filter bank with Slaney area normalization
//! - Decibels relative to the spectrogram maximum, floored at `-top_db`

use std::sync::Arc;

use ndarray::{Array2, ArrayView1};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::audio::AudioBuffer;
use crate::config::{FilterbankKind, PreprocessConfig};
use crate::constants::POWER_AMIN;
use crate::tensor::Spectrogram;
use crate::{PipelineError, Result};

// Slaney mel scale: linear below 1 kHz, logarithmic above.
const MIN_LOG_HZ: f64 = 1000.0;
const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP; // 15.0

fn logstep() -> f64 {
    6.4f64.ln() / 27.0
}

#[inline]
pub fn hertz_to_mel(freq: f64) -> f64 {
    if freq >= MIN_LOG_HZ {
        MIN_LOG_MEL + (freq / MIN_LOG_HZ).ln() / logstep()
    } else {
        freq / F_SP
    }
}

#[inline]
pub fn mel_to_hertz(mels: f64) -> f64 {
    if mels >= MIN_LOG_MEL {
        MIN_LOG_HZ * (logstep() * (mels - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mels
    }
}

/// Triangular Slaney filters from 0 Hz to Nyquist, shape `(n_mels, n_fft / 2 + 1)`.
#[must_use]
pub fn mel_filterbank(sample_rate_hz: u32, n_fft: usize, n_mels: usize) -> Array2<f32> {
    let n_freq = n_fft / 2 + 1;
    let sr = f64::from(sample_rate_hz);
    let fft_freqs: Vec<f64> = (0..n_freq).map(|k| k as f64 * sr / n_fft as f64).collect();

    let mel_min = hertz_to_mel(0.0);
    let mel_max = hertz_to_mel(sr / 2.0);
    let filter_freqs: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hertz(mel_min + (mel_max - mel_min) * i as f64 / (n_mels + 1) as f64))
        .collect();

    let filter_diff: Vec<f64> = filter_freqs
        .windows(2)
        .map(|w| {
            let d = w[1] - w[0];
            if d == 0.0 { 1e-6 } else { d }
        })
        .collect();

    let mut filters = Array2::<f32>::zeros((n_mels, n_freq));
    for (m, mut row) in filters.outer_iter_mut().enumerate() {
        let enorm = 2.0 / (filter_freqs[m + 2] - filter_freqs[m]);
        for (f, out) in row.iter_mut().enumerate() {
            let down = (fft_freqs[f] - filter_freqs[m]) / filter_diff[m];
            let up = (filter_freqs[m + 2] - fft_freqs[f]) / filter_diff[m + 1];
            *out = (down.min(up).max(0.0) * enorm) as f32;
        }
    }
    filters
}

/// Bin-selection matrix: band `m` is FFT bin `floor(m * (n_freq - 1) / (n_mels - 1))`.
#[must_use]
pub fn approximate_filterbank(n_fft: usize, n_mels: usize) -> Array2<f32> {
    let n_freq = n_fft / 2 + 1;
    let mut filters = Array2::<f32>::zeros((n_mels, n_freq));
    let step = if n_mels > 1 {
        (n_freq - 1) as f64 / (n_mels - 1) as f64
    } else {
        0.0
    };
    for m in 0..n_mels {
        // The last band is pinned to the last bin, like `linspace` with an endpoint.
        let bin = if m + 1 == n_mels && n_mels > 1 {
            n_freq - 1
        } else {
            ((m as f64 * step).floor() as usize).min(n_freq - 1)
        };
        filters[[m, bin]] = 1.0;
    }
    filters
}

/// Periodic Hann window: `0.5 * (1 - cos(2*pi*i/N))`.
#[must_use]
pub fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            let angle = 2.0 * std::f64::consts::PI * i as f64 / size as f64;
            (0.5 * (1.0 - angle.cos())) as f32
        })
        .collect()
}

/// Spectrogram extractor with the window, filter bank and FFT plan precomputed
/// for one configuration. Immutable, so one instance can serve many threads.
pub struct SpectrogramExtractor {
    config: PreprocessConfig,
    window: Vec<f32>,
    filters: Array2<f32>, // [n_mels, n_freq]
    fft: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for SpectrogramExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrogramExtractor")
            .field("config", &self.config)
            .field("filters", &self.filters.dim())
            .finish_non_exhaustive()
    }
}

impl SpectrogramExtractor {
    #[must_use]
    pub fn new(config: &PreprocessConfig) -> Self {
        let filters = match config.filterbank() {
            FilterbankKind::Mel => {
                mel_filterbank(config.sample_rate(), config.n_fft(), config.n_mels())
            }
            FilterbankKind::Approximate => approximate_filterbank(config.n_fft(), config.n_mels()),
        };
        let fft = FftPlanner::<f32>::new().plan_fft_forward(config.n_fft());

        Self {
            config: *config,
            window: hann_window(config.n_fft()),
            filters,
            fft,
        }
    }

    #[must_use]
    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    #[must_use]
    pub fn filters(&self) -> &Array2<f32> {
        &self.filters
    }

    /// Compute the `(n_mels, len / hop_length + 1)` log-mel spectrogram of `buffer`.
    pub fn extract(&self, buffer: &AudioBuffer) -> Result<Spectrogram> {
        let cfg = &self.config;
        if buffer.sample_rate_hz() != cfg.sample_rate() {
            return Err(PipelineError::InvalidConfig(format!(
                "buffer sample rate {} Hz does not match configured {} Hz",
                buffer.sample_rate_hz(),
                cfg.sample_rate()
            )));
        }
        if cfg.n_fft() > buffer.len() {
            return Err(PipelineError::InvalidConfig(format!(
                "n_fft ({}) exceeds buffer length ({})",
                cfg.n_fft(),
                buffer.len()
            )));
        }

        let power = self.power_frames(buffer.samples());
        let mel = self.filters.dot(&power);
        let data = power_to_db(mel, cfg.top_db());

        tracing::debug!(
            samples = buffer.len(),
            n_mels = data.nrows(),
            frames = data.ncols(),
            "log-mel spectrogram computed"
        );

        Ok(Spectrogram::new(data))
    }

    /// Power spectra of all centered frames, shape `(n_freq, frames)`.
    fn power_frames(&self, samples: &[f32]) -> Array2<f32> {
        let n_fft = self.config.n_fft();
        let hop = self.config.hop_length();
        let n_freq = self.config.n_freq();
        let n_frames = samples.len() / hop + 1;

        let left = n_fft / 2;
        let mut padded = vec![0.0f32; samples.len() + n_fft];
        padded[left..left + samples.len()].copy_from_slice(samples);

        let mut power = Array2::<f32>::zeros((n_freq, n_frames));
        let mut frame = vec![Complex::new(0.0f32, 0.0); n_fft];
        let mut scratch = vec![Complex::new(0.0f32, 0.0); self.fft.get_inplace_scratch_len()];

        for t in 0..n_frames {
            let start = t * hop;
            for ((out, &s), &w) in frame
                .iter_mut()
                .zip(&padded[start..start + n_fft])
                .zip(&self.window)
            {
                *out = Complex::new(s * w, 0.0);
            }
            self.fft.process_with_scratch(&mut frame, &mut scratch);

            for (k, c) in frame.iter().take(n_freq).enumerate() {
                power[[k, t]] = c.norm_sqr();
            }
        }
        power
    }
}

/// Extract with a one-off [`SpectrogramExtractor`].
pub fn extract(buffer: &AudioBuffer, config: &PreprocessConfig) -> Result<Spectrogram> {
    SpectrogramExtractor::new(config).extract(buffer)
}

/// `10*log10(max(amin, p)) - 10*log10(max(amin, max_p))`, floored at `-top_db`.
///
/// NaN power counts as zero and infinite power saturates, so the output is
/// always finite. A spectrogram whose peak is at or below `amin` comes back as
/// all `-top_db`.
#[must_use]
pub fn power_to_db(mut power: Array2<f32>, top_db: f32) -> Array2<f32> {
    let amin = f64::from(POWER_AMIN);
    let floor = -top_db;

    power.mapv_inplace(|p| if p.is_nan() { 0.0 } else { p.min(f32::MAX) });
    let peak = power.iter().copied().fold(0.0f32, f32::max);
    if f64::from(peak) <= amin {
        power.fill(floor);
        return power;
    }

    let ref_db = 10.0 * f64::from(peak).log10();
    power.mapv_inplace(|p| {
        let db = 10.0 * f64::from(p).max(amin).log10() - ref_db;
        (db as f32).max(floor)
    });
    power
}

/// Mean dB per mel band, useful for a quick look at where energy sits.
#[must_use]
pub fn band_means(spec: &Spectrogram) -> Vec<f32> {
    spec.view()
        .outer_iter()
        .map(|row: ArrayView1<'_, f32>| row.mean().unwrap_or(0.0))
        .collect()
}
