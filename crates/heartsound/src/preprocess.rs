//! Waveform conditioning: silence trim, peak normalization, fixed duration.

use crate::audio::{AudioBuffer, peak_abs};
use crate::config::{PreprocessConfig, checked_target_samples};
use crate::constants::{POWER_AMIN, TRIM_FRAME_LENGTH, TRIM_HOP_LENGTH};
use crate::{PipelineError, Result};

/// Trim, normalize and force `buffer` to exactly `config.target_samples()` samples
/// (computed at the buffer's own sample rate).
pub fn preprocess(buffer: AudioBuffer, config: &PreprocessConfig) -> Result<AudioBuffer> {
    if buffer.is_empty() {
        return Err(PipelineError::EmptySignal("no samples to preprocess"));
    }

    let sample_rate_hz = buffer.sample_rate_hz();
    if sample_rate_hz == 0 {
        return Err(PipelineError::InvalidConfig("buffer sample rate is 0 Hz".into()));
    }
    let input_len = buffer.len();
    let target = checked_target_samples(config.duration_seconds(), sample_rate_hz)
        .filter(|&n| n > 0)
        .ok_or_else(|| {
            PipelineError::InvalidConfig(format!(
                "{}s at {sample_rate_hz} Hz is not a usable waveform length",
                config.duration_seconds()
            ))
        })?;

    let mut samples = buffer.into_samples();
    let (start, end) = non_silent_range(&samples, config.trim_top_db());
    if start > 0 || end < samples.len() {
        samples.truncate(end);
        samples.drain(..start);
    }
    let trimmed_len = samples.len();

    let normalized = peak_normalize(&mut samples);
    let samples = fix_length(samples, target);

    tracing::debug!(
        input_samples = input_len,
        trimmed_samples = trimmed_len,
        output_samples = samples.len(),
        normalized,
        "waveform preprocessed"
    );

    Ok(AudioBuffer::new(samples, sample_rate_hz))
}

/// Sample range `[start, end)` left after dropping leading/trailing frames more
/// than `top_db` below the loudest frame.
///
/// Frames are `TRIM_FRAME_LENGTH` long, centered every `TRIM_HOP_LENGTH` samples,
/// zero-padded at the edges. When no frame qualifies the whole range is returned.
#[must_use]
pub fn non_silent_range(samples: &[f32], top_db: f32) -> (usize, usize) {
    let n = samples.len();
    let full = (0, n);
    if n == 0 {
        return full;
    }

    let energies = frame_mean_square(samples, TRIM_FRAME_LENGTH, TRIM_HOP_LENGTH);
    let reference = energies.iter().copied().fold(0.0f64, f64::max);
    let ref_db = power_db(reference);
    let threshold = -f64::from(top_db);

    let mut loud = energies
        .iter()
        .enumerate()
        .filter(|&(_, &e)| power_db(e) - ref_db > threshold)
        .map(|(t, _)| t);
    let Some(first) = loud.next() else {
        return full;
    };
    let last = loud.last().unwrap_or(first);

    let start = first * TRIM_HOP_LENGTH;
    let end = ((last + 1) * TRIM_HOP_LENGTH).min(n);
    if start >= end {
        return full;
    }
    (start, end)
}

fn power_db(power: f64) -> f64 {
    10.0 * power.max(f64::from(POWER_AMIN)).log10()
}

/// Mean square of each centered frame; `n / hop + 1` frames.
fn frame_mean_square(samples: &[f32], frame_length: usize, hop: usize) -> Vec<f64> {
    let n = samples.len();
    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0f64);
    let mut acc = 0.0f64;
    for &s in samples {
        acc += f64::from(s) * f64::from(s);
        prefix.push(acc);
    }

    let half = frame_length / 2;
    (0..=n / hop)
        .map(|t| {
            let center = t * hop;
            let lo = center.saturating_sub(half).min(n);
            let hi = (center + frame_length - half).min(n);
            (prefix[hi] - prefix[lo]).max(0.0) / frame_length as f64
        })
        .collect()
}

/// Scale so the largest absolute sample is 1.0. Returns false (and leaves the
/// samples alone) when the buffer has no non-zero sample.
pub fn peak_normalize(samples: &mut [f32]) -> bool {
    let peak = peak_abs(samples);
    if peak <= 0.0 || !peak.is_finite() {
        return false;
    }
    for s in samples.iter_mut() {
        *s /= peak;
    }
    true
}

/// Right-pad with zeros or center-crop to exactly `target` samples.
///
/// Cropping drops `(len - target) / 2` samples from the front.
#[must_use]
pub fn fix_length(mut samples: Vec<f32>, target: usize) -> Vec<f32> {
    let len = samples.len();
    if len < target {
        samples.resize(target, 0.0);
    } else if len > target {
        let start = (len - target) / 2;
        samples.truncate(start + target);
        samples.drain(..start);
    }
    samples
}
