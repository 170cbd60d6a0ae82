//! Audio loading.
//!
//! - WAV through `hound` (integer PCM 8..32 bit, 32-bit float)
//! - compressed containers through `symphonia`
//! - mono mixdown by channel averaging
//! - linear resampling to the target rate

use std::io::Cursor;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::constants::AUDIO_EXTENSIONS;

/// Mono samples at a known sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate_hz: u32,
}

impl AudioBuffer {
    #[must_use]
    pub fn new(samples: Vec<f32>, sample_rate_hz: u32) -> Self {
        Self {
            samples,
            sample_rate_hz,
        }
    }

    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[must_use]
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    #[must_use]
    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate_hz == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate_hz)
    }

    /// Largest absolute sample value (0 for an empty buffer).
    #[must_use]
    pub fn peak(&self) -> f32 {
        peak_abs(&self.samples)
    }

    /// True when every sample is exactly zero (or the buffer is empty).
    #[must_use]
    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|&s| s == 0.0)
    }
}

pub(crate) fn peak_abs(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()))
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("read audio source: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid WAV data: {0}")]
    Wav(#[from] hound::Error),
    #[error("unsupported or corrupt container: {0}")]
    Container(#[from] SymphoniaError),
    #[error("no decodable audio track")]
    NoAudioTrack,
    #[error("stream does not declare a sample rate")]
    UnknownSampleRate,
    #[error("source sample rate is zero")]
    ZeroSampleRate,
}

/// True when `path` carries one of the recording extensions the pipeline expects.
#[must_use]
pub fn has_audio_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| AUDIO_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

/// Decode a file and resample it to `target_sample_rate_hz`.
///
/// The file extension is passed to the container probe as a hint.
pub fn load(path: impl AsRef<Path>, target_sample_rate_hz: u32) -> Result<AudioBuffer, DecodeError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let ext = path.extension().and_then(|e| e.to_str());
    load_bytes(&bytes, ext, target_sample_rate_hz)
}

/// Decode an in-memory audio blob and resample it to `target_sample_rate_hz`.
///
/// A zero-byte blob or a container without frames yields an empty buffer; the
/// caller decides how to report it.
pub fn load_bytes(
    bytes: &[u8],
    extension_hint: Option<&str>,
    target_sample_rate_hz: u32,
) -> Result<AudioBuffer, DecodeError> {
    if target_sample_rate_hz == 0 {
        return Err(DecodeError::ZeroSampleRate);
    }
    if bytes.is_empty() {
        return Ok(AudioBuffer::new(Vec::new(), target_sample_rate_hz));
    }

    let decoded = decode_bytes(bytes, extension_hint)?;
    let source_rate_hz = decoded.sample_rate_hz;
    let samples = resample_linear_mono_f32(&decoded.samples, source_rate_hz, target_sample_rate_hz);

    tracing::debug!(
        source_sample_rate_hz = source_rate_hz,
        target_sample_rate_hz,
        input_samples = decoded.len(),
        output_samples = samples.len(),
        "audio decoded"
    );

    Ok(AudioBuffer::new(samples, target_sample_rate_hz))
}

/// Decode to mono at the source's native sample rate.
pub fn decode_bytes(bytes: &[u8], extension_hint: Option<&str>) -> Result<AudioBuffer, DecodeError> {
    let decoded = if is_riff_wave(bytes) {
        decode_wav(bytes)?
    } else {
        decode_container(bytes, extension_hint)?
    };
    if decoded.sample_rate_hz == 0 {
        return Err(DecodeError::ZeroSampleRate);
    }
    Ok(decoded)
}

fn is_riff_wave(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

fn decode_wav(bytes: &[u8]) -> Result<AudioBuffer, DecodeError> {
    let reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1u64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    Ok(AudioBuffer::new(
        downmix(&interleaved, usize::from(spec.channels)),
        spec.sample_rate,
    ))
}

fn decode_container(bytes: &[u8], extension_hint: Option<&str>) -> Result<AudioBuffer, DecodeError> {
    let source = Cursor::new(bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(source), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension_hint {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoAudioTrack)?;
    let track_id = track.id;
    let mut sample_rate_hz = track.codec_params.sample_rate;
    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples = Vec::new();
    let mut skipped_packets = 0usize;
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(reason)) => {
                skipped_packets += 1;
                tracing::warn!(reason, "skipping corrupt audio packet");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        sample_rate_hz.get_or_insert(spec.rate);
        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        samples.extend(downmix(buf.samples(), spec.channels.count()));
    }

    if skipped_packets > 0 {
        tracing::warn!(skipped_packets, "container decoded with corrupt packets");
    }

    let sample_rate_hz = sample_rate_hz.ok_or(DecodeError::UnknownSampleRate)?;
    Ok(AudioBuffer::new(samples, sample_rate_hz))
}

/// Average interleaved frames to one channel.
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Linearly resample `input` from `src_hz` to `dst_hz`.
///
/// Output length is `floor(len * dst_hz / src_hz)`; the last source sample is
/// held when interpolation runs past the end.
#[must_use]
pub fn resample_linear_mono_f32(input: &[f32], src_hz: u32, dst_hz: u32) -> Vec<f32> {
    if src_hz == dst_hz || input.is_empty() || src_hz == 0 {
        return input.to_vec();
    }

    let new_n = (input.len() as u64 * u64::from(dst_hz) / u64::from(src_hz)) as usize;
    let step = f64::from(src_hz) / f64::from(dst_hz);
    let last = input.len() - 1;

    (0..new_n)
        .map(|i| {
            let src_pos = i as f64 * step;
            let idx = (src_pos.floor() as usize).min(last);
            let frac = (src_pos - idx as f64) as f32;
            let a = input[idx];
            let b = input[(idx + 1).min(last)];
            a * (1.0 - frac) + b * frac
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 16-bit PCM WAV bytes with interleaved `samples`.
    pub(crate) fn wav_bytes_i16(samples: &[i16], channels: u16, sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("wav writer");
            for &s in samples {
                writer.write_sample(s).expect("write sample");
            }
            writer.finalize().expect("finalize wav");
        }
        cursor.into_inner()
    }

    #[test]
    fn resample_linear_identity() {
        let x = vec![0.0, 1.0, 2.0, 3.0];
        let y = resample_linear_mono_f32(&x, 8_000, 8_000);
        assert_eq!(x, y);
    }

    #[test]
    fn resample_linear_length() {
        let x = vec![0.0f32; 44_100];
        let y = resample_linear_mono_f32(&x, 44_100, 8_000);
        assert_eq!(y.len(), 8_000);

        let x = vec![0.0f32; 16_000];
        let y = resample_linear_mono_f32(&x, 48_000, 16_000);
        assert_eq!(y.len(), 5333); // floor(16000*16000/48000)
    }

    #[test]
    fn resample_linear_interpolates_upsampled_ramp() {
        let x = vec![0.0, 1.0, 2.0, 3.0];
        let y = resample_linear_mono_f32(&x, 4, 8);
        assert_eq!(y.len(), 8);
        let expect = [0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 3.0];
        for (got, want) in y.iter().zip(expect) {
            approx::assert_abs_diff_eq!(*got, want, epsilon = 1e-6);
        }
    }

    #[test]
    fn wav_stereo_is_averaged_to_mono() {
        // Two frames: (L=16384, R=0), (L=-16384, R=-16384)
        let wav = wav_bytes_i16(&[16_384, 0, -16_384, -16_384], 2, 8_000);
        let buf = decode_bytes(&wav, Some("wav")).expect("decode wav");
        assert_eq!(buf.sample_rate_hz(), 8_000);
        assert_eq!(buf.len(), 2);
        approx::assert_abs_diff_eq!(buf.samples()[0], 0.25, epsilon = 1e-6);
        approx::assert_abs_diff_eq!(buf.samples()[1], -0.5, epsilon = 1e-6);
    }

    #[test]
    fn float_wav_decodes() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 4_000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("wav writer");
            for s in [0.5f32, -0.25, 0.125] {
                writer.write_sample(s).expect("write sample");
            }
            writer.finalize().expect("finalize wav");
        }
        let buf = decode_bytes(&cursor.into_inner(), None).expect("decode float wav");
        assert_eq!(buf.samples(), &[0.5, -0.25, 0.125]);
    }

    #[test]
    fn load_resamples_to_target_rate() {
        let wav = wav_bytes_i16(&vec![1_000i16; 16_000], 1, 16_000);
        let buf = load_bytes(&wav, Some("wav"), 8_000).expect("load");
        assert_eq!(buf.sample_rate_hz(), 8_000);
        assert_eq!(buf.len(), 8_000);
        approx::assert_abs_diff_eq!(buf.duration_seconds(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn zero_bytes_give_empty_buffer() {
        let buf = load_bytes(&[], Some("wav"), 8_000).expect("empty source is not a decode error");
        assert!(buf.is_empty());
        assert_eq!(buf.sample_rate_hz(), 8_000);
    }

    #[test]
    fn wav_without_frames_gives_empty_buffer() {
        let wav = wav_bytes_i16(&[], 1, 8_000);
        let buf = load_bytes(&wav, Some("wav"), 8_000).expect("load");
        assert!(buf.is_empty());
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let junk = b"definitely not an audio container, just some text bytes".to_vec();
        assert!(load_bytes(&junk, None, 8_000).is_err());

        let mut truncated = wav_bytes_i16(&[1, 2, 3], 1, 8_000);
        truncated.truncate(20);
        assert!(matches!(
            load_bytes(&truncated, Some("wav"), 8_000),
            Err(DecodeError::Wav(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load("/nonexistent/heartsound/recording.wav", 8_000).unwrap_err();
        assert!(matches!(err, DecodeError::Io(_)));
    }

    #[test]
    fn recognizes_recording_extensions() {
        assert!(has_audio_extension(Path::new("a0001.wav")));
        assert!(has_audio_extension(Path::new("clip.M4A")));
        assert!(!has_audio_extension(Path::new("notes.txt")));
        assert!(!has_audio_extension(Path::new("no_extension")));
    }

    #[test]
    fn buffer_peak_and_silence() {
        let buf = AudioBuffer::new(vec![0.0, -0.75, 0.5], 8_000);
        assert_eq!(buf.peak(), 0.75);
        assert!(!buf.is_silent());
        assert!(AudioBuffer::new(vec![0.0; 4], 8_000).is_silent());
    }
}
