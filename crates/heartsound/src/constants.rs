//! Signal-processing defaults.

// Feature extraction (matches the parameters the classifier was trained with).
pub const SAMPLE_RATE_HZ: u32 = 8_000;
pub const DURATION_SECONDS: f64 = 5.0;
pub const MEL_BINS: usize = 128;
pub const N_FFT: usize = 1024;
pub const HOP_LENGTH: usize = 256; // 32ms @ 8kHz

// Upper bound on a fixed-length waveform (4 GiB of f32 samples).
pub const MAX_TARGET_SAMPLES: usize = 1 << 30;

// Silence trimming.
pub const TRIM_TOP_DB: f32 = 20.0;
pub const TRIM_FRAME_LENGTH: usize = 2048;
pub const TRIM_HOP_LENGTH: usize = 512;

// Decibel conversion.
pub const TOP_DB: f32 = 80.0;
pub const POWER_AMIN: f32 = 1e-10;

pub const CLASSIFICATION_THRESHOLD: f32 = 0.5;

pub const AUDIO_EXTENSIONS: &[&str] = &["wav", "flac", "mp3", "webm", "ogg", "m4a"];
pub const CONFIG_FILENAME: &str = "preprocess_config.json";
