use approx::assert_abs_diff_eq;
use heartsound::mel::{self, SpectrogramExtractor};
use heartsound::preprocess::{fix_length, preprocess};
use heartsound::tensor::{assemble, assemble_dyn};
use heartsound::{AudioBuffer, FeaturePipeline, FilterbankKind, PipelineError, PreprocessConfig};

const SR: u32 = 8_000;

fn sine(freq_hz: f32, seconds: f32) -> AudioBuffer {
    let n = (seconds * SR as f32).round() as usize;
    let samples = (0..n)
        .map(|i| (2.0 * std::f32::consts::PI * freq_hz * i as f32 / SR as f32).sin() * 0.3)
        .collect();
    AudioBuffer::new(samples, SR)
}

fn wav_bytes(buffer: &AudioBuffer) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: buffer.sample_rate_hz(),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("wav writer");
        for &s in buffer.samples() {
            writer
                .write_sample((s.clamp(-1.0, 1.0) * 32_767.0) as i16)
                .expect("write sample");
        }
        writer.finalize().expect("finalize");
    }
    cursor.into_inner()
}

#[test]
fn short_recording_is_padded_to_five_seconds() {
    let config = PreprocessConfig::default();
    let waveform = preprocess(sine(100.0, 2.0), &config).expect("preprocess");

    assert_eq!(waveform.len(), 40_000);
    assert_abs_diff_eq!(waveform.peak(), 1.0, epsilon = 1e-6);
    assert!(waveform.samples()[16_000..].iter().all(|&s| s == 0.0));

    let spec = mel::extract(&waveform, &config).expect("extract");
    assert_eq!(spec.shape(), (128, 157));
    assert_abs_diff_eq!(spec.max_db(), 0.0, epsilon = 1e-4);
    assert!(spec.min_db() >= -80.0);
}

#[test]
fn long_recording_keeps_its_middle() {
    let ramp: Vec<f32> = (0..80_000).map(|i| i as f32).collect();
    let cropped = fix_length(ramp, 40_000);
    assert_eq!(cropped.len(), 40_000);
    assert_eq!(cropped[0], 20_000.0);
    assert_eq!(cropped[39_999], 59_999.0);
}

#[test]
fn ten_second_tone_comes_out_at_configured_shape() {
    let config = PreprocessConfig::default();
    let waveform = preprocess(sine(150.0, 10.0), &config).expect("preprocess");
    assert_eq!(waveform.len(), config.target_samples());

    let tensor = assemble(mel::extract(&waveform, &config).expect("extract"));
    assert_eq!(tensor.shape(), config.model_input_shape());
    assert_eq!(tensor.shape(), [1, 128, 157, 1]);
}

#[test]
fn silent_stage_input_passes_through_to_floor_spectrogram() {
    let config = PreprocessConfig::default();
    let silent = AudioBuffer::new(vec![0.0; 40_000], SR);

    let waveform = preprocess(silent.clone(), &config).expect("silence is valid stage input");
    assert_eq!(waveform, silent);

    let spec = mel::extract(&waveform, &config).expect("extract");
    assert_eq!(spec.shape(), (128, 157));
    assert!(spec.view().iter().all(|&v| v == -config.top_db()));
}

#[test]
fn pipeline_front_door_rejects_silence() {
    let pipeline = FeaturePipeline::new(PreprocessConfig::default());
    let silent = wav_bytes(&AudioBuffer::new(vec![0.0; 16_000], SR));
    assert!(matches!(
        pipeline.run_bytes(&silent, Some("wav")),
        Err(PipelineError::EmptySignal(_))
    ));
}

#[test]
fn every_length_produces_the_same_shape() {
    let config = PreprocessConfig::default();
    let extractor = SpectrogramExtractor::new(&config);
    for seconds in [0.3, 1.0, 4.99, 5.0, 5.01, 7.5, 12.0] {
        let waveform = preprocess(sine(90.0, seconds), &config).expect("preprocess");
        assert_eq!(waveform.len(), 40_000, "{seconds}s");
        let spec = extractor.extract(&waveform).expect("extract");
        assert_eq!(spec.shape(), config.expected_shape(), "{seconds}s");
        assert!(spec.max_db() <= 0.0 + 1e-4, "{seconds}s");
    }
}

#[test]
fn wav_at_another_rate_runs_end_to_end() {
    let tone_44k: Vec<f32> = (0..44_100 * 3)
        .map(|i| (2.0 * std::f32::consts::PI * 120.0 * i as f32 / 44_100.0).sin() * 0.5)
        .collect();
    let bytes = wav_bytes(&AudioBuffer::new(tone_44k, 44_100));

    let pipeline = FeaturePipeline::new(PreprocessConfig::default());
    let output = pipeline.run_bytes(&bytes, Some("wav")).expect("pipeline");
    assert_eq!(output.waveform.sample_rate_hz(), SR);
    assert_eq!(output.waveform.len(), 40_000);
    assert_eq!(output.tensor.shape(), [1, 128, 157, 1]);
}

#[test]
fn approximate_filterbank_keeps_the_shape_contract() {
    let config = PreprocessConfig::default().with_filterbank(FilterbankKind::Approximate);
    let output = FeaturePipeline::new(config)
        .run_buffer(sine(200.0, 4.0))
        .expect("pipeline");
    assert_eq!(output.tensor.shape(), [1, 128, 157, 1]);
    assert_abs_diff_eq!(output.tensor.clone().squeeze().max_db(), 0.0, epsilon = 1e-4);
}

#[test]
fn custom_config_changes_frames_and_bands() {
    let json = r#"{"sample_rate": 4000, "duration": 2.0, "n_mels": 64, "n_fft": 512, "hop_length": 128}"#;
    let config = PreprocessConfig::from_json_str(json).expect("config");
    assert_eq!(config.expected_shape(), (64, 63));

    let tone: Vec<f32> = (0..4_000 * 3)
        .map(|i| (2.0 * std::f32::consts::PI * 50.0 * i as f32 / 4_000.0).sin())
        .collect();
    let output = FeaturePipeline::new(config)
        .run_buffer(AudioBuffer::new(tone, 4_000))
        .expect("pipeline");
    assert_eq!(output.waveform.len(), 8_000);
    assert_eq!(output.tensor.shape(), [1, 64, 63, 1]);
}

#[test]
fn saved_spectrogram_reassembles_into_model_input() {
    let output = FeaturePipeline::new(PreprocessConfig::default())
        .run_buffer(sine(75.0, 5.0))
        .expect("pipeline");
    let path = std::env::temp_dir().join(format!("heartsound-it-{}.npy", std::process::id()));
    heartsound::npy::write_f32(&path, &output.spectrogram()).expect("write npy");

    let loaded = heartsound::npy::read_f32(&path).expect("read npy");
    let tensor = assemble_dyn(loaded).expect("2-d spectrogram");
    assert_eq!(tensor, output.tensor);
    std::fs::remove_file(&path).ok();
}
