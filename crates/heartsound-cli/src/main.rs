use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use heartsound::mel::band_means;
use heartsound::{FeaturePipeline, PipelineOutput, PreprocessConfig, audio, npy};
use tracing_subscriber::EnvFilter;

mod batch;

#[derive(Debug, Parser)]
#[command(name = "heartsound")]
#[command(about = "Heart sound log-mel feature extraction", long_about = None)]
struct Args {
    /// Log pipeline stages at debug level.
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Extract the log-mel spectrogram of a single recording.
    Features {
        /// Path to an audio file (wav, flac, mp3, ogg, m4a, ...).
        #[arg(long)]
        audio: Option<PathBuf>,

        /// Read the encoded audio blob from stdin.
        #[arg(long, default_value_t = false)]
        stdin: bool,

        /// Preprocessing config JSON; defaults when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Save the `(n_mels, frames)` spectrogram as a `.npy` file.
        #[arg(long)]
        npy: Option<PathBuf>,
    },

    /// Extract spectrograms for a PhysioNet 2016 style dataset.
    Batch {
        /// Directory holding the `training-*` subsets.
        #[arg(long)]
        data_dir: PathBuf,

        /// Output root; spectrograms land in `<output>/<label>/<file_id>.npy`.
        #[arg(long)]
        output_dir: PathBuf,

        /// Recompute spectrograms that already exist.
        #[arg(long, default_value_t = false)]
        force: bool,

        /// Process at most this many recordings.
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print (or write) the default preprocessing config.
    Config {
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Features {
            audio,
            stdin,
            config,
            npy: npy_out,
        } => {
            let config = load_config(config.as_deref())?;
            let output = match (audio, stdin) {
                (Some(path), false) => run_file(&config, &path)?,
                (None, true) => run_stdin(&config)?,
                _ => anyhow::bail!("choose exactly one input mode: --audio or --stdin"),
            };
            report(&output);
            if let Some(path) = npy_out {
                npy::write_f32(&path, &output.spectrogram())
                    .with_context(|| format!("write {}", path.display()))?;
                eprintln!("saved spectrogram to {}", path.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Batch {
            data_dir,
            output_dir,
            force,
            limit,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let summary = batch::run(&batch::BatchOptions {
                data_dir,
                output_dir,
                force,
                limit,
                config,
            })?;
            Ok(if summary.failed.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Config { output } => {
            let config = PreprocessConfig::default();
            match output {
                Some(path) => {
                    config
                        .save(&path)
                        .with_context(|| format!("write {}", path.display()))?;
                    eprintln!("config written to {}", path.display());
                }
                None => println!("{}", config.to_json_pretty().context("serialize config")?),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<PreprocessConfig> {
    match path {
        Some(path) => PreprocessConfig::from_path(path)
            .with_context(|| format!("load config {}", path.display())),
        None => Ok(PreprocessConfig::default()),
    }
}

fn run_file(config: &PreprocessConfig, path: &Path) -> Result<PipelineOutput> {
    if !audio::has_audio_extension(path) {
        tracing::warn!(path = %path.display(), "unrecognized audio extension, probing contents");
    }
    FeaturePipeline::new(*config)
        .run_path(path)
        .with_context(|| format!("extract features from {}", path.display()))
}

fn run_stdin(config: &PreprocessConfig) -> Result<PipelineOutput> {
    let mut buf = Vec::new();
    std::io::stdin()
        .read_to_end(&mut buf)
        .context("read stdin")?;
    FeaturePipeline::new(*config)
        .run_bytes(&buf, None)
        .context("extract features from stdin")
}

fn report(output: &PipelineOutput) {
    let spec = output.tensor.clone().squeeze();
    let (n_mels, frames) = spec.shape();
    let loudest_band = band_means(&spec)
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(band, _)| band)
        .unwrap_or(0);
    println!(
        "samples={} sample_rate={} n_mels={n_mels} frames={frames} tensor={:?} db_range=[{:.1}, {:.1}] loudest_band={loudest_band}",
        output.waveform.len(),
        output.waveform.sample_rate_hz(),
        output.tensor.shape(),
        spec.min_db(),
        spec.max_db(),
    );
}
