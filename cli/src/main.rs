//! One-shot CLI for generating a BeatSight beatmap from an audio file.

use std::path::PathBuf;
use std::process::ExitCode;

use beatsight_core::errors::BeatSightError;
use beatsight_core::ProcessOptions;
use clap::Parser;

/// Generates a rhythm-game beatmap from an audio file.
#[derive(Debug, Parser)]
#[command(name = "beatsight", version = env!("CARGO_PKG_VERSION"), about)]
struct Flags {
    /// Input audio file (wav, mp3, flac, ogg, ...).
    #[arg(short, long)]
    input: PathBuf,

    /// Output beatmap JSON path.
    #[arg(short, long)]
    output: PathBuf,

    /// Skip drum-stem isolation and analyze the full mix directly.
    #[arg(long)]
    no_separation: bool,

    /// Minimum combined classifier confidence to keep a hit, in [0.0, 1.0].
    #[arg(long, default_value_t = 0.7)]
    confidence: f32,

    /// Onset detector sensitivity, in [0.0, 100.0].
    #[arg(long, default_value_t = 60.0)]
    sensitivity: f32,

    /// Quantization grid: quarter, eighth, triplet, sixteenth, thirtysecond.
    #[arg(long, default_value = "sixteenth")]
    quantization: String,

    /// Maximum allowed snap error, in milliseconds.
    #[arg(long, default_value_t = 12.0)]
    max_snap_error: f32,

    /// Write a diagnostic payload (onset envelope, thresholds, candidates) here.
    #[arg(long)]
    debug: Option<PathBuf>,

    /// Force a specific BPM instead of the detected tempo.
    #[arg(long)]
    force_bpm: Option<f32>,

    /// Force a specific grid offset, in seconds.
    #[arg(long)]
    force_offset: Option<f32>,

    /// Force a specific grid step, in seconds.
    #[arg(long)]
    force_step: Option<f32>,

    /// Skip tempo-candidate scoring and use the forced bpm/offset/step as-is.
    #[arg(long)]
    force_quantization: bool,

    /// Comma-separated tempo candidates to bias quantization toward, e.g. "120,90".
    #[arg(long, value_delimiter = ',')]
    tempo_candidates: Vec<f32>,

    /// Path to an ONNX drum classifier model.
    #[arg(long)]
    ml_model: Option<PathBuf>,

    /// Inference device hint for the ML classifier (only "cpu" is supported).
    #[arg(long)]
    ml_device: Option<String>,

    /// Force the ML classifier backend on.
    #[arg(long)]
    ml: bool,

    /// Force the heuristic classifier backend on.
    #[arg(long)]
    no_ml: bool,
}

impl Flags {
    fn use_ml_classifier(&self) -> anyhow::Result<Option<bool>> {
        match (self.ml, self.no_ml) {
            (true, true) => anyhow::bail!("--ml and --no-ml are mutually exclusive"),
            (true, false) => Ok(Some(true)),
            (false, true) => Ok(Some(false)),
            (false, false) => Ok(None),
        }
    }
}

fn build_options(flags: &Flags) -> anyhow::Result<ProcessOptions> {
    let use_ml_classifier = flags.use_ml_classifier()?;
    Ok(ProcessOptions {
        isolate_drums: !flags.no_separation,
        confidence_threshold: flags.confidence,
        detection_sensitivity: flags.sensitivity,
        quantization_grid: flags.quantization.clone(),
        max_snap_error_ms: flags.max_snap_error,
        debug_output_path: flags.debug.clone(),
        forced_bpm: flags.force_bpm,
        forced_offset_seconds: flags.force_offset,
        forced_step_seconds: flags.force_step,
        force_quantization: flags.force_quantization,
        tempo_candidates_hint: flags.tempo_candidates.clone(),
        use_ml_classifier,
        ml_model_path: flags.ml_model.clone(),
        ml_device: flags.ml_device.clone(),
        ..ProcessOptions::default()
    })
}

fn run() -> anyhow::Result<()> {
    let flags = Flags::parse();
    let options = build_options(&flags)?;

    let report = beatsight_core::process(&flags.input, &flags.output, &options)?;

    log::info!(
        "wrote {} hits to {} (bpm {:.2}, classifier {}{})",
        report.total_hits,
        report.output_path.display(),
        report.selected_bpm,
        report.last_classifier_mode,
        if report.classifier_fell_back { ", fell back to heuristic" } else { "" }
    );
    if report.used_fallback {
        log::warn!("no onsets were detected; wrote the synthetic fallback pattern");
    }

    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(beatsight_err) = err.downcast_ref::<BeatSightError>() {
                eprintln!("error: {beatsight_err}");
            } else {
                eprintln!("error: {err}");
            }
            ExitCode::FAILURE
        }
    }
}
