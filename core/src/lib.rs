//! Deterministic audio-to-beatmap pipeline: decode, detect onsets, classify
//! drum components and assemble a tempo-quantized beatmap.
//!
//! [`process`] wires the stages together in the order described module by
//! module below; nothing here keeps state between calls — every stage takes
//! its input by reference and hands back owned data, and per-run telemetry
//! that the reference implementation tracked as module-level globals is
//! returned directly from [`process`] as a [`ProcessReport`] instead.

pub mod assemble;
pub mod classify;
pub mod debug;
pub mod decoder;
pub mod dsp;
pub mod errors;
pub mod isolator;
#[cfg(feature = "ml")]
pub mod ml;
pub mod metadata;
pub mod onset;
pub mod refine;
pub mod types;

use std::path::{Path, PathBuf};

use chrono::SecondsFormat;

use assemble::{AssembleOptions, QuantizationGrid};
use classify::{ClassifierMode, ClassifierTelemetry};
use errors::{BeatSightError, BeatSightResult};
use isolator::{DrumIsolator, PassthroughIsolator};
use metadata::{MetadataProvider, TagMetadataProvider};
use onset::DetectorParams;
use types::ClassifiedHit;

/// Tunables for a single [`process`] run (spec §6 CLI flags / defaults).
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub isolate_drums: bool,
    pub confidence_threshold: f32,
    pub detection_sensitivity: f32,
    pub quantization_grid: String,
    pub max_snap_error_ms: f32,
    pub debug_output_path: Option<PathBuf>,
    pub forced_bpm: Option<f32>,
    pub forced_offset_seconds: Option<f32>,
    pub forced_step_seconds: Option<f32>,
    pub force_quantization: bool,
    pub tempo_candidates_hint: Vec<f32>,
    pub use_ml_classifier: Option<bool>,
    pub ml_model_path: Option<PathBuf>,
    pub ml_device: Option<String>,
    pub target_sample_rate: u32,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            isolate_drums: true,
            confidence_threshold: 0.7,
            detection_sensitivity: 60.0,
            quantization_grid: "sixteenth".to_string(),
            max_snap_error_ms: 12.0,
            debug_output_path: None,
            forced_bpm: None,
            forced_offset_seconds: None,
            forced_step_seconds: None,
            force_quantization: false,
            tempo_candidates_hint: Vec::new(),
            use_ml_classifier: None,
            ml_model_path: None,
            ml_device: None,
            target_sample_rate: decoder::DEFAULT_TARGET_SAMPLE_RATE,
        }
    }
}

/// Per-run outcome returned by [`process`], replacing the reference
/// implementation's `last_classifier_mode` / `last_classifier_model_path`
/// module-level globals with values the caller receives directly.
#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub output_path: PathBuf,
    pub debug_output_path: Option<PathBuf>,
    pub total_hits: usize,
    pub used_fallback: bool,
    pub last_classifier_mode: String,
    pub last_classifier_model_path: Option<PathBuf>,
    pub classifier_fell_back: bool,
    pub classifier_fallback_reason: Option<String>,
    pub estimated_tempo: f32,
    pub selected_bpm: f32,
}

/// Validates the caller-facing options, surfacing unrecognized values as
/// [`BeatSightError::InvalidOptions`] rather than silently defaulting
/// (spec §7).
fn validate_options(options: &ProcessOptions) -> BeatSightResult<QuantizationGrid> {
    if !(0.0..=1.0).contains(&options.confidence_threshold) {
        return Err(BeatSightError::InvalidOptions(format!(
            "confidence_threshold must be within [0.0, 1.0], got {}",
            options.confidence_threshold
        )));
    }
    if !(0.0..=100.0).contains(&options.detection_sensitivity) {
        return Err(BeatSightError::InvalidOptions(format!(
            "detection_sensitivity must be within [0.0, 100.0], got {}",
            options.detection_sensitivity
        )));
    }
    if options.max_snap_error_ms <= 0.0 {
        return Err(BeatSightError::InvalidOptions(format!(
            "max_snap_error_ms must be positive, got {}",
            options.max_snap_error_ms
        )));
    }
    QuantizationGrid::try_from_name(&options.quantization_grid).ok_or_else(|| {
        BeatSightError::InvalidOptions(format!(
            "unrecognized quantization grid {:?}, expected one of quarter/eighth/triplet/sixteenth/thirtysecond",
            options.quantization_grid
        ))
    })
}

fn iso_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Runs stages A through F against `input_path`, writing the resulting
/// beatmap JSON to `output_path` (and, if requested, a debug payload to
/// `options.debug_output_path`).
pub fn process(input_path: &Path, output_path: &Path, options: &ProcessOptions) -> BeatSightResult<ProcessReport> {
    let quantization_grid = validate_options(options)?;

    let audio = decoder::preprocess(input_path, options.target_sample_rate)?;
    let audio_hash = format!("sha256:{}", decoder::hash_file(input_path)?);
    let audio_filename = input_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| input_path.to_string_lossy().into_owned());

    let detected_metadata = TagMetadataProvider.detect(input_path);
    let metadata_provider = if detected_metadata.is_empty() {
        None
    } else {
        Some(TagMetadataProvider.name().to_string())
    };

    let (analysis_audio, drum_stem) = if options.isolate_drums {
        let isolated = PassthroughIsolator
            .isolate(&audio)
            .unwrap_or_else(|never| match never {});
        (isolated, None)
    } else {
        (audio.clone(), None)
    };

    let detector_params = DetectorParams {
        sensitivity: options.detection_sensitivity,
        tempo_hint: options.tempo_candidates_hint.first().copied(),
        ..DetectorParams::default()
    };
    let detection = onset::detect(&analysis_audio.samples, analysis_audio.sample_rate, &detector_params);
    let refined = refine::refine(
        &analysis_audio.samples,
        analysis_audio.sample_rate,
        &detection.onsets,
        refine::DEFAULT_WINDOW_MS,
    );
    let mut refined_detection = detection.clone();
    refined_detection.onsets = refined;

    let (classified_hits, telemetry) = classify_onsets(
        &analysis_audio.samples,
        analysis_audio.sample_rate,
        &refined_detection.onsets,
        options,
    );

    let assemble_options = AssembleOptions {
        quantization_grid,
        max_snap_error_ms: options.max_snap_error_ms,
        forced_bpm: options.forced_bpm,
        forced_offset_seconds: options.forced_offset_seconds.map(f64::from),
        forced_step_seconds: options.forced_step_seconds.map(f64::from),
        force_quantization: options.force_quantization,
        tempo_candidates_hint: options.tempo_candidates_hint.clone(),
    };

    let beatmap_id = uuid::Uuid::new_v4().to_string();
    let created_at = iso_now();
    let processed_at = created_at.clone();

    let (beatmap, debug_payload) = assemble::assemble(
        &classified_hits,
        &refined_detection,
        &analysis_audio.samples,
        analysis_audio.sample_rate,
        &audio_filename,
        &audio_hash,
        audio.duration_ms(),
        drum_stem,
        detected_metadata.title.as_deref(),
        detected_metadata.artist.as_deref(),
        (!detected_metadata.is_empty()).then(|| detected_metadata.tags()),
        None,
        None,
        metadata_provider,
        None,
        beatmap_id,
        created_at,
        processed_at,
        &assemble_options,
    )?;

    write_json(output_path, &beatmap)?;
    if let Some(debug_path) = &options.debug_output_path {
        write_json(debug_path, &debug_payload)?;
    }

    Ok(ProcessReport {
        output_path: output_path.to_path_buf(),
        debug_output_path: options.debug_output_path.clone(),
        total_hits: beatmap.hit_objects.len(),
        used_fallback: debug_payload.used_fallback,
        last_classifier_mode: classifier_mode_label(&telemetry.mode),
        last_classifier_model_path: match telemetry.mode {
            ClassifierMode::Ml { model_path } => Some(model_path),
            ClassifierMode::Heuristic => None,
        },
        classifier_fell_back: telemetry.fell_back,
        classifier_fallback_reason: telemetry.fallback_reason,
        estimated_tempo: refined_detection.estimated_tempo,
        selected_bpm: beatmap.timing.bpm,
    })
}

fn classifier_mode_label(mode: &ClassifierMode) -> String {
    match mode {
        ClassifierMode::Heuristic => "heuristic".to_string(),
        ClassifierMode::Ml { model_path } => format!("ml:{}", model_path.display()),
    }
}

/// Resolves and runs the classifier backend selected by `options` (spec
/// §4.E): an explicit `use_ml_classifier: Some(false)` always selects the
/// heuristic backend; otherwise the ML backend is attempted when compiled in
/// and a model file is resolvable, falling back to the heuristic backend on
/// any load or inference failure.
fn classify_onsets(
    samples: &[f32],
    sample_rate: u32,
    onsets: &[types::DetectedOnset],
    options: &ProcessOptions,
) -> (Vec<ClassifiedHit>, ClassifierTelemetry) {
    let (ml_requested, model_path) = classify::resolve_backend(options.use_ml_classifier, options.ml_model_path.as_deref());

    if options.use_ml_classifier == Some(false) {
        let hits = classify::classify_heuristic(samples, sample_rate, onsets, options.confidence_threshold);
        return (
            hits,
            ClassifierTelemetry { mode: ClassifierMode::Heuristic, fell_back: false, fallback_reason: None },
        );
    }

    #[cfg(feature = "ml")]
    {
        if ml_requested {
            if let Some(device) = options.ml_device.as_deref().filter(|d| !d.eq_ignore_ascii_case("cpu")) {
                log::warn!("ml_device {device:?} requested but only CPU inference is supported, ignoring");
            }
            if let Some(path) = model_path.filter(|p| p.is_file()) {
                match ml::MlClassifier::load(&path) {
                    Ok(mut classifier) => match classifier.classify(samples, sample_rate, onsets, options.confidence_threshold) {
                        Ok(hits) => {
                            return (
                                hits,
                                ClassifierTelemetry {
                                    mode: ClassifierMode::Ml { model_path: path },
                                    fell_back: false,
                                    fallback_reason: None,
                                },
                            );
                        }
                        Err(reason) => {
                            log::warn!("ML classifier inference failed, falling back to heuristic: {reason}");
                            let hits = classify::classify_heuristic(samples, sample_rate, onsets, options.confidence_threshold);
                            return (
                                hits,
                                ClassifierTelemetry {
                                    mode: ClassifierMode::Heuristic,
                                    fell_back: true,
                                    fallback_reason: Some(reason),
                                },
                            );
                        }
                    },
                    Err(err) => {
                        let reason = err.to_string();
                        log::warn!("failed to load ML classifier model, falling back to heuristic: {reason}");
                        let hits = classify::classify_heuristic(samples, sample_rate, onsets, options.confidence_threshold);
                        return (
                            hits,
                            ClassifierTelemetry { mode: ClassifierMode::Heuristic, fell_back: true, fallback_reason: Some(reason) },
                        );
                    }
                }
            }
            log::warn!("ML classifier requested but no model artifact is available, using heuristic backend");
            let hits = classify::classify_heuristic(samples, sample_rate, onsets, options.confidence_threshold);
            return (
                hits,
                ClassifierTelemetry {
                    mode: ClassifierMode::Heuristic,
                    fell_back: true,
                    fallback_reason: Some("no ML model artifact resolved".to_string()),
                },
            );
        }
    }

    #[cfg(not(feature = "ml"))]
    {
        let _ = model_path;
        if ml_requested {
            log::warn!("ML classifier requested but this build was compiled without the `ml` feature, using heuristic backend");
            let hits = classify::classify_heuristic(samples, sample_rate, onsets, options.confidence_threshold);
            return (
                hits,
                ClassifierTelemetry {
                    mode: ClassifierMode::Heuristic,
                    fell_back: true,
                    fallback_reason: Some("ml feature not compiled in".to_string()),
                },
            );
        }
    }

    let hits = classify::classify_heuristic(samples, sample_rate, onsets, options.confidence_threshold);
    (hits, ClassifierTelemetry { mode: ClassifierMode::Heuristic, fell_back: false, fallback_reason: None })
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> BeatSightResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_confidence_threshold_out_of_range() {
        let options = ProcessOptions { confidence_threshold: 1.5, ..ProcessOptions::default() };
        assert!(matches!(validate_options(&options), Err(BeatSightError::InvalidOptions(_))));
    }

    #[test]
    fn rejects_unknown_quantization_grid() {
        let options = ProcessOptions { quantization_grid: "whole".to_string(), ..ProcessOptions::default() };
        assert!(matches!(validate_options(&options), Err(BeatSightError::InvalidOptions(_))));
    }

    #[test]
    fn rejects_non_positive_snap_tolerance() {
        let options = ProcessOptions { max_snap_error_ms: 0.0, ..ProcessOptions::default() };
        assert!(matches!(validate_options(&options), Err(BeatSightError::InvalidOptions(_))));
    }

    #[test]
    fn default_options_validate() {
        let options = ProcessOptions::default();
        assert!(validate_options(&options).is_ok());
    }
}
