//! Classifier (spec §4.E): assigns a drum-component label and confidence to
//! each refined onset.
//!
//! Backend selection is expressed as a sealed enum rather than the
//! `try/except ImportError` dance the reference `classify_drums` uses to
//! decide between its heuristic and ML code paths (spec §9 redesign note).
//! Per-call telemetry is returned as an explicit value
//! ([`ClassifierTelemetry`]) instead of the reference implementation's
//! module-level `last_classifier_mode` / `last_classifier_model_path`
//! globals.

use std::path::{Path, PathBuf};

use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use rustfft::{num_complex::Complex32, FftPlanner};

use crate::dsp::hann_window;
use crate::types::{ClassifiedHit, Component, DetectedOnset};

/// Which backend produced a batch of classifications, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifierMode {
    Heuristic,
    Ml { model_path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct ClassifierTelemetry {
    pub mode: ClassifierMode,
    pub fell_back: bool,
    pub fallback_reason: Option<String>,
}

/// Resolves the ML/heuristic backend selection described in spec §4.E.
///
/// `use_ml` mirrors `--ml`/`--no-ml`; `None` defers to the
/// `BEATSIGHT_USE_ML_CLASSIFIER` environment variable, defaulting to `true`
/// when neither is set.
#[must_use]
pub fn resolve_backend(use_ml: Option<bool>, model_path: Option<&Path>) -> (bool, Option<PathBuf>) {
    let ml_enabled = use_ml.unwrap_or_else(|| {
        std::env::var("BEATSIGHT_USE_ML_CLASSIFIER")
            .ok()
            .and_then(|v| interpret_bool(&v))
            .unwrap_or(true)
    });

    let resolved_path = model_path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var("BEATSIGHT_ML_MODEL_PATH").ok().map(PathBuf::from));

    (ml_enabled, resolved_path)
}

fn interpret_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Runs the heuristic classifier over every onset, dropping hits whose
/// combined confidence falls below `confidence_threshold`.
///
/// Each onset's window of samples is classified independently, so the batch
/// is split across a rayon thread pool the same way `Analysis::from_samples`
/// parallelizes its independent per-feature passes with `rayon::join`; the
/// `filter_map` over a parallel iterator preserves onset order in the output.
#[must_use]
pub fn classify_heuristic(
    samples: &[f32],
    sample_rate: u32,
    onsets: &[DetectedOnset],
    confidence_threshold: f32,
) -> Vec<ClassifiedHit> {
    onsets
        .par_iter()
        .filter_map(|onset| {
            let (mut component, mut class_confidence) =
                classify_onset_heuristic(samples, sample_rate, onset.time_seconds, 100.0);

            let mut combined = (onset.confidence + class_confidence) / 2.0;
            if combined < confidence_threshold {
                return None;
            }

            if component == "unknown" && confidence_threshold < 0.4 {
                component = "hihat_closed".to_string();
                class_confidence = 0.4;
                combined = (onset.confidence + class_confidence) / 2.0;
            }

            if component == "unknown" {
                return None;
            }

            Some(ClassifiedHit {
                onset: onset.clone(),
                component,
                class_confidence,
                confidence: combined,
                fallback: false,
            })
        })
        .collect()
}

/// Extracts the 100 ms (25 ms pre-onset) analysis window around `onset_time`
/// and classifies it via the fixed decision table in spec §4.E.1.
fn classify_onset_heuristic(
    samples: &[f32],
    sample_rate: u32,
    onset_time: f64,
    window_ms: f32,
) -> (Component, f32) {
    let window_samples = (window_ms * sample_rate as f32 / 1000.0) as usize;
    let center = (onset_time * f64::from(sample_rate)) as i64;
    let start = (center - (window_samples / 4) as i64).max(0) as usize;
    let end = ((center + window_samples as i64) as usize).min(samples.len());

    if end <= start || end - start < 10 {
        return ("unknown".to_string(), 0.0);
    }

    let window = &samples[start..end];
    let features = spectral_features(window, sample_rate);
    classify_by_rules(&features)
}

struct SpectralFeatures {
    centroid: f32,
    rolloff: f32,
    zcr: f32,
    rms: f32,
}

/// Frame-averaged spectral centroid, rolloff (85% energy), zero-crossing
/// rate and RMS, analogous to `librosa.feature.{spectral_centroid,
/// spectral_rolloff, zero_crossing_rate, rms}` averaged across frames.
fn spectral_features(window: &[f32], sample_rate: u32) -> SpectralFeatures {
    let n_fft = 512.min(window.len().next_power_of_two().max(64));
    let hop = (n_fft / 4).max(1);

    let hann = hann_window(n_fft);
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n_fft);

    let mut centroids = Vec::new();
    let mut rolloffs = Vec::new();
    let mut rms_values = Vec::new();

    let n_bins = n_fft / 2 + 1;
    let freqs: Vec<f32> = (0..n_bins).map(|k| k as f32 * sample_rate as f32 / n_fft as f32).collect();

    let mut start = 0;
    loop {
        let mut buf = vec![Complex32::new(0.0, 0.0); n_fft];
        let mut frame = vec![0.0_f32; n_fft];
        for i in 0..n_fft {
            let sample = window.get(start + i).copied().unwrap_or(0.0);
            frame[i] = sample;
            buf[i] = Complex32::new(sample * hann[i], 0.0);
        }
        fft.process(&mut buf);

        let magnitudes: Vec<f32> = buf[..n_bins].iter().map(|c| c.norm()).collect();
        let total: f32 = magnitudes.iter().sum();
        let centroid = if total > 1e-9 {
            magnitudes.iter().zip(&freqs).map(|(&m, &f)| m * f).sum::<f32>() / total
        } else {
            0.0
        };
        centroids.push(centroid);

        let target = total * 0.85;
        let mut running = 0.0;
        let mut rolloff = freqs.last().copied().unwrap_or(0.0);
        for (&m, &f) in magnitudes.iter().zip(&freqs) {
            running += m;
            if running >= target {
                rolloff = f;
                break;
            }
        }
        rolloffs.push(rolloff);

        rms_values.push((frame.iter().map(|&v| v * v).sum::<f32>() / n_fft as f32).sqrt());

        if start + n_fft >= window.len() {
            break;
        }
        start += hop;
    }

    let mean = |v: &[f32]| if v.is_empty() { 0.0 } else { v.iter().sum::<f32>() / v.len() as f32 };

    SpectralFeatures {
        centroid: mean(&centroids),
        rolloff: mean(&rolloffs),
        zcr: zero_crossing_rate(window),
        rms: mean(&rms_values),
    }
}

fn zero_crossing_rate(window: &[f32]) -> f32 {
    if window.len() < 2 {
        return 0.0;
    }
    let crossings = window
        .windows(2)
        .filter(|pair| (pair[0] >= 0.0) != (pair[1] >= 0.0))
        .count();
    crossings as f32 / (window.len() - 1) as f32
}

/// The fixed, ordered decision table from spec §4.E.1. First match wins.
fn classify_by_rules(features: &SpectralFeatures) -> (Component, f32) {
    let SpectralFeatures { centroid: c, rolloff: r, zcr, rms } = *features;

    if c < 200.0 && rms > 0.05 {
        return ("kick".to_string(), 0.70);
    }
    if (150.0..2000.0).contains(&c) && zcr > 0.08 && rms > 0.03 {
        return ("snare".to_string(), 0.65);
    }
    if c >= 2500.0 && rms < 0.08 {
        return ("hihat_closed".to_string(), 0.60);
    }
    if c >= 2500.0 && (0.08..0.20).contains(&rms) {
        return ("hihat_open".to_string(), 0.60);
    }
    if c >= 1800.0 && rms > 0.1 && r > 4000.0 {
        return ("crash".to_string(), 0.55);
    }
    if c >= 1500.0 && rms > 0.05 && rms < 0.15 {
        return ("ride".to_string(), 0.50);
    }
    if (200.0..500.0).contains(&c) && rms > 0.04 {
        return ("tom_low".to_string(), 0.50);
    }
    if (500.0..800.0).contains(&c) && rms > 0.04 {
        return ("tom_mid".to_string(), 0.50);
    }
    if (800.0..1200.0).contains(&c) && rms > 0.04 {
        return ("tom_high".to_string(), 0.50);
    }
    if rms > 0.02 {
        return ("snare".to_string(), 0.40);
    }
    ("unknown".to_string(), 0.30)
}

/// Canonical taxonomy a fine-grained ML label collapses into by prefix
/// match (Glossary). Kept as a static table per spec §9's redesign note
/// against dynamic alias lookups.
const ML_TAXONOMY_PREFIXES: &[(&str, &str)] = &[
    ("kick", "kick"),
    ("snare_center", "snare"),
    ("snare_rimshot", "snare"),
    ("snare_cross_stick", "snare"),
    ("snare_off", "snare"),
    ("hihat_closed", "hihat_closed"),
    ("hihat_open", "hihat_open"),
    ("hihat_half", "hihat_open"),
    ("hihat_pedal", "hihat_pedal"),
    ("hihat_splash", "hihat_open"),
    ("tom_high", "tom_high"),
    ("tom_mid", "tom_mid"),
    ("tom_low", "tom_low"),
    ("ride_bow", "ride"),
    ("ride_bell", "ride"),
    ("ride_edge", "ride"),
    ("crash_1", "crash"),
    ("crash_2", "crash"),
    ("china", "china"),
    ("splash", "splash"),
    ("cowbell", "cowbell"),
    ("tambourine", "tambourine"),
    ("clap", "clap"),
    ("shaker", "shaker"),
];

/// Collapses a fine-grained (24-class) ML label to the canonical taxonomy.
#[must_use]
pub fn collapse_ml_label(label: &str) -> Component {
    ML_TAXONOMY_PREFIXES
        .iter()
        .find(|(prefix, _)| label.starts_with(prefix))
        .map(|(_, canonical)| (*canonical).to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_centroid_high_energy_classifies_as_kick() {
        let sr = 44_100u32;
        let n = sr as usize / 4;
        let samples: Vec<f32> = (0..n)
            .map(|i| 0.6 * (2.0 * std::f32::consts::PI * 80.0 * i as f32 / sr as f32).sin())
            .collect();
        let (label, confidence) = classify_onset_heuristic(&samples, sr, 0.1, 100.0);
        assert_eq!(label, "kick");
        assert!((confidence - 0.70).abs() < 1e-6);
    }

    #[test]
    fn tiny_window_is_unknown() {
        let samples = vec![0.0_f32; 3];
        let (label, confidence) = classify_onset_heuristic(&samples, 44_100, 0.0, 100.0);
        assert_eq!(label, "unknown");
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn bool_env_interpretation() {
        assert_eq!(interpret_bool("TRUE"), Some(true));
        assert_eq!(interpret_bool("0"), Some(false));
        assert_eq!(interpret_bool("maybe"), None);
    }

    #[test]
    fn ml_label_collapses_by_prefix() {
        assert_eq!(collapse_ml_label("crash_1"), "crash");
        assert_eq!(collapse_ml_label("snare_rimshot"), "snare");
        assert_eq!(collapse_ml_label("tom_high"), "tom_high");
        assert_eq!(collapse_ml_label("totally_unknown_label"), "unknown");
    }
}
