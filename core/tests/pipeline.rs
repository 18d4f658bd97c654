//! End-to-end scenarios spanning onset detection, refinement and beatmap
//! assembly, run against synthetic audio rather than fixture files so the
//! suite has no external test-data dependency.

use beatsight_core::assemble::{self, AssembleOptions, QuantizationGrid};
use beatsight_core::classify;
use beatsight_core::onset::{self, DetectorParams};
use beatsight_core::refine;
use beatsight_core::types::{ClassifiedHit, DetectedOnset, DetectionResult};

fn click_track(sample_rate: u32, bpm: f32, steps: usize, clicks_per_step: usize) -> Vec<f32> {
    let period = (60.0 / bpm / 4.0 * sample_rate as f32) as usize;
    let mut signal = vec![0.0_f32; period * steps + sample_rate as usize];
    for step in 0..steps {
        let start = step * period;
        for k in 0..clicks_per_step.min(signal.len() - start) {
            signal[start + k] = 1.0 - (k as f32 / clicks_per_step as f32);
        }
    }
    signal
}

fn onset_at(time: f64) -> DetectedOnset {
    DetectedOnset {
        time_seconds: time,
        confidence: 0.9,
        envelope_value: 0.5,
        threshold_value: 0.1,
        frame_index: 0,
        band_energies: vec![0.0; 4],
    }
}

fn classified_at(time: f64, component: &str) -> ClassifiedHit {
    ClassifiedHit {
        onset: onset_at(time),
        component: component.to_string(),
        class_confidence: 0.8,
        confidence: 0.85,
        fallback: false,
    }
}

fn empty_detection(sample_rate: u32, tempo_candidates: Vec<f32>) -> DetectionResult {
    DetectionResult {
        onsets: Vec::new(),
        envelope: Vec::new(),
        adaptive_threshold: Vec::new(),
        sample_rate,
        hop_length: 256,
        estimated_tempo: tempo_candidates.first().copied().unwrap_or(120.0),
        tempo_candidates,
    }
}

/// A tiny xorshift PRNG so scenario 6 gets spread-out, deterministic timings
/// without pulling in a random-number crate for one test.
struct Xorshift(u64);

impl Xorshift {
    fn next_f64(&mut self) -> f64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }
}

#[test]
fn scenario_1_synthetic_178_bpm_sixteenths() {
    let sample_rate = 22_050u32;
    let bpm = 178.0_f32;
    let signal = click_track(sample_rate, bpm, 32, 16);

    let params = DetectorParams { hop_length: 128, n_fft: 1024, ..DetectorParams::default() };
    let detection = onset::detect(&signal, sample_rate, &params);
    let refined = refine::refine(&signal, sample_rate, &detection.onsets, refine::DEFAULT_WINDOW_MS);

    assert!(refined.len() >= 30, "expected at least 30 onsets, got {}", refined.len());

    let min_ioi = 0.8 * (60.0 / bpm as f64 / 4.0);
    for pair in refined.windows(2) {
        assert!(pair[1].time_seconds - pair[0].time_seconds >= min_ioi - 1e-6);
    }

    let classified_hits: Vec<ClassifiedHit> = refined
        .iter()
        .map(|o| ClassifiedHit { onset: o.clone(), component: "kick".to_string(), class_confidence: 0.8, confidence: 0.85, fallback: false })
        .collect();

    let samples = vec![0.0_f32; signal.len()];
    let options = AssembleOptions { max_snap_error_ms: 12.0, ..AssembleOptions::default() };
    let (beatmap, debug) = assemble::assemble(
        &classified_hits,
        &detection,
        &samples,
        sample_rate,
        "click.wav",
        "sha256:deadbeef",
        (samples.len() as f64 * 1000.0 / f64::from(sample_rate)) as i64,
        None,
        None,
        None,
        None,
        None,
        None,
        None,
        None,
        "beatmap-1".to_string(),
        "2026-07-28T00:00:00.000Z".to_string(),
        "2026-07-28T00:00:00.000Z".to_string(),
        &options,
    )
    .expect("assembly should succeed");

    assert!((beatmap.timing.bpm - bpm).abs() <= 1.0, "selected bpm {} not within 1 of {bpm}", beatmap.timing.bpm);
    assert!(debug.quantization.coverage >= 0.95, "coverage {} below 0.95", debug.quantization.coverage);
}

#[test]
fn scenario_2_host_hint_overridden_by_detection() {
    let sample_rate = 44_100u32;
    let step = 60.0 / (90.0 * 4.0);
    let mut times = Vec::new();
    let mut t = 0.0;
    while t < 4.0 {
        times.push(t);
        t += step;
    }
    let classified_hits: Vec<ClassifiedHit> = times.iter().map(|&t| classified_at(t, "kick")).collect();

    let detection = empty_detection(sample_rate, vec![90.0]);
    let options = AssembleOptions { tempo_candidates_hint: vec![120.0], max_snap_error_ms: 12.0, ..AssembleOptions::default() };

    let (beatmap, _) = assemble::assemble(
        &classified_hits,
        &detection,
        &[],
        sample_rate,
        "hint.wav",
        "sha256:deadbeef",
        4_000,
        None,
        None,
        None,
        None,
        None,
        None,
        None,
        None,
        "beatmap-2".to_string(),
        "2026-07-28T00:00:00.000Z".to_string(),
        "2026-07-28T00:00:00.000Z".to_string(),
        &options,
    )
    .expect("assembly should succeed");

    assert!((beatmap.timing.bpm - 90.0).abs() < 1.0, "expected hint to be overridden, got bpm {}", beatmap.timing.bpm);
}

#[test]
fn scenario_3_host_hint_wins_on_equivocal_detection() {
    let sample_rate = 44_100u32;
    let step = 60.0 / (120.0 * 4.0);
    let mut times = Vec::new();
    let mut t = 0.0;
    while t < 4.0 {
        times.push(t);
        t += step;
    }
    let classified_hits: Vec<ClassifiedHit> = times.iter().map(|&t| classified_at(t, "kick")).collect();

    let detection = empty_detection(sample_rate, vec![240.0]);
    let options = AssembleOptions { tempo_candidates_hint: vec![120.0], max_snap_error_ms: 12.0, ..AssembleOptions::default() };

    let (beatmap, _) = assemble::assemble(
        &classified_hits,
        &detection,
        &[],
        sample_rate,
        "hint.wav",
        "sha256:deadbeef",
        4_000,
        None,
        None,
        None,
        None,
        None,
        None,
        None,
        None,
        "beatmap-3".to_string(),
        "2026-07-28T00:00:00.000Z".to_string(),
        "2026-07-28T00:00:00.000Z".to_string(),
        &options,
    )
    .expect("assembly should succeed");

    assert!((beatmap.timing.bpm - 120.0).abs() < 1.0, "expected hint to win on a tie, got bpm {}", beatmap.timing.bpm);
}

#[test]
fn scenario_4_fallback_pattern_on_silence_then_sweep() {
    let sample_rate = 8_000u32;
    let silence = vec![0.0_f32; sample_rate as usize * 2];
    let sweep: Vec<f32> = (0..sample_rate as usize * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let freq = 200.0 + 2000.0 * t;
            0.6 * (2.0 * std::f32::consts::PI * freq * t).sin()
        })
        .collect();
    let samples: Vec<f32> = silence.into_iter().chain(sweep).collect();

    let detection = empty_detection(sample_rate, vec![120.0]);
    let options = AssembleOptions::default();

    let (beatmap, debug) = assemble::assemble(
        &[],
        &detection,
        &samples,
        sample_rate,
        "sweep.wav",
        "sha256:deadbeef",
        (samples.len() as f64 * 1000.0 / f64::from(sample_rate)) as i64,
        None,
        None,
        None,
        None,
        None,
        None,
        None,
        None,
        "beatmap-4".to_string(),
        "2026-07-28T00:00:00.000Z".to_string(),
        "2026-07-28T00:00:00.000Z".to_string(),
        &options,
    )
    .expect("assembly should succeed");

    assert!(debug.used_fallback);
    assert!(!beatmap.hit_objects.is_empty());
    assert_eq!(beatmap.hit_objects[0].component, "crash");
    assert!(
        beatmap.hit_objects[0].time_ms >= 1_600,
        "fallback start should be near the silence/sweep boundary, got {}",
        beatmap.hit_objects[0].time_ms
    );
}

#[test]
fn scenario_5_forced_quantization_snaps_to_grid() {
    let sample_rate = 44_100u32;
    let times = vec![0.03, 0.48, 1.02, 1.49, 2.51];
    let classified_hits: Vec<ClassifiedHit> = times.iter().map(|&t| classified_at(t, "kick")).collect();
    let detection = empty_detection(sample_rate, vec![100.0]);

    let options = AssembleOptions {
        quantization_grid: QuantizationGrid::Quarter,
        forced_bpm: Some(120.0),
        force_quantization: true,
        max_snap_error_ms: 200.0,
        ..AssembleOptions::default()
    };

    let (beatmap, debug) = assemble::assemble(
        &classified_hits,
        &detection,
        &[],
        sample_rate,
        "forced.wav",
        "sha256:deadbeef",
        3_000,
        None,
        None,
        None,
        None,
        None,
        None,
        None,
        None,
        "beatmap-5".to_string(),
        "2026-07-28T00:00:00.000Z".to_string(),
        "2026-07-28T00:00:00.000Z".to_string(),
        &options,
    )
    .expect("assembly should succeed");

    let offset_ms = (debug.quantization.offset * 1000.0).round() as i64;
    for hit in &beatmap.hit_objects {
        let relative = hit.time_ms - offset_ms;
        assert!(relative % 500 == 0, "hit at {} ms is not a 500 ms multiple after offset {offset_ms}", hit.time_ms);
    }
}

#[test]
fn scenario_6_difficulty_is_bounded_for_dense_varied_input() {
    let sample_rate = 44_100u32;
    let components = [
        "kick", "snare", "hihat_closed", "hihat_open", "tom_high", "tom_mid", "tom_low", "ride", "crash", "china", "splash", "cowbell",
    ];
    let mut rng = Xorshift(0x9E3779B97F4A7C15);
    let mut times: Vec<f64> = (0..1000).map(|_| rng.next_f64() * 60.0).collect();
    times.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let classified_hits: Vec<ClassifiedHit> = times
        .iter()
        .enumerate()
        .map(|(i, &t)| classified_at(t, components[i % components.len()]))
        .collect();

    let detection = empty_detection(sample_rate, vec![120.0]);
    let options = AssembleOptions { max_snap_error_ms: 40.0, ..AssembleOptions::default() };

    let (beatmap, _) = assemble::assemble(
        &classified_hits,
        &detection,
        &[],
        sample_rate,
        "dense.wav",
        "sha256:deadbeef",
        60_000,
        None,
        None,
        None,
        None,
        None,
        None,
        None,
        None,
        "beatmap-6".to_string(),
        "2026-07-28T00:00:00.000Z".to_string(),
        "2026-07-28T00:00:00.000Z".to_string(),
        &options,
    )
    .expect("assembly should succeed");

    assert!(beatmap.metadata.difficulty >= 0.0 && beatmap.metadata.difficulty <= 10.0, "difficulty out of bounds: {}", beatmap.metadata.difficulty);
}

#[test]
fn invariant_hit_times_are_monotonic_and_lanes_in_range() {
    let sample_rate = 44_100u32;
    let times = vec![0.1, 0.2, 0.35, 0.5, 0.62];
    let classified_hits: Vec<ClassifiedHit> =
        times.iter().zip(["kick", "snare", "hihat_closed", "tom_high", "crash"]).map(|(&t, c)| classified_at(t, c)).collect();
    let detection = empty_detection(sample_rate, vec![120.0]);
    let options = AssembleOptions::default();

    let (beatmap, _) = assemble::assemble(
        &classified_hits,
        &detection,
        &[],
        sample_rate,
        "mono.wav",
        "sha256:deadbeef",
        1_000,
        None,
        None,
        None,
        None,
        None,
        None,
        None,
        None,
        "beatmap-7".to_string(),
        "2026-07-28T00:00:00.000Z".to_string(),
        "2026-07-28T00:00:00.000Z".to_string(),
        &options,
    )
    .expect("assembly should succeed");

    for pair in beatmap.hit_objects.windows(2) {
        assert!(pair[1].time_ms >= pair[0].time_ms);
    }
    for hit in &beatmap.hit_objects {
        assert!(hit.lane <= 6);
    }
    assert_eq!(beatmap.editor.snap_divisor, QuantizationGrid::Sixteenth.divisor() as u8);
}

#[test]
fn classifier_backend_resolution_respects_explicit_disable() {
    let (ml_enabled, _) = classify::resolve_backend(Some(false), None);
    assert!(!ml_enabled);
}

#[test]
fn refinement_idempotence_round_trip() {
    let sample_rate = 8_000u32;
    let mut samples = vec![0.0_f32; 4_000];
    samples[1_000] = 1.0;
    samples[2_500] = -1.0;
    let onsets = vec![onset_at(0.12), onset_at(0.31)];
    let once = refine::refine(&samples, sample_rate, &onsets, refine::DEFAULT_WINDOW_MS);
    let twice = refine::refine(&samples, sample_rate, &once, refine::DEFAULT_WINDOW_MS);
    for (a, b) in once.iter().zip(&twice) {
        assert!((a.time_seconds - b.time_seconds).abs() < 1e-9);
    }
}
