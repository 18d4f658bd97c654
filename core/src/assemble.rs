//! Beatmap assembler (spec §4.F) — the largest component.
//!
//! Grounded throughout in `beatmap_generator.py`: lane maps, tempo
//! quantization with hint-override scoring, fallback pattern synthesis,
//! difficulty scoring and final JSON assembly. Lane/alias lookups are
//! expressed as static tables built once (spec §9 redesign note against
//! dynamic string-keyed maps), and lane-switch telemetry is returned as an
//! explicit tuple rather than attached to the assignment function itself.

use std::collections::BTreeSet;

use crate::debug::{
    DebugPayload, DetectionDebug, LaneStats, OnsetDebug, QuantizationCandidateSummary, QuantizationDebug,
    SectionDensity,
};
use crate::errors::AssemblerError;
use crate::types::{
    AiGenerationMetadata, AudioBlock, Beatmap, BeatmapMetadata, ClassifiedHit, DetectionResult, DrumKitBlock,
    EditorBlock, HitObject, TimingBlock,
};

const LANE_DEFAULT: u8 = 4;

/// Canonical component -> lane, built once as a static table (spec §9).
const COMPONENT_LANE_MAP: &[(&str, u8)] = &[
    ("kick", 3),
    ("snare", 1),
    ("snare_center", 1),
    ("snare_rimshot", 1),
    ("snare_cross_stick", 1),
    ("snare_off", 1),
    ("rim", 1),
    ("rimshot", 1),
    ("sidestick", 1),
    ("clap", 1),
    ("ghost", 1),
    ("hihat", 5),
    ("hihat_closed", 5),
    ("hihat_open", 5),
    ("hihat_half", 5),
    ("hihat_choke", 5),
    ("hihat_splash", 5),
    ("hihat_pedal", 0),
    ("hihat_foot", 0),
    ("tom", 4),
    ("tom_high", 2),
    ("tom_mid", 4),
    ("tom_low", 4),
    ("tom_floor", 4),
    ("floor_tom", 4),
    ("ride", 6),
    ("ride_bow", 6),
    ("ride_bell", 6),
    ("ride_edge", 6),
    ("crash", 6),
    ("crash1", 6),
    ("crash_1", 6),
    ("crash2", 0),
    ("crash_2", 0),
    ("china", 6),
    ("splash", 6),
    ("stack", 6),
    ("cowbell", 0),
    ("tambourine", 0),
    ("shaker", 0),
    ("percussion", 0),
    ("perc", 0),
];

/// Component-name aliases normalized to a canonical label before lane
/// lookup (spec §9).
const COMPONENT_ALIASES: &[(&str, &str)] = &[
    ("hi-hat", "hihat_closed"),
    ("hi_hat", "hihat_closed"),
    ("closed_hat", "hihat_closed"),
    ("open_hat", "hihat_open"),
    ("ride_cymbal", "ride"),
    ("ridecymbal", "ride"),
    ("bass_drum", "kick"),
    ("bass", "kick"),
    ("floor_tom", "tom_low"),
    ("rack_tom", "tom_high"),
];

fn normalize(component: &str) -> String {
    component.trim().to_lowercase()
}

fn is_cymbal_component(component: &str) -> bool {
    let comp = normalize(component);
    ["crash", "ride", "china", "splash", "stack", "cym"].iter().any(|t| comp.contains(t))
}

fn is_tom_component(component: &str) -> bool {
    let comp = normalize(component);
    comp.contains("tom") || ["rack", "floor"].iter().any(|t| comp.contains(t))
}

fn resolve_lane(component: &str) -> u8 {
    let comp = normalize(component);
    if comp.is_empty() {
        return LANE_DEFAULT;
    }
    let comp = COMPONENT_ALIASES
        .iter()
        .find(|(alias, _)| *alias == comp)
        .map(|(_, canonical)| (*canonical).to_string())
        .unwrap_or(comp);

    if let Some((_, lane)) = COMPONENT_LANE_MAP.iter().find(|(name, _)| *name == comp) {
        return *lane;
    }

    if comp.contains("kick") || comp.contains("bass") {
        return lane_for("kick");
    }
    if ["snare", "rim", "clap", "ghost", "sidestick"].iter().any(|t| comp.contains(t)) {
        return lane_for("snare");
    }
    if comp.contains("pedal") && comp.contains("hat") {
        return lane_for("hihat_pedal");
    }
    if comp.contains("hat") || comp.starts_with("hh") {
        return lane_for("hihat_closed");
    }
    if comp.contains("tom") || comp.contains("rack") || comp.contains("floor") {
        if ["high", "upper", "rack", "small"].iter().any(|t| comp.contains(t)) {
            return lane_for("tom_high");
        }
        if ["mid", "middle"].iter().any(|t| comp.contains(t)) {
            return lane_for("tom_mid");
        }
        if ["low", "floor", "ft"].iter().any(|t| comp.contains(t)) {
            return lane_for("tom_low");
        }
        return lane_for("tom_mid");
    }
    if ["ride", "crash", "china", "splash", "cym", "bell", "stack"].iter().any(|t| comp.contains(t)) {
        if comp.contains("crash2") || comp.contains("left") {
            return lane_for("crash2");
        }
        return lane_for("crash");
    }
    if ["cowbell", "clave", "block", "tamb", "shaker", "perc", "agogo", "wood", "fx"].iter().any(|t| comp.contains(t)) {
        return lane_for("cowbell");
    }
    LANE_DEFAULT
}

fn lane_for(canonical: &str) -> u8 {
    COMPONENT_LANE_MAP
        .iter()
        .find(|(name, _)| *name == canonical)
        .map(|(_, lane)| *lane)
        .unwrap_or(LANE_DEFAULT)
}

#[derive(Debug, Clone)]
struct WorkingHit {
    time: f64,
    component: String,
    confidence: f32,
    fallback: bool,
    lane: u8,
    quantization_error: f64,
}

impl From<&ClassifiedHit> for WorkingHit {
    fn from(hit: &ClassifiedHit) -> Self {
        Self {
            time: hit.time_seconds(),
            component: hit.component.clone(),
            confidence: hit.confidence,
            fallback: hit.fallback,
            lane: LANE_DEFAULT,
            quantization_error: 0.0,
        }
    }
}

/// Assigns lanes in place and returns lane-switch telemetry as an explicit
/// value (spec §9 redesign note against function-attribute side channels).
fn assign_lanes(hits: &mut [WorkingHit]) -> LaneStats {
    let mut cymbal_last_time: Option<f64> = None;
    let mut cymbal_last_lane: Option<u8> = None;
    let mut tom_last_time: Option<f64> = None;
    let mut tom_last_lane: Option<u8> = None;
    let mut cymbal_switches = 0u32;
    let mut tom_switches = 0u32;

    const CYMBAL_WINDOW: f64 = 0.45;
    const TOM_WINDOW: f64 = 0.35;

    for hit in hits.iter_mut() {
        let mut lane = resolve_lane(&hit.component);

        if is_cymbal_component(&hit.component) {
            if let Some(last_time) = cymbal_last_time {
                if (hit.time - last_time).abs() <= CYMBAL_WINDOW {
                    lane = if cymbal_last_lane == Some(6) { 0 } else { 6 };
                } else if lane != 0 && lane != 6 {
                    lane = 6;
                }
            } else if lane != 0 && lane != 6 {
                lane = 6;
            }

            if let Some(last_lane) = cymbal_last_lane {
                if lane != last_lane {
                    cymbal_switches += 1;
                }
            }
            cymbal_last_time = Some(hit.time);
            cymbal_last_lane = Some(lane);
        } else if is_tom_component(&hit.component) {
            if let Some(last_time) = tom_last_time {
                if (hit.time - last_time).abs() <= TOM_WINDOW {
                    lane = if tom_last_lane == Some(4) { 2 } else { 4 };
                } else if lane != 2 && lane != 4 {
                    lane = 4;
                }
            } else if lane != 2 && lane != 4 {
                lane = 4;
            }

            if let Some(last_lane) = tom_last_lane {
                if lane != last_lane {
                    tom_switches += 1;
                }
            }
            tom_last_time = Some(hit.time);
            tom_last_lane = Some(lane);
        }

        hit.lane = lane;
    }

    LaneStats { cymbal_switches, tom_switches }
}

/// Difficulty scoring (spec §4.F.4).
fn calculate_difficulty(hits: &[WorkingHit]) -> f32 {
    if hits.is_empty() {
        return 0.0;
    }
    let duration = hits.last().unwrap().time - hits.first().unwrap().time;
    let density = if duration == 0.0 { 0.0 } else { hits.len() as f64 / duration };

    let unique_components: BTreeSet<&str> = hits.iter().map(|h| h.component.as_str()).collect();

    let speed_factor = if hits.len() > 1 {
        let mut diffs = Vec::with_capacity(hits.len() - 1);
        for pair in hits.windows(2) {
            diffs.push(pair[1].time - pair[0].time);
        }
        let avg = diffs.iter().sum::<f64>() / diffs.len() as f64;
        (1.0 - avg).max(0.0)
    } else {
        0.0
    };

    let difficulty = (density * 2.0).min(4.0) + (unique_components.len() as f64 * 0.5).min(3.0) + (speed_factor * 5.0).min(3.0);
    difficulty.min(10.0) as f32
}

/// Synthetic fallback pattern (spec §4.F.1), grounded in
/// `_generate_fallback_hits`.
fn generate_fallback_hits(duration_seconds: f64, bpm: f32, start_time: f64) -> Vec<WorkingHit> {
    let bpm = if bpm <= 0.0 { 120.0 } else { bpm };
    let steps_per_beat = 2usize;
    let interval = (60.0 / (f64::from(bpm) * steps_per_beat as f64)).max(0.12);

    let remaining = duration_seconds - start_time;
    let total_steps = (remaining / interval) as i64 + 2;
    let max_hits = total_steps.clamp(1, 2000) as usize;

    let mut hits = Vec::new();
    if start_time < duration_seconds {
        hits.push(WorkingHit {
            time: start_time,
            component: "crash".to_string(),
            confidence: 0.3,
            fallback: true,
            lane: LANE_DEFAULT,
            quantization_error: 0.0,
        });
    }

    let measure_steps = steps_per_beat * 4;
    for step in 0..max_hits {
        let time = start_time + step as f64 * interval;
        if time >= duration_seconds {
            break;
        }
        let position_in_measure = step % measure_steps;
        let component = if position_in_measure == 0 {
            "kick"
        } else if position_in_measure == steps_per_beat * 2 {
            "snare"
        } else if position_in_measure == steps_per_beat {
            "kick"
        } else {
            "hihat_closed"
        };
        hits.push(WorkingHit {
            time,
            component: component.to_string(),
            confidence: if component != "hihat_closed" { 0.4 } else { 0.3 },
            fallback: true,
            lane: LANE_DEFAULT,
            quantization_error: 0.0,
        });
    }

    hits
}

/// RMS energy per frame, used to locate the drum start for the fallback
/// pattern.
fn rms_per_frame(samples: &[f32], frame_length: usize, hop: usize) -> Vec<f32> {
    if samples.len() < frame_length {
        if samples.is_empty() {
            return Vec::new();
        }
        let rms = (samples.iter().map(|&v| v * v).sum::<f32>() / samples.len() as f32).sqrt();
        return vec![rms];
    }
    let mut out = Vec::new();
    let mut start = 0;
    while start + frame_length <= samples.len() {
        let frame = &samples[start..start + frame_length];
        out.push((frame.iter().map(|&v| v * v).sum::<f32>() / frame_length as f32).sqrt());
        start += hop;
    }
    out
}

fn percentile(values: &[f32], p: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let rank = (p / 100.0 * (sorted.len() - 1) as f32).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

/// Finds the drum start (spec §4.F.1): the first frame whose RMS energy
/// exceeds twice the 25th-percentile baseline.
fn detect_drum_start(samples: &[f32], sample_rate: u32) -> f64 {
    const FRAME_LENGTH: usize = 2048;
    const HOP: usize = 512;
    let rms = rms_per_frame(samples, FRAME_LENGTH, HOP);
    if rms.is_empty() {
        return 0.0;
    }
    let baseline = percentile(&rms, 25.0);
    for (i, &energy) in rms.iter().enumerate() {
        if energy > baseline * 2.0 {
            return i as f64 * HOP as f64 / f64::from(sample_rate);
        }
    }
    0.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantizationGrid {
    Quarter,
    Eighth,
    Triplet,
    Sixteenth,
    ThirtySecond,
}

impl QuantizationGrid {
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "quarter" => Self::Quarter,
            "eighth" => Self::Eighth,
            "triplet" => Self::Triplet,
            "thirtysecond" => Self::ThirtySecond,
            _ => Self::Sixteenth,
        }
    }

    /// Validating counterpart to [`Self::from_name`], used at the options
    /// boundary where an unrecognized grid name must surface as
    /// `InvalidOptions` rather than silently default (spec §7).
    #[must_use]
    pub fn try_from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "quarter" => Some(Self::Quarter),
            "eighth" => Some(Self::Eighth),
            "triplet" => Some(Self::Triplet),
            "sixteenth" => Some(Self::Sixteenth),
            "thirtysecond" => Some(Self::ThirtySecond),
            _ => None,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Quarter => "quarter",
            Self::Eighth => "eighth",
            Self::Triplet => "triplet",
            Self::Sixteenth => "sixteenth",
            Self::ThirtySecond => "thirtysecond",
        }
    }

    #[must_use]
    pub fn divisor(self) -> u32 {
        match self {
            Self::Quarter => 1,
            Self::Eighth => 2,
            Self::Triplet => 3,
            Self::Sixteenth => 4,
            Self::ThirtySecond => 8,
        }
    }
}

fn quantization_step(bpm: f64, grid: QuantizationGrid) -> f64 {
    let beat_duration = 60.0 / bpm.max(1e-6);
    beat_duration / f64::from(grid.divisor())
}

fn optimal_offset(times: &[f64], step: f64) -> f64 {
    if times.is_empty() {
        return 0.0;
    }
    let remainders: Vec<f64> = times.iter().map(|&t| t.rem_euclid(step)).collect();
    let mean = remainders.iter().sum::<f64>() / remainders.len() as f64;
    let variance = remainders.iter().map(|&r| (r - mean).powi(2)).sum::<f64>() / remainders.len() as f64;

    if variance < (step * 0.45).powi(2) {
        let mut sorted = remainders.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let mid = sorted.len() / 2;
        return if sorted.len() % 2 == 0 { (sorted[mid - 1] + sorted[mid]) / 2.0 } else { sorted[mid] };
    }

    const BINS: usize = 32;
    let bin_width = step / BINS as f64;
    let mut counts = vec![0usize; BINS];
    for &r in &remainders {
        let bin = ((r / bin_width) as usize).min(BINS - 1);
        counts[bin] += 1;
    }
    let best_bin = counts.iter().enumerate().max_by_key(|(_, &c)| c).map(|(i, _)| i).unwrap_or(0);
    best_bin as f64 * bin_width
}

fn measure_error(times: &[f64], snapped: &[f64], tolerance: f64) -> (f32, f64, f64) {
    if times.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let errors: Vec<f64> = snapped.iter().zip(times).map(|(&s, &t)| (s - t).abs()).collect();
    let within = errors.iter().filter(|&&e| e <= tolerance).count();
    let coverage = within as f32 / times.len() as f32;
    let mean_error = errors.iter().sum::<f64>() / errors.len() as f64;
    let mut sorted = errors.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = sorted.len() / 2;
    let median_error = if sorted.len() % 2 == 0 { (sorted[mid - 1] + sorted[mid]) / 2.0 } else { sorted[mid] };
    (coverage, mean_error, median_error)
}

struct QuantizationCandidate {
    bpm: f64,
    offset: f64,
    step: f64,
    snapped: Vec<f64>,
    coverage: f32,
    mean_error: f64,
    median_error: f64,
    source_index: usize,
    is_hint: bool,
    score: f32,
}

fn quantize_times(times: &[f64], bpm: f64, grid: QuantizationGrid, tolerance: f64) -> (f64, f64, Vec<f64>, f32, f64, f64) {
    let step = quantization_step(bpm, grid);
    if step <= 0.0 {
        return (0.0, step, times.to_vec(), 0.0, 0.0, 0.0);
    }
    let offset = optimal_offset(times, step);
    let snapped: Vec<f64> = times.iter().map(|&t| offset + ((t - offset) / step).round() * step).collect();
    let (coverage, mean_error, median_error) = measure_error(times, &snapped, tolerance);
    (offset, step, snapped, coverage, mean_error, median_error)
}

fn select_best_quantization(
    times: &[f64],
    tempo_candidates: &[f32],
    grid: QuantizationGrid,
    tolerance: f64,
    hint_count: usize,
) -> (QuantizationCandidate, Vec<QuantizationCandidateSummary>) {
    let mut evaluated = Vec::new();
    for (index, &tempo) in tempo_candidates.iter().enumerate() {
        if tempo <= 0.0 || !tempo.is_finite() {
            continue;
        }
        let (offset, step, snapped, coverage, mean_error, median_error) = quantize_times(times, f64::from(tempo), grid, tolerance);
        let is_hint = index < hint_count;
        let score = coverage + if is_hint { 0.02 } else { 0.0 };
        evaluated.push(QuantizationCandidate {
            bpm: f64::from(tempo),
            offset,
            step,
            snapped,
            coverage,
            mean_error,
            median_error,
            source_index: index,
            is_hint,
            score,
        });
    }

    if evaluated.is_empty() {
        let (offset, step, snapped, coverage, mean_error, median_error) = quantize_times(times, 120.0, grid, tolerance);
        evaluated.push(QuantizationCandidate {
            bpm: 120.0,
            offset,
            step,
            snapped,
            coverage,
            mean_error,
            median_error,
            source_index: 0,
            is_hint: false,
            score: coverage,
        });
    }

    evaluated.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap()
            .then(a.mean_error.partial_cmp(&b.mean_error).unwrap())
            .then(a.source_index.cmp(&b.source_index))
    });

    let mut best_index = 0usize;
    let mut detection_best_index: Option<usize> = None;
    for (i, candidate) in evaluated.iter().enumerate() {
        if candidate.is_hint {
            continue;
        }
        match detection_best_index {
            None => detection_best_index = Some(i),
            Some(current_best) => {
                let current = &evaluated[current_best];
                let better = (candidate.coverage, -candidate.mean_error, -(candidate.source_index as f64))
                    .partial_cmp(&(current.coverage, -current.mean_error, -(current.source_index as f64)))
                    == Some(std::cmp::Ordering::Greater);
                if better {
                    detection_best_index = Some(i);
                }
            }
        }
    }

    if evaluated[best_index].is_hint {
        if let Some(detection_idx) = detection_best_index {
            let coverage_gap = evaluated[detection_idx].coverage - evaluated[best_index].coverage;
            let mean_gap = evaluated[best_index].mean_error - evaluated[detection_idx].mean_error;

            let mut fallback_needed = coverage_gap > 0.06 || (evaluated[best_index].coverage < 0.45 && coverage_gap > 0.0);
            if !fallback_needed && coverage_gap > 0.03 && mean_gap > 0.0 {
                fallback_needed = true;
            }
            if fallback_needed {
                best_index = detection_idx;
            }
        }
    }

    let candidates_summary: Vec<QuantizationCandidateSummary> = evaluated
        .iter()
        .map(|c| QuantizationCandidateSummary {
            bpm: (c.bpm * 10_000.0).round() as f32 / 10_000.0,
            coverage: (c.coverage * 10_000.0).round() / 10_000.0,
            mean_error: (c.mean_error * 10_000.0).round() as f32 / 10_000.0,
            hint: c.is_hint,
            source_index: c.source_index,
        })
        .collect();

    let chosen = evaluated.swap_remove(best_index);
    (chosen, candidates_summary)
}

fn section_counts(times: &[f64], bpm: f64, beats_per_section: u32) -> Vec<SectionDensity> {
    if times.is_empty() {
        return Vec::new();
    }
    let beat_duration = 60.0 / bpm.max(1e-6);
    let section_length = beat_duration * f64::from(beats_per_section);

    let mut sections: std::collections::BTreeMap<i64, Vec<f64>> = std::collections::BTreeMap::new();
    for &t in times {
        let index = (t / section_length).floor() as i64;
        sections.entry(index).or_default().push(t);
    }

    sections
        .into_iter()
        .map(|(index, segment)| {
            let start = index as f64 * section_length;
            let end = start + section_length;
            let density = segment.len() as f64 / section_length;
            SectionDensity { section: index, start, end, count: segment.len(), density }
        })
        .collect()
}

pub struct AssembleOptions {
    pub quantization_grid: QuantizationGrid,
    pub max_snap_error_ms: f32,
    pub forced_bpm: Option<f32>,
    pub forced_offset_seconds: Option<f64>,
    pub forced_step_seconds: Option<f64>,
    pub force_quantization: bool,
    pub tempo_candidates_hint: Vec<f32>,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            quantization_grid: QuantizationGrid::Sixteenth,
            max_snap_error_ms: 12.0,
            forced_bpm: None,
            forced_offset_seconds: None,
            forced_step_seconds: None,
            force_quantization: false,
            tempo_candidates_hint: Vec::new(),
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub fn assemble(
    classified_hits: &[ClassifiedHit],
    detection: &DetectionResult,
    samples: &[f32],
    sample_rate: u32,
    audio_filename: &str,
    audio_hash: &str,
    duration_ms: i64,
    drum_stem: Option<(&str, &str)>,
    metadata_title: Option<&str>,
    metadata_artist: Option<&str>,
    metadata_tags: Option<Vec<String>>,
    metadata_source: Option<String>,
    metadata_description: Option<String>,
    metadata_provider: Option<String>,
    metadata_confidence: Option<f32>,
    beatmap_id: String,
    created_at: String,
    processed_at: String,
    options: &AssembleOptions,
) -> Result<(Beatmap, DebugPayload), AssemblerError> {
    let mut tempo_candidates = options.tempo_candidates_hint.clone();
    let hint_count = tempo_candidates.len();
    tempo_candidates.extend(detection.tempo_candidates.iter().copied());

    let mut used_fallback = false;
    let mut working: Vec<WorkingHit> = classified_hits.iter().map(WorkingHit::from).collect();

    if working.is_empty() {
        let drum_start = detect_drum_start(samples, sample_rate);
        working = generate_fallback_hits(samples.len() as f64 / f64::from(sample_rate), detection.estimated_tempo, drum_start);
        used_fallback = true;
    }

    let lane_stats = assign_lanes(&mut working);

    let times: Vec<f64> = working.iter().map(|h| h.time).collect();
    let tolerance = f64::from(options.max_snap_error_ms) / 1000.0;

    let (mut chosen, candidates_summary) =
        select_best_quantization(&times, &tempo_candidates, options.quantization_grid, tolerance, hint_count);

    let mut forced = false;

    if let Some(forced_bpm) = options.forced_bpm.filter(|&b| b > 0.0) {
        chosen.bpm = f64::from(forced_bpm);
        chosen.step = quantization_step(chosen.bpm, options.quantization_grid);
        chosen.offset = optimal_offset(&times, chosen.step);
        forced = true;
    }

    if let Some(forced_step) = options.forced_step_seconds.filter(|&s| s > 0.0) {
        chosen.step = forced_step;
        forced = true;
        if options.forced_offset_seconds.is_none() {
            chosen.offset = optimal_offset(&times, chosen.step);
        }
    }

    if let Some(forced_offset) = options.forced_offset_seconds.filter(|o| o.is_finite()) {
        chosen.offset = forced_offset;
        forced = true;
    }

    if chosen.step <= 0.0 {
        chosen.step = (60.0 / chosen.bpm.max(1e-6) / f64::from(options.quantization_grid.divisor())).max(1e-3);
    }

    if options.force_quantization {
        forced = true;
    }

    let (snapped, errors) = if forced {
        let snapped: Vec<f64> = times.iter().map(|&t| chosen.offset + ((t - chosen.offset) / chosen.step).round() * chosen.step).collect();
        let errors: Vec<f64> = snapped.iter().zip(&times).map(|(&s, &t)| s - t).collect();
        let (coverage, mean_error, median_error) = measure_error(&times, &snapped, tolerance);
        chosen.coverage = coverage;
        chosen.mean_error = mean_error;
        chosen.median_error = median_error;
        (snapped, errors)
    } else {
        let errors: Vec<f64> = chosen.snapped.iter().zip(&times).map(|(&s, &t)| s - t).collect();
        (chosen.snapped.clone(), errors)
    };

    for ((hit, &snapped_time), &error) in working.iter_mut().zip(&snapped).zip(&errors) {
        if error.abs() <= tolerance {
            hit.time = snapped_time;
        }
        hit.quantization_error = error;
    }

    let mut hit_objects: Vec<HitObject> = working
        .iter()
        .map(|h| HitObject {
            time_ms: (h.time * 1000.0).round() as i64,
            component: h.component.clone(),
            velocity: 0.8,
            lane: h.lane,
        })
        .collect();
    hit_objects.sort_by_key(|h| h.time_ms);

    let difficulty = calculate_difficulty(&working);
    let drum_components: Vec<String> = {
        let set: BTreeSet<&str> = classified_hits.iter().map(|h| h.component.as_str()).collect();
        if set.is_empty() {
            working.iter().map(|h| h.component.as_str()).collect::<BTreeSet<_>>().into_iter().map(String::from).collect()
        } else {
            set.into_iter().map(String::from).collect()
        }
    };

    let tags = metadata_tags.unwrap_or_else(|| vec!["ai-generated".to_string()]);
    let title = metadata_title.map(str::to_string).unwrap_or_else(|| {
        std::path::Path::new(audio_filename)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| audio_filename.to_string())
    });

    let mean_confidence = if classified_hits.is_empty() {
        0.0
    } else {
        classified_hits.iter().map(|h| h.confidence).sum::<f32>() / classified_hits.len() as f32
    };

    let (drum_stem_name, drum_stem_hash) = match drum_stem {
        Some((name, hash)) => (Some(name.to_string()), Some(hash.to_string())),
        None => (None, None),
    };

    let beatmap = Beatmap {
        version: "1.0.0".to_string(),
        metadata: BeatmapMetadata {
            title,
            artist: metadata_artist.map(str::to_string).unwrap_or_else(|| "Unknown Artist".to_string()),
            creator: "BeatSight AI".to_string(),
            tags,
            difficulty: (difficulty * 100.0).round() / 100.0,
            preview_time: 10_000,
            beatmap_id,
            created_at: created_at.clone(),
            modified_at: created_at,
            source: metadata_source,
            description: metadata_description,
        },
        audio: AudioBlock {
            filename: audio_filename.to_string(),
            hash: audio_hash.to_string(),
            duration: duration_ms,
            sample_rate,
            drum_stem: drum_stem_name,
            drum_stem_hash: drum_stem_hash,
        },
        timing: TimingBlock {
            bpm: (chosen.bpm as f32 * 100.0).round() / 100.0,
            offset: (chosen.offset * 1000.0).round() as i64,
            time_signature: "4/4".to_string(),
        },
        drum_kit: DrumKitBlock { components: drum_components, layout: "standard_5piece".to_string() },
        hit_objects: hit_objects.clone(),
        editor: EditorBlock {
            snap_divisor: options.quantization_grid.divisor() as u8,
            visual_lanes: 7,
            ai_generation_metadata: AiGenerationMetadata {
                model_version: "1.0.0".to_string(),
                confidence: (mean_confidence * 1000.0).round() / 1000.0,
                processed_at,
                metadata_provider,
                metadata_confidence,
            },
        },
    };

    let snapped_for_sections: Vec<f64> = snapped;
    let debug_payload = DebugPayload {
        used_fallback,
        quantization: QuantizationDebug {
            grid: options.quantization_grid.name().to_string(),
            max_error_ms: options.max_snap_error_ms,
            coverage: chosen.coverage,
            mean_error_ms: (chosen.mean_error * 1000.0) as f32,
            median_error_ms: (chosen.median_error * 1000.0) as f32,
            offset: chosen.offset,
            step: chosen.step,
            candidates: candidates_summary,
            forced,
            forced_bpm: options.forced_bpm,
            forced_offset: options.forced_offset_seconds,
            forced_step: options.forced_step_seconds,
            force_quantization: options.force_quantization,
        },
        lane_stats,
        sections: section_counts(&snapped_for_sections, chosen.bpm, 16),
        detection: Some(DetectionDebug {
            sample_rate: detection.sample_rate,
            hop_length: detection.hop_length,
            tempo: detection.estimated_tempo,
            tempo_candidates: detection.tempo_candidates.clone(),
            envelope: detection.envelope.clone(),
            adaptive_threshold: detection.adaptive_threshold.clone(),
            peaks: detection
                .onsets
                .iter()
                .map(|o| OnsetDebug {
                    time: o.time_seconds,
                    confidence: o.confidence,
                    envelope: o.envelope_value,
                    threshold: o.threshold_value,
                    frame: o.frame_index,
                    band_energy: o.band_energies.clone(),
                })
                .collect(),
        }),
    };

    Ok((beatmap, debug_payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_lane_matches_documented_table() {
        assert_eq!(resolve_lane("kick"), 3);
        assert_eq!(resolve_lane("snare"), 1);
        assert_eq!(resolve_lane("hihat_pedal"), 0);
        assert_eq!(resolve_lane("tom_high"), 2);
        assert_eq!(resolve_lane("crash"), 6);
        assert_eq!(resolve_lane(""), LANE_DEFAULT);
    }

    #[test]
    fn cymbal_alternation_toggles_within_window() {
        let mut hits = vec![
            WorkingHit { time: 0.0, component: "crash".into(), confidence: 0.9, fallback: false, lane: 0, quantization_error: 0.0 },
            WorkingHit { time: 0.1, component: "ride".into(), confidence: 0.9, fallback: false, lane: 0, quantization_error: 0.0 },
        ];
        let stats = assign_lanes(&mut hits);
        assert_ne!(hits[0].lane, hits[1].lane);
        assert_eq!(stats.cymbal_switches, 1);
    }

    #[test]
    fn fallback_pattern_starts_with_crash() {
        let hits = generate_fallback_hits(4.0, 120.0, 1.0);
        assert_eq!(hits[0].component, "crash");
        assert!(hits[0].fallback);
        assert!(hits.len() > 1);
    }

    #[test]
    fn difficulty_is_bounded_and_zero_for_single_hit() {
        let hits = vec![WorkingHit { time: 0.0, component: "kick".into(), confidence: 0.9, fallback: false, lane: 3, quantization_error: 0.0 }];
        assert_eq!(calculate_difficulty(&hits), 0.0);
    }

    #[test]
    fn quantization_step_matches_formula() {
        let step = quantization_step(120.0, QuantizationGrid::Sixteenth);
        assert!((step - 60.0 / 120.0 / 4.0).abs() < 1e-9);
    }

    #[test]
    fn optimal_offset_is_within_step_bounds() {
        let times = vec![0.01, 0.51, 1.01, 1.51];
        let offset = optimal_offset(&times, 0.5);
        assert!((0.0..0.5).contains(&offset));
    }
}
