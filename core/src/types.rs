//! Core value types shared across pipeline stages.
//!
//! Every type here is plain data: components take their input by shared
//! reference and hand back a newly owned value, so there is no shared mutable
//! state crossing a stage boundary (spec §3).

use serde::{Deserialize, Serialize};

/// A decoded, mono, peak-normalized sample buffer.
///
/// Produced once by the preprocessor and read-only from then on.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.samples.len() as f64 * 1000.0 / f64::from(self.sample_rate)).round() as i64
    }
}

/// A single candidate drum strike produced by the onset detector.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedOnset {
    pub time_seconds: f64,
    pub confidence: f32,
    pub envelope_value: f32,
    pub threshold_value: f32,
    pub frame_index: usize,
    pub band_energies: Vec<f32>,
}

/// Full onset-detection result, including the diagnostic arrays needed for
/// the debug payload (spec §4.C / §4.F.5).
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub onsets: Vec<DetectedOnset>,
    pub envelope: Vec<f32>,
    pub adaptive_threshold: Vec<f32>,
    pub sample_rate: u32,
    pub hop_length: usize,
    pub estimated_tempo: f32,
    pub tempo_candidates: Vec<f32>,
}

/// A canonical drum-component label.
///
/// The ML backend's fine-grained 24-class taxonomy collapses to this set by
/// prefix match (Glossary).
pub type Component = String;

/// A [`DetectedOnset`] augmented with a classifier verdict.
#[derive(Debug, Clone)]
pub struct ClassifiedHit {
    pub onset: DetectedOnset,
    pub component: Component,
    pub class_confidence: f32,
    /// Arithmetic mean of `onset.confidence` and `class_confidence`.
    pub confidence: f32,
    pub fallback: bool,
}

impl ClassifiedHit {
    #[must_use]
    pub fn time_seconds(&self) -> f64 {
        self.onset.time_seconds
    }
}

/// The serialized per-hit output form (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HitObject {
    #[serde(rename = "time")]
    pub time_ms: i64,
    pub component: String,
    pub velocity: f32,
    pub lane: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BeatmapMetadata {
    pub title: String,
    pub artist: String,
    pub creator: String,
    pub tags: Vec<String>,
    pub difficulty: f32,
    #[serde(rename = "previewTime")]
    pub preview_time: i64,
    #[serde(rename = "beatmapId")]
    pub beatmap_id: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "modifiedAt")]
    pub modified_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioBlock {
    pub filename: String,
    pub hash: String,
    pub duration: i64,
    #[serde(rename = "sampleRate")]
    pub sample_rate: u32,
    #[serde(rename = "drumStem", skip_serializing_if = "Option::is_none")]
    pub drum_stem: Option<String>,
    #[serde(rename = "drumStemHash", skip_serializing_if = "Option::is_none")]
    pub drum_stem_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingBlock {
    pub bpm: f32,
    pub offset: i64,
    #[serde(rename = "timeSignature")]
    pub time_signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrumKitBlock {
    pub components: Vec<String>,
    pub layout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiGenerationMetadata {
    #[serde(rename = "modelVersion")]
    pub model_version: String,
    pub confidence: f32,
    #[serde(rename = "processedAt")]
    pub processed_at: String,
    #[serde(rename = "metadataProvider", skip_serializing_if = "Option::is_none")]
    pub metadata_provider: Option<String>,
    #[serde(
        rename = "metadataConfidence",
        skip_serializing_if = "Option::is_none"
    )]
    pub metadata_confidence: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditorBlock {
    #[serde(rename = "snapDivisor")]
    pub snap_divisor: u8,
    #[serde(rename = "visualLanes")]
    pub visual_lanes: u8,
    #[serde(rename = "aiGenerationMetadata")]
    pub ai_generation_metadata: AiGenerationMetadata,
}

/// The authoritative output of the pipeline (spec §3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Beatmap {
    pub version: String,
    pub metadata: BeatmapMetadata,
    pub audio: AudioBlock,
    pub timing: TimingBlock,
    #[serde(rename = "drumKit")]
    pub drum_kit: DrumKitBlock,
    #[serde(rename = "hitObjects")]
    pub hit_objects: Vec<HitObject>,
    pub editor: EditorBlock,
}
