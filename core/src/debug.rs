//! Diagnostic payload types (spec §3 `DebugPayload`, §4.F.5).
//!
//! Never authoritative for gameplay; consumed by offline analysis tools.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantizationCandidateSummary {
    pub bpm: f32,
    pub coverage: f32,
    pub mean_error: f32,
    pub hint: bool,
    pub source_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantizationDebug {
    pub grid: String,
    pub max_error_ms: f32,
    pub coverage: f32,
    pub mean_error_ms: f32,
    pub median_error_ms: f32,
    pub offset: f64,
    pub step: f64,
    pub candidates: Vec<QuantizationCandidateSummary>,
    pub forced: bool,
    pub forced_bpm: Option<f32>,
    pub forced_offset: Option<f64>,
    pub forced_step: Option<f64>,
    pub force_quantization: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LaneStats {
    pub cymbal_switches: u32,
    pub tom_switches: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionDensity {
    pub section: i64,
    pub start: f64,
    pub end: f64,
    pub count: usize,
    pub density: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnsetDebug {
    pub time: f64,
    pub confidence: f32,
    pub envelope: f32,
    pub threshold: f32,
    pub frame: usize,
    pub band_energy: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionDebug {
    pub sample_rate: u32,
    pub hop_length: usize,
    pub tempo: f32,
    pub tempo_candidates: Vec<f32>,
    pub envelope: Vec<f32>,
    pub adaptive_threshold: Vec<f32>,
    pub peaks: Vec<OnsetDebug>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugPayload {
    pub used_fallback: bool,
    pub quantization: QuantizationDebug,
    pub lane_stats: LaneStats,
    pub sections: Vec<SectionDensity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection: Option<DetectionDebug>,
}
