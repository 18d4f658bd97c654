//! ONNX-backed drum classifier (SPEC_FULL.md supplement to spec §4.E).
//!
//! The reference `MLDrumClassifier` runs a PyTorch CNN over a 128x128
//! log-mel spectrogram per onset. Training and exporting that network is out
//! of scope here; this module loads an already-exported ONNX graph and runs
//! inference the same way `AudioEmbeddingModel::embed` in `mecomp-analysis`
//! drives `ort`, swapping the embedding head for a 24-class softmax.

use std::path::{Path, PathBuf};

use ndarray::Array2;
use ort::execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;

use crate::classify::collapse_ml_label;
use crate::dsp::mel::{mel_filterbank, mel_spectrogram, power_to_db};
use crate::dsp::stft::{power_spectrogram, stft};
use crate::types::{ClassifiedHit, DetectedOnset};

pub const GRID_SIZE: usize = 128;
const MEL_FMAX: f32 = 8000.0;
const ANALYSIS_WINDOW_MS: f32 = 100.0;

/// Fine-grained 24-class taxonomy the model was trained on (Glossary); each
/// label collapses to the canonical taxonomy via
/// [`crate::classify::collapse_ml_label`].
pub const FINE_TAXONOMY: &[&str] = &[
    "kick",
    "snare_center",
    "snare_rimshot",
    "snare_cross_stick",
    "snare_off",
    "hihat_closed",
    "hihat_open",
    "hihat_half",
    "hihat_pedal",
    "hihat_splash",
    "tom_high",
    "tom_mid",
    "tom_low",
    "ride_bow",
    "ride_bell",
    "ride_edge",
    "crash_1",
    "crash_2",
    "china",
    "splash",
    "cowbell",
    "tambourine",
    "clap",
    "shaker",
];

/// A loaded ONNX drum classifier.
pub struct MlClassifier {
    session: Session,
    model_path: PathBuf,
}

impl MlClassifier {
    /// Loads a classifier from an ONNX file on disk.
    ///
    /// # Errors
    /// Fails if the file cannot be read or the graph fails to build.
    pub fn load(path: &Path) -> ort::Result<Self> {
        let cpu = CPUExecutionProvider::default().with_arena_allocator(true).build();
        let exec_providers: &[ExecutionProviderDispatch] = &[cpu];
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_execution_providers(exec_providers)?
            .commit_from_file(path)?;

        Ok(Self { session, model_path: path.to_path_buf() })
    }

    #[must_use]
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Classifies every onset, dropping hits whose combined confidence falls
    /// below `confidence_threshold`, mirroring
    /// [`crate::classify::classify_heuristic`]'s filter.
    ///
    /// # Errors
    /// Returns the inference failure reason as a display string the first
    /// time a forward pass fails; the caller is expected to fall back to the
    /// heuristic backend rather than retry.
    pub fn classify(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
        onsets: &[DetectedOnset],
        confidence_threshold: f32,
    ) -> Result<Vec<ClassifiedHit>, String> {
        let mut hits = Vec::with_capacity(onsets.len());

        for onset in onsets {
            let grid = onset_log_mel_grid(samples, sample_rate, onset.time_seconds, ANALYSIS_WINDOW_MS);
            let (label, class_confidence) = self.infer(&grid).map_err(|e| e.to_string())?;

            let combined = (onset.confidence + class_confidence) / 2.0;
            if combined < confidence_threshold {
                continue;
            }

            let component = collapse_ml_label(label);
            if component == "unknown" {
                continue;
            }

            hits.push(ClassifiedHit {
                onset: onset.clone(),
                component,
                class_confidence,
                confidence: combined,
                fallback: false,
            });
        }

        Ok(hits)
    }

    fn infer(&mut self, grid: &Array2<f32>) -> ort::Result<(&'static str, f32)> {
        let flat: Vec<f32> = grid.iter().copied().collect();
        let inputs = ort::inputs! {
            "input" => TensorRef::from_array_view(([1_i64, 1, GRID_SIZE as i64, GRID_SIZE as i64], &*flat))?,
        };
        let outputs = self.session.run(inputs)?;
        let (_, logits) = outputs["logits"].try_extract_tensor::<f32>()?;

        let probs = softmax(logits);
        let (index, &confidence) = probs
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap())
            .ok_or_else(|| ort::Error::new("model produced no output classes"))?;

        let label = FINE_TAXONOMY.get(index).copied().unwrap_or("unknown");
        Ok((label, confidence))
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum <= 0.0 {
        return vec![0.0; logits.len()];
    }
    exps.into_iter().map(|v| v / sum).collect()
}

/// Builds the `GRID_SIZE x GRID_SIZE` min-max normalized log-mel grid fed to
/// the model: a short STFT over the onset window, projected through a mel
/// filterbank, then reshaped to a fixed-size grid by nearest-neighbor
/// resampling along both axes (matching the reference's `np.resize` reshape
/// rather than an interpolating resize).
fn onset_log_mel_grid(samples: &[f32], sample_rate: u32, onset_time: f64, window_ms: f32) -> Array2<f32> {
    let window_samples = (window_ms * sample_rate as f32 / 1000.0) as usize;
    let center = (onset_time * f64::from(sample_rate)) as i64;
    let start = (center - (window_samples / 4) as i64).max(0) as usize;
    let end = ((center + window_samples as i64) as usize).min(samples.len());

    if end <= start || end - start < 10 {
        return Array2::zeros((GRID_SIZE, GRID_SIZE));
    }

    let window = &samples[start..end];
    let hop = (window.len() / GRID_SIZE).max(1) + 1;
    let n_fft = (hop * 4).next_power_of_two().clamp(256, 2048);

    let spectrogram = stft(window, n_fft, hop);
    let power = power_spectrogram(&spectrogram);
    let filterbank = mel_filterbank(sample_rate, n_fft, GRID_SIZE, 0.0, MEL_FMAX.min(sample_rate as f32 / 2.0 - 1.0));
    let mel = mel_spectrogram(&power, &filterbank);
    let log_mel = power_to_db(&mel);

    min_max_normalize(&nearest_neighbor_reshape(&log_mel, GRID_SIZE, GRID_SIZE))
}

/// Nearest-neighbor reshape to `(rows, cols)`, the same index-wrapping
/// behavior as `numpy.resize` on a 2D array (row-major flat index modulo the
/// source length), not an interpolating image resize.
fn nearest_neighbor_reshape(source: &Array2<f32>, rows: usize, cols: usize) -> Array2<f32> {
    let (src_rows, src_cols) = source.dim();
    let total_src = (src_rows * src_cols).max(1);
    let mut out = Array2::<f32>::zeros((rows, cols));
    let mut flat_index = 0usize;
    for r in 0..rows {
        for c in 0..cols {
            let src_flat = flat_index % total_src;
            let src_r = src_flat / src_cols.max(1);
            let src_c = src_flat % src_cols.max(1);
            out[(r, c)] = source.get((src_r, src_c)).copied().unwrap_or(0.0);
            flat_index += 1;
        }
    }
    out
}

fn min_max_normalize(grid: &Array2<f32>) -> Array2<f32> {
    let min = grid.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = grid.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let range = (max - min).max(1e-8);
    grid.mapv(|v| (v - min) / range)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn softmax_picks_largest_logit() {
        let probs = softmax(&[0.0, 5.0, 1.0]);
        let max_index = probs.iter().enumerate().max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap()).unwrap().0;
        assert_eq!(max_index, 1);
    }

    #[test]
    fn reshape_fills_every_cell() {
        let source = Array2::from_shape_fn((4, 4), |(r, c)| (r * 4 + c) as f32);
        let reshaped = nearest_neighbor_reshape(&source, 8, 8);
        assert_eq!(reshaped.dim(), (8, 8));
    }

    #[test]
    fn min_max_normalize_bounds_output() {
        let grid = Array2::from_shape_vec((2, 2), vec![-10.0_f32, 0.0, 5.0, 20.0]).unwrap();
        let normalized = min_max_normalize(&grid);
        assert!(normalized.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn tiny_window_yields_zero_grid() {
        let samples = vec![0.0_f32; 5];
        let grid = onset_log_mel_grid(&samples, 44_100, 0.0, 100.0);
        assert_eq!(grid.dim(), (GRID_SIZE, GRID_SIZE));
        assert!(grid.iter().all(|&v| v == 0.0));
    }
}
