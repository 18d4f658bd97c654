//! Onset detector (spec §4.C).
//!
//! Orchestrates the DSP primitives in [`crate::dsp`] into the same pipeline
//! as the reference `detect_onsets`: percussive isolation, pre-emphasis,
//! mel spectral flux, adaptive thresholding, tempo candidate estimation and
//! peak picking with a minimum inter-onset interval.

use crate::dsp::hpss::{percussive_component, HpssParams};
use crate::dsp::mel::{mel_filterbank, mel_spectrogram, power_to_db};
use crate::dsp::stft::{power_spectrogram, stft};
use crate::dsp::tempo::{autocorrelation_tempo_candidates, expand_with_harmonics};
use crate::dsp::threshold::adaptive_threshold;
use crate::types::{DetectedOnset, DetectionResult};

pub struct DetectorParams {
    pub hop_length: usize,
    pub n_fft: usize,
    pub n_mels: usize,
    pub sensitivity: f32,
    pub threshold_window_seconds: f32,
    pub tempo_hint: Option<f32>,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            hop_length: 256,
            n_fft: 2048,
            n_mels: 80,
            sensitivity: 60.0,
            threshold_window_seconds: 0.35,
            tempo_hint: None,
        }
    }
}

/// First-order pre-emphasis high-pass filter, `y[n] = x[n] - coef * x[n-1]`.
fn preemphasis(signal: &[f32], coef: f32) -> Vec<f32> {
    if signal.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(signal.len());
    out.push(signal[0]);
    for i in 1..signal.len() {
        out.push(signal[i] - coef * signal[i - 1]);
    }
    out
}

/// Runs the full onset-detection algorithm from spec §4.C. Never fails; may
/// return an empty onset list.
#[must_use]
pub fn detect(samples: &[f32], sample_rate: u32, params: &DetectorParams) -> DetectionResult {
    let hpss_params = HpssParams {
        n_fft: params.n_fft,
        hop: params.hop_length,
        ..HpssParams::default()
    };
    let percussive = percussive_component(samples, &hpss_params);
    let pre_emphasised = preemphasis(&percussive, 0.97);

    let fmax = (sample_rate as f32 / 2.0 - 100.0).min(14_000.0);
    let spectrogram = stft(&pre_emphasised, params.n_fft, params.hop_length);
    let power = power_spectrogram(&spectrogram);
    let filterbank = mel_filterbank(sample_rate, params.n_fft, params.n_mels, 30.0, fmax);
    let mel = mel_spectrogram(&power, &filterbank);
    let log_mel = power_to_db(&mel);

    let n_frames = log_mel.ncols();
    let mut envelope = vec![0.0_f32; n_frames];
    for frame in 1..n_frames {
        let mut flux = 0.0_f32;
        for bin in 0..log_mel.nrows() {
            flux += (log_mel[(bin, frame)] - log_mel[(bin, frame - 1)]).max(0.0);
        }
        envelope[frame] = flux;
    }
    let peak = envelope.iter().cloned().fold(0.0_f32, f32::max);
    if peak > 0.0 {
        for v in &mut envelope {
            *v /= peak;
        }
    }

    let raw_candidates = autocorrelation_tempo_candidates(&envelope, sample_rate, params.hop_length);
    let tempo_candidates = expand_with_harmonics(&raw_candidates);
    let estimated_tempo = params.tempo_hint.unwrap_or(tempo_candidates[0]);

    let sens_clamped = params.sensitivity.clamp(0.0, 100.0) / 100.0;
    let threshold_k = 2.4 + (0.6 - 2.4) * sens_clamped;

    let window_frames = ((params.threshold_window_seconds * sample_rate as f32 / params.hop_length as f32).round() as usize).max(7);
    let threshold = adaptive_threshold(&envelope, window_frames, threshold_k);

    let base_sixteenth = (60.0 / estimated_tempo.max(1e-3) / 4.0).clamp(0.02, 0.12);
    let min_ioi = (base_sixteenth * (1.0 + (1.0 - sens_clamped) * 0.6)).min(base_sixteenth.max(0.084));
    let min_separation_frames = ((min_ioi * sample_rate as f32 / params.hop_length as f32).floor() as isize).max(1) as usize;

    let peak_window: isize = 2;
    let mut onsets = Vec::new();
    let mut last_onset_frame: isize = -10_000;

    for frame in 0..n_frames {
        let env_val = envelope[frame];
        let thr_val = threshold[frame];
        if env_val <= thr_val {
            continue;
        }

        let local_start = (frame as isize - peak_window).max(0) as usize;
        let local_end = ((frame as isize + peak_window + 1) as usize).min(n_frames);
        let local_max = envelope[local_start..local_end].iter().cloned().fold(f32::MIN, f32::max);
        if env_val < local_max - 1e-6 {
            continue;
        }

        if (frame as isize - last_onset_frame) < min_separation_frames as isize {
            continue;
        }

        let time_seconds = frame as f64 * params.hop_length as f64 / f64::from(sample_rate);
        let confidence = ((env_val - thr_val) / (1.0 - thr_val + 1e-6)).clamp(0.0, 1.0);
        let band_energies = if frame < mel.ncols() {
            mel.column(frame).to_vec()
        } else {
            vec![0.0; mel.nrows()]
        };

        onsets.push(DetectedOnset {
            time_seconds,
            confidence,
            envelope_value: env_val,
            threshold_value: thr_val,
            frame_index: frame,
            band_energies,
        });
        last_onset_frame = frame as isize;
    }

    DetectionResult {
        onsets,
        envelope,
        adaptive_threshold: threshold,
        sample_rate,
        hop_length: params.hop_length,
        estimated_tempo,
        tempo_candidates,
    }
}
