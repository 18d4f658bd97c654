//! Onset refiner (spec §4.D).
//!
//! Snaps each detected onset to the nearest local waveform peak, the same
//! `refine_onsets` behavior as the reference implementation, with
//! monotonicity enforced by clamping to `previous_time + min_spacing`.

use crate::types::DetectedOnset;

pub const DEFAULT_WINDOW_MS: f32 = 28.0;

/// Refines onset times in place (by value) without reordering them.
#[must_use]
pub fn refine(samples: &[f32], sample_rate: u32, onsets: &[DetectedOnset], window_ms: f32) -> Vec<DetectedOnset> {
    let window_samples = ((window_ms * sample_rate as f32 / 1000.0) as usize).max(1);

    let raw_times: Vec<f64> = onsets.iter().map(|o| o.time_seconds).collect();
    let min_spacing = if raw_times.len() > 1 {
        0.95 * raw_times
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .fold(f64::INFINITY, f64::min)
    } else {
        0.0
    };

    let mut refined = Vec::with_capacity(onsets.len());
    let mut last_time = f64::NEG_INFINITY;

    for onset in onsets {
        let center = (onset.time_seconds * f64::from(sample_rate)) as i64;
        let start = (center - (window_samples / 2) as i64).max(0) as usize;
        let end = ((center + (window_samples / 2) as i64) as usize).min(samples.len());

        if end <= start {
            refined.push(onset.clone());
            continue;
        }

        let window = &samples[start..end];
        let local_max_idx = window
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.abs().partial_cmp(&b.abs()).unwrap())
            .map(|(idx, _)| idx)
            .unwrap_or(0);

        let mut refined_time = (start + local_max_idx) as f64 / f64::from(sample_rate);

        if min_spacing > 0.0 && last_time.is_finite() {
            let min_allowed = last_time + min_spacing;
            let window_end_time = if end > 0 { (end - 1) as f64 / f64::from(sample_rate) } else { 0.0 };
            refined_time = refined_time.max(min_allowed).min(window_end_time);
        }

        let mut new_onset = onset.clone();
        new_onset.time_seconds = refined_time;
        refined.push(new_onset);
        last_time = refined_time;
    }

    refined
}

#[cfg(test)]
mod tests {
    use super::*;

    fn onset_at(time: f64) -> DetectedOnset {
        DetectedOnset {
            time_seconds: time,
            confidence: 0.9,
            envelope_value: 0.5,
            threshold_value: 0.1,
            frame_index: (time * 100.0) as usize,
            band_energies: vec![0.0; 4],
        }
    }

    #[test]
    fn refine_snaps_to_nearby_peak() {
        let sr = 1000u32;
        let mut samples = vec![0.0_f32; 1000];
        samples[500] = 1.0;
        let onsets = vec![onset_at(0.49)];
        let refined = refine(&samples, sr, &onsets, 28.0);
        assert!((refined[0].time_seconds - 0.5).abs() < 0.02);
    }

    #[test]
    fn refine_keeps_times_strictly_increasing() {
        let sr = 1000u32;
        let mut samples = vec![0.0_f32; 2000];
        samples[100] = 1.0;
        samples[110] = 1.0;
        let onsets = vec![onset_at(0.10), onset_at(0.105)];
        let refined = refine(&samples, sr, &onsets, 28.0);
        assert!(refined[1].time_seconds > refined[0].time_seconds);
    }

    #[test]
    fn refine_is_idempotent() {
        let sr = 1000u32;
        let mut samples = vec![0.0_f32; 2000];
        samples[100] = 1.0;
        samples[400] = -1.0;
        let onsets = vec![onset_at(0.095), onset_at(0.39)];
        let once = refine(&samples, sr, &onsets, 28.0);
        let twice = refine(&samples, sr, &once, 28.0);
        for (a, b) in once.iter().zip(&twice) {
            assert!((a.time_seconds - b.time_seconds).abs() < 1e-9);
        }
    }
}
