//! Adaptive (median + scaled MAD) thresholding of an onset envelope.
//!
//! Grounds `_adaptive_threshold` from the reference onset detector: a
//! rolling median tracks the local baseline, a rolling median absolute
//! deviation (scaled by the standard 1.4826 consistency constant) tracks
//! local variability, and the threshold is their sum scaled by a
//! sensitivity factor.

use super::median_filter_nearest;

/// Computes `threshold[i] = median[i] + k * (1.4826 * mad[i] + eps)` for a
/// rolling window of `window` samples (rounded up to the next odd value, and
/// clamped to at least 7, matching the reference implementation's minimum).
#[must_use]
pub fn adaptive_threshold(envelope: &[f32], window: usize, k: f32) -> Vec<f32> {
    let window = odd_at_least(window, 7);
    let median = median_filter_nearest(envelope, window);
    let abs_dev: Vec<f32> = envelope
        .iter()
        .zip(&median)
        .map(|(&v, &m)| (v - m).abs())
        .collect();
    let mad = median_filter_nearest(&abs_dev, window);
    median
        .iter()
        .zip(&mad)
        .map(|(&m, &d)| m + k * (1.4826 * d + 1e-6))
        .collect()
}

fn odd_at_least(window: usize, floor: usize) -> usize {
    let w = window.max(floor);
    if w % 2 == 0 {
        w + 1
    } else {
        w
    }
}
