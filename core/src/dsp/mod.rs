//! Shared DSP primitives used by the onset detector (spec §4.C).
//!
//! Built directly on `rustfft` + `ndarray`, the same pairing
//! `mecomp-analysis`'s `utils::stft` uses, rather than an FFI binding:
//! neither a mel spectrogram nor median-filter HPSS is exposed by `aubio`, so
//! they are implemented here against the documented formulas (HTK mel scale,
//! librosa-style soft-mask HPSS, median + MAD adaptive threshold).

pub mod hpss;
pub mod mel;
pub mod stft;
pub mod tempo;
pub mod threshold;

/// Reflects `pad` samples off each edge of `signal`, the same boundary
/// handling `mecomp-analysis::utils::reflect_pad` uses for its STFT.
#[must_use]
pub fn reflect_pad(signal: &[f32], pad: usize) -> Vec<f32> {
    debug_assert!(pad < signal.len(), "padding is too large for signal");
    let prefix = signal[1..=pad].iter().rev().copied();
    let suffix = signal[signal.len() - 1 - pad..signal.len() - 1]
        .iter()
        .rev()
        .copied();
    prefix.chain(signal.iter().copied()).chain(suffix).collect()
}

/// Periodic Hann window of length `n`.
#[must_use]
pub fn hann_window(n: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    (0..n)
        .map(|i| 0.5 - 0.5 * f32::cos(2.0 * PI * i as f32 / n as f32))
        .collect()
}

/// In-place median filter with "nearest" edge padding (clamps out-of-range
/// indices to the first/last element), matching
/// `scipy.ndimage.median_filter(..., mode="nearest")` as used by the
/// reference onset detector's adaptive threshold.
#[must_use]
pub fn median_filter_nearest(data: &[f32], window: usize) -> Vec<f32> {
    if data.is_empty() {
        return Vec::new();
    }
    let half = window / 2;
    let n = data.len() as isize;
    let mut scratch = Vec::with_capacity(window);
    (0..data.len())
        .map(|i| {
            scratch.clear();
            for offset in -(half as isize)..=(half as isize) {
                let idx = (i as isize + offset).clamp(0, n - 1) as usize;
                scratch.push(data[idx]);
            }
            scratch.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let mid = scratch.len() / 2;
            if scratch.len() % 2 == 0 {
                (scratch[mid - 1] + scratch[mid]) / 2.0
            } else {
                scratch[mid]
            }
        })
        .collect()
}
