//! HTK-scale mel filterbank and power-to-dB conversion.
//!
//! Grounded in `_mel_spectral_flux` from the reference onset detector, which
//! builds its mel basis with `librosa.filters.mel(..., htk=True)`. That
//! basis is a fixed triangular filterbank over the HTK mel scale; there is
//! no FFI binding for it in this workspace's dependency stack, so it is
//! reimplemented here directly against the documented formula.

use ndarray::Array2;

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Builds an `n_mels x (n_fft / 2 + 1)` triangular filterbank spanning
/// `[fmin, fmax]` Hz on the HTK mel scale.
#[must_use]
pub fn mel_filterbank(sample_rate: u32, n_fft: usize, n_mels: usize, fmin: f32, fmax: f32) -> Array2<f32> {
    let n_bins = n_fft / 2 + 1;
    let fft_freqs: Vec<f32> = (0..n_bins)
        .map(|i| i as f32 * sample_rate as f32 / n_fft as f32)
        .collect();

    let mel_min = hz_to_mel(fmin);
    let mel_max = hz_to_mel(fmax);
    let mel_points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32)
        .collect();
    let hz_points: Vec<f32> = mel_points.iter().map(|&m| mel_to_hz(m)).collect();

    let mut filters = Array2::<f32>::zeros((n_mels, n_bins));
    for m in 0..n_mels {
        let (left, center, right) = (hz_points[m], hz_points[m + 1], hz_points[m + 2]);
        // Slaney-style area normalization, matching librosa's default `norm="slaney"`.
        let enorm = 2.0 / (right - left).max(1e-12);
        for (k, &f) in fft_freqs.iter().enumerate() {
            let weight = if f >= left && f <= center {
                (f - left) / (center - left).max(1e-12)
            } else if f > center && f <= right {
                (right - f) / (right - center).max(1e-12)
            } else {
                0.0
            };
            filters[(m, k)] = weight.max(0.0) * enorm;
        }
    }
    filters
}

/// Projects a power spectrogram onto a mel filterbank.
#[must_use]
pub fn mel_spectrogram(power_spec: &Array2<f32>, filterbank: &Array2<f32>) -> Array2<f32> {
    filterbank.dot(power_spec)
}

/// Power-to-dB conversion matching `librosa.power_to_db`'s defaults
/// (`amin=1e-10`, `top_db=80`, reference = the array's own maximum).
#[must_use]
pub fn power_to_db(power: &Array2<f32>) -> Array2<f32> {
    const AMIN: f32 = 1e-10;
    const TOP_DB: f32 = 80.0;
    let ref_value = power.iter().cloned().fold(AMIN, f32::max);
    let ref_db = 10.0 * ref_value.max(AMIN).log10();
    let mut db = power.mapv(|v| 10.0 * v.max(AMIN).log10() - ref_db);
    let floor = db.iter().cloned().fold(f32::NEG_INFINITY, f32::max) - TOP_DB;
    db.mapv_inplace(|v| v.max(floor));
    db
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filterbank_has_expected_shape() {
        let fb = mel_filterbank(44100, 2048, 40, 30.0, 14000.0);
        assert_eq!(fb.dim(), (40, 1025));
    }

    #[test]
    fn filterbank_weights_are_nonnegative() {
        let fb = mel_filterbank(44100, 2048, 40, 30.0, 14000.0);
        assert!(fb.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn power_to_db_caps_dynamic_range() {
        let power = Array2::from_shape_vec((1, 3), vec![1.0_f32, 1e-12, 0.5]).unwrap();
        let db = power_to_db(&power);
        assert!(db[(0, 0)] >= db[(0, 1)]);
        assert!(db[(0, 0)] - db.iter().cloned().fold(f32::INFINITY, f32::min) <= 80.0 + 1e-3);
    }
}
