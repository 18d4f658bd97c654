//! Short-time Fourier transform and its inverse.
//!
//! Generalizes `mecomp-analysis::utils::stft`, which only ever needed the
//! magnitude spectrogram, into a complex-valued transform with a matching
//! overlap-add inverse: HPSS needs phase to resynthesize the percussive
//! component after masking.

use ndarray::Array2;
use rustfft::{num_complex::Complex32, FftPlanner};

use super::{hann_window, reflect_pad};

/// Complex-valued STFT of `signal`.
///
/// Rows are frequency bins (`n_fft / 2 + 1`), columns are frames. The signal
/// is reflect-padded by `n_fft / 2` on each side so frame `t` is centered at
/// sample `t * hop`, matching librosa's default `center=True` framing.
#[must_use]
pub fn stft(signal: &[f32], n_fft: usize, hop: usize) -> Array2<Complex32> {
    let padded = reflect_pad(signal, n_fft / 2);
    let window = hann_window(n_fft);
    let n_bins = n_fft / 2 + 1;
    let n_frames = if padded.len() >= n_fft {
        (padded.len() - n_fft) / hop + 1
    } else {
        0
    };

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n_fft);

    let mut out = Array2::<Complex32>::zeros((n_bins, n_frames));
    let mut buf = vec![Complex32::new(0.0, 0.0); n_fft];
    for frame in 0..n_frames {
        let start = frame * hop;
        for i in 0..n_fft {
            buf[i] = Complex32::new(padded[start + i] * window[i], 0.0);
        }
        fft.process(&mut buf);
        for bin in 0..n_bins {
            out[(bin, frame)] = buf[bin];
        }
    }
    out
}

/// Overlap-add inverse of [`stft`], normalized by the summed squared window.
///
/// `length` is the number of samples of the original (unpadded) signal to
/// return.
#[must_use]
pub fn istft(spectrogram: &Array2<Complex32>, n_fft: usize, hop: usize, length: usize) -> Vec<f32> {
    let (n_bins, n_frames) = spectrogram.dim();
    debug_assert_eq!(n_bins, n_fft / 2 + 1);
    let window = hann_window(n_fft);

    let mut planner = FftPlanner::<f32>::new();
    let ifft = planner.plan_fft_inverse(n_fft);

    let padded_len = (n_frames.max(1) - 1) * hop + n_fft;
    let mut accum = vec![0.0_f32; padded_len];
    let mut norm = vec![0.0_f32; padded_len];
    let mut full = vec![Complex32::new(0.0, 0.0); n_fft];

    for frame in 0..n_frames {
        for bin in 0..n_bins {
            full[bin] = spectrogram[(bin, frame)];
        }
        // Hermitian symmetry: negative frequencies are the conjugate mirror.
        for bin in (1..n_fft - n_bins + 1).rev() {
            full[n_fft - bin] = full[bin].conj();
        }
        ifft.process(&mut full);
        let start = frame * hop;
        for i in 0..n_fft {
            let sample = full[i].re / n_fft as f32 * window[i];
            accum[start + i] += sample;
            norm[start + i] += window[i] * window[i];
        }
    }

    let pad = n_fft / 2;
    (0..length)
        .map(|i| {
            let idx = i + pad;
            if idx < accum.len() && norm[idx] > 1e-8 {
                accum[idx] / norm[idx]
            } else {
                0.0
            }
        })
        .collect()
}

/// Power spectrogram (`|X|^2`) from a complex STFT.
#[must_use]
pub fn power_spectrogram(spectrogram: &Array2<Complex32>) -> Array2<f32> {
    spectrogram.mapv(|c| c.norm_sqr())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_reconstructs_sine() {
        let sr = 22050;
        let freq = 440.0_f32;
        let n = sr;
        let signal: Vec<f32> = (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sr as f32).sin())
            .collect();
        let spec = stft(&signal, 2048, 512);
        let recon = istft(&spec, 2048, 512, signal.len());
        // skip edge frames where overlap-add normalization is weakest
        let margin = 2048;
        let mut max_err = 0.0_f32;
        for i in margin..signal.len() - margin {
            max_err = max_err.max((signal[i] - recon[i]).abs());
        }
        assert!(max_err < 0.05, "round trip error too large: {max_err}");
    }

    #[test]
    fn power_spectrogram_is_nonnegative() {
        let signal: Vec<f32> = (0..4096).map(|i| (i as f32 * 0.01).sin()).collect();
        let spec = stft(&signal, 1024, 256);
        let power = power_spectrogram(&spec);
        assert!(power.iter().all(|&v| v >= 0.0));
    }
}
