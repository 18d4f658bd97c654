//! Preprocessor (spec §4.A): decode, mono-mix, resample, normalize and hash
//! the input audio file.
//!
//! Follows the shape of `mecomp-analysis`'s `MecompDecoder::decode` (rodio
//! for container/codec decoding, rubato's `FastFixedIn` for resampling),
//! but mixes to mono by plain channel averaging rather than the teacher's
//! constant-power `* SQRT_2 / 2` stereo mix, since the spec calls for a
//! straightforward average regardless of channel count.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use rodio::Source;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::errors::PreprocessError;
use crate::types::AudioBuffer;

pub const DEFAULT_TARGET_SAMPLE_RATE: u32 = 44_100;

/// Decodes `path`, mixes to mono, resamples to `target_sample_rate`, and
/// peak-normalizes the result.
pub fn preprocess(path: &Path, target_sample_rate: u32) -> Result<AudioBuffer, PreprocessError> {
    let file = BufReader::new(File::open(path)?);
    let source = rodio::Decoder::new(file)?.convert_samples::<f32>();

    let num_channels = source.channels().max(1) as usize;
    let sample_rate = source.sample_rate();
    let samples: Vec<f32> = source.collect();

    let mono: Vec<f32> = if num_channels <= 1 {
        samples
    } else {
        samples
            .chunks_exact(num_channels)
            .map(|chunk| chunk.iter().sum::<f32>() / num_channels as f32)
            .collect()
    };

    let resampled = if sample_rate == target_sample_rate || mono.is_empty() {
        mono
    } else {
        let mut resampler = FastFixedIn::new(
            f64::from(target_sample_rate) / f64::from(sample_rate),
            1.0,
            PolynomialDegree::Cubic,
            mono.len(),
            1,
        )?;
        resampler.process(&[&mono], None)?[0].clone()
    };

    if resampled.is_empty() {
        return Err(PreprocessError::EmptyAudio);
    }

    let peak = resampled.iter().fold(0.0_f32, |acc, &v| acc.max(v.abs()));
    let normalized = if peak > 1e-8 {
        resampled.into_iter().map(|v| v / peak).collect()
    } else {
        resampled
    };

    Ok(AudioBuffer {
        samples: normalized,
        sample_rate: target_sample_rate,
    })
}

/// SHA-256 of the raw file bytes (not the decoded samples), matching the
/// beatmap's `audio.hash` field (spec §4.A / §6).
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(sha256::digest(bytes.as_slice()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_normalize_scales_to_unit_peak() {
        let samples = vec![0.0_f32, 2.0, -4.0, 1.0];
        let peak = samples.iter().fold(0.0_f32, |acc, &v| acc.max(v.abs()));
        let normalized: Vec<f32> = samples.iter().map(|&v| v / peak).collect();
        assert!((normalized.iter().fold(0.0_f32, |acc, &v| acc.max(v.abs())) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn silent_buffer_is_left_untouched_not_divided_by_zero() {
        let samples = vec![0.0_f32; 16];
        let peak = samples.iter().fold(0.0_f32, |acc, &v| acc.max(v.abs()));
        assert!(peak <= 1e-8);
    }
}
