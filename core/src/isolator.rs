//! Drum isolator (spec §4.B).
//!
//! The spec treats stem separation as an optional, swappable stage: the
//! default implementation is a passthrough, and a real separation model can
//! be plugged in later behind the same trait. This mirrors how
//! `mecomp-analysis::decoder::Decoder` is defined as a trait with one
//! concrete implementation so the decode backend can be swapped without
//! touching call sites.

use crate::types::AudioBuffer;

/// Isolates the percussive/drum stem from a full mix.
///
/// Implementations that fail must return `Err`; unlike the ML classifier,
/// there is no silent fallback here (spec §4.B) — a broken isolator is a
/// pipeline-fatal error, not a degraded-quality warning.
pub trait DrumIsolator {
    type Error: std::error::Error + Send + Sync + 'static;

    fn isolate(&self, audio: &AudioBuffer) -> Result<AudioBuffer, Self::Error>;
}

/// Returns the input unchanged. Used when `--no-separation` is set, or as
/// the default when no dedicated stem-separation backend is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughIsolator;

impl DrumIsolator for PassthroughIsolator {
    type Error = std::convert::Infallible;

    fn isolate(&self, audio: &AudioBuffer) -> Result<AudioBuffer, Self::Error> {
        Ok(audio.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_returns_identical_samples() {
        let audio = AudioBuffer {
            samples: vec![0.1, -0.2, 0.3],
            sample_rate: 44_100,
        };
        let isolated = PassthroughIsolator.isolate(&audio).unwrap();
        assert_eq!(isolated.samples, audio.samples);
        assert_eq!(isolated.sample_rate, audio.sample_rate);
    }
}
