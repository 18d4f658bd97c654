//! Autocorrelation-based tempo candidate estimation.
//!
//! Grounds `_tempo_candidates` from the reference onset detector: rather
//! than a Fourier tempogram, the mean-centered onset envelope is
//! autocorrelated directly, peaks in the autocorrelation are read off as
//! candidate beat periods, and each is converted to BPM through the frame
//! hop and sample rate.

/// Returns up to 4 unique tempo candidates (BPM >= 60) found via
/// autocorrelation peak-picking over the envelope.
#[must_use]
pub fn autocorrelation_tempo_candidates(envelope: &[f32], sample_rate: u32, hop_length: usize) -> Vec<f32> {
    let n = envelope.len();
    if n < 4 {
        return Vec::new();
    }
    let mean = envelope.iter().sum::<f32>() / n as f32;
    let centered: Vec<f32> = envelope.iter().map(|v| v - mean).collect();

    const BPM_LO: f32 = 30.0;
    const BPM_HI: f32 = 300.0;
    let lag_min = ((60.0 * sample_rate as f32) / (BPM_HI * hop_length as f32)).max(1.0) as usize;
    let lag_max = (((60.0 * sample_rate as f32) / (BPM_LO * hop_length as f32)) as usize).min(n.saturating_sub(1));
    if lag_max <= lag_min + 1 {
        return Vec::new();
    }

    let mut autocorr = vec![0.0_f32; lag_max + 1];
    for lag in lag_min..=lag_max {
        let mut sum = 0.0_f32;
        for i in 0..n - lag {
            sum += centered[i] * centered[i + lag];
        }
        autocorr[lag] = sum;
    }

    let mut peaks: Vec<(usize, f32)> = Vec::new();
    for lag in (lag_min + 1)..lag_max {
        if autocorr[lag] > autocorr[lag - 1] && autocorr[lag] >= autocorr[lag + 1] && autocorr[lag] > 0.0 {
            peaks.push((lag, autocorr[lag]));
        }
    }
    peaks.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());

    let mut bpms = Vec::new();
    for (lag, _) in peaks {
        let bpm = 60.0 * sample_rate as f32 / (hop_length as f32 * lag as f32);
        if bpm.is_finite() && bpm >= 60.0 && bpms.iter().all(|&b: &f32| (b - bpm).abs() > 0.5) {
            bpms.push(bpm);
        }
        if bpms.len() >= 4 {
            break;
        }
    }
    bpms
}

/// Expands a set of tempo candidates with their 0.5x and 2.0x harmonics,
/// keeping only values in `[50, 260]` BPM and deduplicating within 0.5 BPM.
/// Falls back to `[120.0]` if the input is empty.
#[must_use]
pub fn expand_with_harmonics(candidates: &[f32]) -> Vec<f32> {
    if candidates.is_empty() {
        return vec![120.0];
    }
    let mut expanded = Vec::new();
    for &bpm in candidates {
        for &mult in &[0.5, 1.0, 2.0] {
            let value = bpm * mult;
            if (50.0..=260.0).contains(&value) {
                expanded.push(value);
            }
        }
    }
    let mut deduped: Vec<f32> = Vec::new();
    for value in expanded {
        if deduped.iter().all(|&existing: &f32| (existing - value).abs() > 0.5) {
            deduped.push(value);
        }
    }
    if deduped.is_empty() {
        deduped.push(120.0);
    }
    deduped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn periodic_envelope_recovers_known_tempo() {
        let sr = 44100u32;
        let hop = 512usize;
        let bpm = 178.0_f32;
        let period_frames = (60.0 * sr as f32 / bpm / hop as f32).round() as usize;
        let n_frames = period_frames * 40;
        let mut envelope = vec![0.0_f32; n_frames];
        let mut i = 0;
        while i < n_frames {
            envelope[i] = 1.0;
            i += period_frames;
        }
        let candidates = autocorrelation_tempo_candidates(&envelope, sr, hop);
        assert!(!candidates.is_empty());
        let closest = candidates.iter().cloned().fold(f32::INFINITY, |acc, c| {
            if (c - bpm).abs() < (acc - bpm).abs() {
                c
            } else {
                acc
            }
        });
        assert!((closest - bpm).abs() < 6.0, "expected near {bpm}, got {closest}");
    }

    #[test]
    fn empty_candidates_fall_back_to_120() {
        assert_eq!(expand_with_harmonics(&[]), vec![120.0]);
    }

    #[test]
    fn harmonics_are_deduplicated_and_bounded() {
        let expanded = expand_with_harmonics(&[120.0]);
        assert!(expanded.iter().all(|&b| (50.0..=260.0).contains(&b)));
        assert!(expanded.contains(&120.0));
        assert!(expanded.contains(&60.0));
        assert!(expanded.contains(&240.0));
    }
}
