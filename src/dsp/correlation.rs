//! Cross-correlation
//!
//! `r(lag) = Σ reference[i] · signal[i + lag]`, computed through one
//! zero-padded FFT in f64 so long takes stay exact enough for
//! sample-accurate peak picking.

use rustfft::{num_complex::Complex, FftPlanner};

/// How to pick the winning lag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeakSelection {
    /// Largest raw correlation
    Raw,
    /// Largest energy-normalized correlation
    Normalized,
}

/// Peak of a correlation search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LagPeak {
    /// Samples by which `signal` trails `reference`
    pub lag: i64,
    pub correlation: f64,
    /// `correlation / sqrt(E_reference · E_signal_window)`, in `[-1, 1]`
    pub normalized: f64,
}

/// Correlation for every lag in `lo..=hi`
///
/// Lags with no overlap between the two signals yield zero.
pub fn correlate_lags(reference: &[f32], signal: &[f32], lo: i64, hi: i64) -> Vec<f64> {
    if lo > hi {
        return Vec::new();
    }
    let count = (hi - lo + 1) as usize;
    if reference.is_empty() || signal.is_empty() {
        return vec![0.0; count];
    }

    let n = (reference.len() + signal.len()).next_power_of_two();
    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);

    let mut sig: Vec<Complex<f64>> = signal
        .iter()
        .map(|&s| Complex::new(s as f64, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(n)
        .collect();
    let mut refr: Vec<Complex<f64>> = reference
        .iter()
        .map(|&s| Complex::new(s as f64, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(n)
        .collect();

    forward.process(&mut sig);
    forward.process(&mut refr);
    for (a, b) in sig.iter_mut().zip(&refr) {
        *a *= b.conj();
    }
    inverse.process(&mut sig);

    let scale = 1.0 / n as f64;
    let ref_len = reference.len() as i64;
    let sig_len = signal.len() as i64;
    (lo..=hi)
        .map(|lag| {
            if lag <= -ref_len || lag >= sig_len {
                0.0
            } else {
                let idx = if lag >= 0 { lag as usize } else { (n as i64 + lag) as usize };
                sig[idx].re * scale
            }
        })
        .collect()
}

/// Best lag in `lo..=hi` with its normalized correlation
///
/// Returns `None` when the range is empty or the reference is silent.
pub fn peak_in_range(
    reference: &[f32],
    signal: &[f32],
    lo: i64,
    hi: i64,
    selection: PeakSelection,
) -> Option<LagPeak> {
    let ref_energy = super::energy(reference);
    if lo > hi || ref_energy <= 0.0 {
        return None;
    }

    let correlations = correlate_lags(reference, signal, lo, hi);

    // prefix[i] = Σ signal[..i]²
    let mut prefix = Vec::with_capacity(signal.len() + 1);
    prefix.push(0.0f64);
    let mut acc = 0.0;
    for &s in signal {
        acc += (s as f64) * (s as f64);
        prefix.push(acc);
    }
    let window_energy = |lag: i64| -> f64 {
        let len = signal.len() as i64;
        let start = lag.clamp(0, len) as usize;
        let end = (lag + reference.len() as i64).clamp(0, len) as usize;
        prefix[end] - prefix[start]
    };

    let mut best: Option<LagPeak> = None;
    for (i, &r) in correlations.iter().enumerate() {
        let lag = lo + i as i64;
        let denom = (ref_energy * window_energy(lag)).sqrt();
        let normalized = if denom > 0.0 {
            (r / denom).clamp(-1.0, 1.0)
        } else {
            0.0
        };
        let candidate = LagPeak {
            lag,
            correlation: r,
            normalized,
        };
        let better = match (&best, selection) {
            (None, _) => true,
            (Some(b), PeakSelection::Raw) => r > b.correlation,
            (Some(b), PeakSelection::Normalized) => normalized > b.normalized,
        };
        if better {
            best = Some(candidate);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn direct(reference: &[f32], signal: &[f32], lag: i64) -> f64 {
        reference
            .iter()
            .enumerate()
            .filter_map(|(i, &r)| {
                let j = i as i64 + lag;
                (j >= 0 && (j as usize) < signal.len()).then(|| r as f64 * signal[j as usize] as f64)
            })
            .sum()
    }

    #[test]
    fn test_matches_direct_sum() {
        let reference: Vec<f32> = (0..37).map(|i| ((i * 7 % 11) as f32 - 5.0) / 5.0).collect();
        let signal: Vec<f32> = (0..53).map(|i| ((i * 5 % 13) as f32 - 6.0) / 6.0).collect();
        let lags = correlate_lags(&reference, &signal, -40, 60);
        for (i, r) in lags.iter().enumerate() {
            let lag = -40 + i as i64;
            assert_relative_eq!(*r, direct(&reference, &signal, lag), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_finds_delayed_impulse() {
        let mut reference = vec![0.0f32; 64];
        reference[0] = 0.8;
        let mut signal = vec![0.0f32; 200];
        signal[17] = 0.4;

        let peak = peak_in_range(&reference, &signal, 0, 100, PeakSelection::Raw).unwrap();
        assert_eq!(peak.lag, 17);
        assert_relative_eq!(peak.correlation, 0.32, epsilon = 1e-9);
        assert_relative_eq!(peak.normalized, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_negative_lag() {
        let reference: Vec<f32> = (0..200)
            .map(|i| ((i as f64).powi(2) * 0.7).sin() as f32)
            .collect();
        let signal = reference[5..].to_vec();
        let peak = peak_in_range(&reference, &signal, -10, 10, PeakSelection::Normalized).unwrap();
        assert_eq!(peak.lag, -5);
        assert!(peak.normalized > 0.9);
    }

    #[test]
    fn test_silent_reference_has_no_peak() {
        assert!(peak_in_range(&[0.0; 8], &[1.0; 8], 0, 4, PeakSelection::Raw).is_none());
        assert!(peak_in_range(&[1.0; 8], &[1.0; 8], 4, 0, PeakSelection::Raw).is_none());
    }
}
