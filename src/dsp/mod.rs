//! Signal analysis
//!
//! Level helpers shared by calibration and loss, FFT cross-correlation for
//! latency and alignment, and the STFT/mel/MFCC front end of the loss.

pub mod correlation;
pub mod spectral;

pub use correlation::{correlate_lags, peak_in_range, LagPeak, PeakSelection};
pub use spectral::{FeatureExtractor, Features};

/// Floor used when converting silence to decibels
pub const SILENCE_DB: f64 = -120.0;

/// Root-mean-square level, accumulated in f64
pub fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt()
}

/// Sum of squares
pub fn energy(samples: &[f32]) -> f64 {
    samples.iter().map(|&s| (s as f64) * (s as f64)).sum()
}

pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
}

#[inline]
pub fn db_to_linear(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}

/// Amplitude to dB, floored at [`SILENCE_DB`]
#[inline]
pub fn linear_to_db(linear: f64) -> f64 {
    if linear <= 0.0 {
        SILENCE_DB
    } else {
        (20.0 * linear.log10()).max(SILENCE_DB)
    }
}

pub fn ms_to_samples(ms: f64, sample_rate: u32) -> usize {
    (ms * sample_rate as f64 / 1000.0).round().max(0.0) as usize
}

pub fn samples_to_ms(samples: f64, sample_rate: u32) -> f64 {
    samples * 1000.0 / sample_rate as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_db_conversions() {
        assert_relative_eq!(db_to_linear(0.0), 1.0);
        assert_relative_eq!(db_to_linear(-6.0), 0.501187, epsilon = 1e-5);
        assert_relative_eq!(linear_to_db(0.5), -6.0206, epsilon = 1e-4);
        assert_eq!(linear_to_db(0.0), SILENCE_DB);
    }

    #[test]
    fn test_rms_of_square_wave() {
        let s: Vec<f32> = (0..100).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        assert_relative_eq!(rms(&s), 0.5, epsilon = 1e-12);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn test_ms_sample_conversion() {
        assert_eq!(ms_to_samples(50.0, 44100), 2205);
        assert_relative_eq!(samples_to_ms(2205.0, 44100), 50.0);
    }
}
