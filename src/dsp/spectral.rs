//! STFT, mel filter bank and MFCC
//!
//! Frames are taken without centering: the first frame starts at sample 0
//! and a take shorter than one frame is zero-padded to a single frame.
//! Mel bands use the HTK formula with triangular, unnormalized filters.

use std::f64::consts::PI;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Floor added before the logarithm
pub const LOG_FLOOR: f64 = 1e-6;

pub fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

pub fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10.0_f64.powf(mel / 2595.0) - 1.0)
}

/// Per-frame features of one take
#[derive(Debug, Clone, PartialEq)]
pub struct Features {
    /// `frames × n_mels`, natural log
    pub log_mel: Vec<Vec<f64>>,
    /// `frames × n_mfcc`
    pub mfcc: Vec<Vec<f64>>,
}

impl Features {
    pub fn frames(&self) -> usize {
        self.log_mel.len()
    }
}

/// Reusable analysis plan for one sample rate and frame layout
pub struct FeatureExtractor {
    n_fft: usize,
    hop: usize,
    window: Vec<f64>,
    /// One row of FFT-bin weights per mel band
    filterbank: Vec<Vec<f64>>,
    /// Orthonormal DCT-II rows, `n_mfcc × n_mels`
    dct: Vec<Vec<f64>>,
    fft: Arc<dyn Fft<f64>>,
}

impl FeatureExtractor {
    pub fn new(
        sample_rate: u32,
        n_fft: usize,
        hop: usize,
        n_mels: usize,
        n_mfcc: usize,
        fmin: f64,
        fmax: f64,
    ) -> Self {
        let n_fft = n_fft.max(2);
        let window = hann(n_fft);
        let filterbank = mel_filterbank(sample_rate, n_fft, n_mels, fmin, fmax);
        let dct = dct_matrix(n_mfcc.min(n_mels), n_mels);
        let fft = FftPlanner::<f64>::new().plan_fft_forward(n_fft);
        Self {
            n_fft,
            hop: hop.max(1),
            window,
            filterbank,
            dct,
            fft,
        }
    }

    /// Number of frames a signal of `len` samples yields
    pub fn frame_count(&self, len: usize) -> usize {
        if len <= self.n_fft {
            1
        } else {
            1 + (len - self.n_fft) / self.hop
        }
    }

    /// Power spectrogram, `frames × (n_fft/2 + 1)`
    pub fn power_spectrogram(&self, samples: &[f32]) -> Vec<Vec<f64>> {
        let bins = self.n_fft / 2 + 1;
        let mut buffer = vec![Complex::new(0.0, 0.0); self.n_fft];
        (0..self.frame_count(samples.len()))
            .map(|frame| {
                let start = frame * self.hop;
                for (i, slot) in buffer.iter_mut().enumerate() {
                    let s = samples.get(start + i).copied().unwrap_or(0.0) as f64;
                    *slot = Complex::new(s * self.window[i], 0.0);
                }
                self.fft.process(&mut buffer);
                buffer[..bins].iter().map(|c| c.norm_sqr()).collect()
            })
            .collect()
    }

    pub fn extract(&self, samples: &[f32]) -> Features {
        let log_mel: Vec<Vec<f64>> = self
            .power_spectrogram(samples)
            .iter()
            .map(|spectrum| {
                self.filterbank
                    .iter()
                    .map(|weights| {
                        let energy: f64 = weights.iter().zip(spectrum).map(|(w, p)| w * p).sum();
                        (energy + LOG_FLOOR).ln()
                    })
                    .collect()
            })
            .collect();

        let mfcc = log_mel
            .iter()
            .map(|frame| {
                self.dct
                    .iter()
                    .map(|row| row.iter().zip(frame).map(|(c, x)| c * x).sum())
                    .collect()
            })
            .collect();

        Features { log_mel, mfcc }
    }
}

/// Periodic Hann window
pub fn hann(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / n as f64).cos()))
        .collect()
}

/// Triangular HTK mel filters over the bins of an `n_fft` spectrum
pub fn mel_filterbank(
    sample_rate: u32,
    n_fft: usize,
    n_mels: usize,
    fmin: f64,
    fmax: f64,
) -> Vec<Vec<f64>> {
    let bins = n_fft / 2 + 1;
    let nyquist = sample_rate as f64 / 2.0;
    let fmax = fmax.min(nyquist);
    let fmin = fmin.clamp(0.0, fmax);

    let mel_lo = hz_to_mel(fmin);
    let mel_hi = hz_to_mel(fmax);
    let edges: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_lo + (mel_hi - mel_lo) * i as f64 / (n_mels + 1) as f64))
        .collect();
    let bin_hz = sample_rate as f64 / n_fft as f64;

    (0..n_mels)
        .map(|m| {
            let (left, center, right) = (edges[m], edges[m + 1], edges[m + 2]);
            (0..bins)
                .map(|k| {
                    let f = k as f64 * bin_hz;
                    let rising = (f - left) / (center - left).max(f64::EPSILON);
                    let falling = (right - f) / (right - center).max(f64::EPSILON);
                    rising.min(falling).max(0.0)
                })
                .collect()
        })
        .collect()
}

/// Orthonormal DCT-II basis, `n_out × n_in`
pub fn dct_matrix(n_out: usize, n_in: usize) -> Vec<Vec<f64>> {
    let n = n_in as f64;
    (0..n_out)
        .map(|k| {
            let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            (0..n_in)
                .map(|i| scale * (PI * k as f64 * (2.0 * i as f64 + 1.0) / (2.0 * n)).cos())
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::signal::sine;
    use approx::assert_relative_eq;

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(44100, 2048, 512, 64, 20, 0.0, 8000.0)
    }

    #[test]
    fn test_mel_scale_round_trip() {
        assert_relative_eq!(hz_to_mel(1000.0), 999.985, epsilon = 1e-2);
        assert_relative_eq!(mel_to_hz(hz_to_mel(3150.0)), 3150.0, epsilon = 1e-9);
    }

    #[test]
    fn test_frame_count() {
        let fx = extractor();
        assert_eq!(fx.frame_count(100), 1);
        assert_eq!(fx.frame_count(2048), 1);
        assert_eq!(fx.frame_count(2048 + 512), 2);
        assert_eq!(fx.frame_count(2048 + 1023), 2);
    }

    #[test]
    fn test_dct_is_orthonormal() {
        let dct = dct_matrix(8, 8);
        for a in 0..8 {
            for b in 0..8 {
                let dot: f64 = dct[a].iter().zip(&dct[b]).map(|(x, y)| x * y).sum();
                assert_relative_eq!(dot, if a == b { 1.0 } else { 0.0 }, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_tone_lands_in_matching_band() {
        let fx = extractor();
        let features = fx.extract(&sine(1000.0, 0.2, 44100, 0.5));
        let frame = &features.log_mel[2];
        let loudest = frame
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();

        let fb = mel_filterbank(44100, 2048, 64, 0.0, 8000.0);
        let bin = (1000.0_f64 / (44100.0 / 2048.0)).round() as usize;
        assert!(fb[loudest][bin] > 0.0);
        assert_eq!(features.mfcc[0].len(), 20);
    }

    #[test]
    fn test_silence_is_floor() {
        let features = extractor().extract(&[0.0; 4096]);
        for v in &features.log_mel[0] {
            assert_relative_eq!(*v, LOG_FLOOR.ln());
        }
    }
}
