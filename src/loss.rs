//! Perceptual loss
//!
//! Distance between two takes as a weighted sum of a log-mel distance and
//! an MFCC distance, both mean absolute errors over the frames the two
//! takes have in common. Identical takes score exactly zero.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::audio::AudioTake;
use crate::config::LossConfig;
use crate::dsp::{FeatureExtractor, Features};
use crate::error::{Result, StompError};

/// Components of one loss evaluation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossBreakdown {
    pub mel_distance: f64,
    pub mfcc_distance: f64,
    pub total: f64,
}

pub struct PerceptualLossEvaluator {
    config: LossConfig,
    /// Extractor for the last sample rate seen
    extractor: Mutex<Option<(u32, FeatureExtractor)>>,
}

impl std::fmt::Debug for PerceptualLossEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerceptualLossEvaluator")
            .field("config", &self.config)
            .finish()
    }
}

impl PerceptualLossEvaluator {
    pub fn new(config: LossConfig) -> Self {
        Self {
            config,
            extractor: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &LossConfig {
        &self.config
    }

    /// Scalar distance, `>= 0`
    pub fn loss(&self, reference: &AudioTake, candidate: &AudioTake) -> Result<f64> {
        Ok(self.breakdown(reference, candidate)?.total)
    }

    pub fn breakdown(&self, reference: &AudioTake, candidate: &AudioTake) -> Result<LossBreakdown> {
        if reference.sample_rate() != candidate.sample_rate() {
            return Err(StompError::InvalidAudio {
                reason: format!(
                    "sample rate mismatch: {} Hz vs {} Hz",
                    reference.sample_rate(),
                    candidate.sample_rate()
                ),
            });
        }
        if reference.is_empty() || candidate.is_empty() {
            return Err(StompError::InvalidAudio {
                reason: "cannot score an empty take".to_string(),
            });
        }

        let (a, b) = self.features(reference, candidate)?;
        let frames = a.frames().min(b.frames());
        let mel_distance = mean_abs_diff(&a.log_mel[..frames], &b.log_mel[..frames]);
        let mfcc_distance = mean_abs_diff(&a.mfcc[..frames], &b.mfcc[..frames]);
        let w = self.config.mel_weight;

        Ok(LossBreakdown {
            mel_distance,
            mfcc_distance,
            total: w * mel_distance + (1.0 - w) * mfcc_distance,
        })
    }

    fn features(&self, reference: &AudioTake, candidate: &AudioTake) -> Result<(Features, Features)> {
        let sample_rate = reference.sample_rate();
        let mut guard = self.extractor.lock().map_err(|_| StompError::InvalidAudio {
            reason: "feature extractor poisoned".to_string(),
        })?;
        if !matches!(guard.as_ref(), Some((rate, _)) if *rate == sample_rate) {
            *guard = None;
        }
        let c = &self.config;
        let (_, extractor) = guard.get_or_insert_with(|| {
            (
                sample_rate,
                FeatureExtractor::new(
                    sample_rate,
                    c.n_fft,
                    c.hop_length,
                    c.n_mels,
                    c.n_mfcc,
                    c.fmin,
                    c.fmax,
                ),
            )
        });
        Ok((
            extractor.extract(&reference.mono_samples()),
            extractor.extract(&candidate.mono_samples()),
        ))
    }
}

fn mean_abs_diff(a: &[Vec<f64>], b: &[Vec<f64>]) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for (ra, rb) in a.iter().zip(b) {
        for (x, y) in ra.iter().zip(rb) {
            sum += (x - y).abs();
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
