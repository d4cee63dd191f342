//! Trial take alignment
//!
//! A capture is shifted by the calibrated latency, locked to the exact
//! sample by a normalized correlation search in a small window around that
//! offset, level-matched by the inverse loop gain and cut to the span it
//! shares with the reference.

use crate::audio::AudioTake;
use crate::calibration::CalibrationProfile;
use crate::config::AlignmentConfig;
use crate::dsp::{self, PeakSelection};
use crate::error::AlignmentFailure;

/// Aligned take plus what the search found
#[derive(Debug, Clone)]
pub struct Alignment {
    pub take: AudioTake,
    /// Samples by which the capture trailed the reference
    pub lag: i64,
    /// Normalized correlation at `lag`
    pub correlation: f64,
}

#[derive(Debug, Clone)]
pub struct SignalAligner {
    config: AlignmentConfig,
    min_confidence: f64,
}

impl SignalAligner {
    /// `min_confidence` is the calibration threshold a profile must meet
    pub fn new(config: AlignmentConfig, min_confidence: f64) -> Self {
        Self {
            config,
            min_confidence,
        }
    }

    pub fn align(
        &self,
        reference: &AudioTake,
        captured: &AudioTake,
        profile: &CalibrationProfile,
    ) -> Result<AudioTake, AlignmentFailure> {
        self.align_detailed(reference, captured, profile)
            .map(|a| a.take)
    }

    pub fn align_detailed(
        &self,
        reference: &AudioTake,
        captured: &AudioTake,
        profile: &CalibrationProfile,
    ) -> Result<Alignment, AlignmentFailure> {
        if !profile.is_usable(self.min_confidence) {
            return Err(AlignmentFailure::UnusableProfile {
                confidence: profile.confidence,
            });
        }
        if reference.sample_rate() != captured.sample_rate() {
            return Err(AlignmentFailure::SampleRateMismatch {
                reference: reference.sample_rate(),
                captured: captured.sample_rate(),
            });
        }
        if profile.sample_rate != captured.sample_rate() {
            return Err(AlignmentFailure::SampleRateMismatch {
                reference: profile.sample_rate,
                captured: captured.sample_rate(),
            });
        }

        let reference_mono = reference.mono_samples();
        let captured_mono = captured.mono_samples();
        if reference_mono.is_empty() || captured_mono.is_empty() {
            return Err(AlignmentFailure::InsufficientOverlap);
        }

        let coarse = profile.latency_samples() as i64;
        let window = dsp::ms_to_samples(self.config.fine_window_ms, captured.sample_rate()) as i64;
        let floor = self.config.correlation_floor;
        let peak = dsp::peak_in_range(
            &reference_mono,
            &captured_mono,
            (coarse - window).max(0),
            coarse + window,
            PeakSelection::Normalized,
        )
        .ok_or(AlignmentFailure::NoCorrelation { peak: 0.0, floor })?;

        if peak.normalized < floor {
            return Err(AlignmentFailure::NoCorrelation {
                peak: peak.normalized,
                floor,
            });
        }

        // the search never looks before playback started
        let lag = peak.lag;
        let len = (reference_mono.len() as i64).min(captured_mono.len() as i64 - lag);
        if len <= 0 {
            return Err(AlignmentFailure::InsufficientOverlap);
        }

        let take = captured
            .slice_frames(lag as usize, len as usize)
            .scaled(profile.compensation() as f32);
        log::debug!(
            "Aligned: lag {} (coarse {}), correlation {:.3}, {} frames",
            lag,
            coarse,
            peak.normalized,
            take.frames()
        );

        Ok(Alignment {
            take,
            lag,
            correlation: peak.normalized,
        })
    }
}
