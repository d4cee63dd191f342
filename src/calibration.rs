//! Round-trip latency and gain calibration
//!
//! One duplex take of a known stimulus (sweep, gap, tone, tail) tells us how
//! late and how loud the effect loop returns audio. Every trial capture is
//! aligned with the resulting [`CalibrationProfile`].

use std::ops::Range;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audio::signal;
use crate::audio::{AudioIo, AudioTake};
use crate::config::CalibrationConfig;
use crate::dsp::{self, PeakSelection};
use crate::error::{AudioIoError, CalibrationError, Result, StompError};

/// Measured loop characteristics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    pub latency_ms: f64,
    /// `20·log10(rms_captured / rms_reference)`
    pub gain_ratio_db: f64,
    /// Normalized correlation at the latency peak, `[0, 1]`
    pub confidence: f64,
    pub sample_rate: u32,
    pub measured_at: DateTime<Utc>,
}

impl CalibrationProfile {
    pub fn latency_samples(&self) -> usize {
        dsp::ms_to_samples(self.latency_ms, self.sample_rate)
    }

    pub fn is_usable(&self, min_confidence: f64) -> bool {
        self.confidence.is_finite() && self.confidence >= min_confidence
    }

    /// Linear factor that undoes the loop gain
    pub fn compensation(&self) -> f64 {
        dsp::db_to_linear(-self.gain_ratio_db)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(StompError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }
}

/// Calibration stimulus and where its parts sit
#[derive(Debug, Clone)]
pub struct Stimulus {
    pub take: AudioTake,
    pub sweep: Range<usize>,
    pub tone: Range<usize>,
}

impl Stimulus {
    pub fn build(config: &CalibrationConfig, sample_rate: u32) -> Self {
        let secs = |ms: f64| ms / 1000.0;
        let mut samples = signal::exp_sweep(
            config.sweep_start_hz,
            config.sweep_end_hz,
            secs(config.sweep_ms),
            sample_rate,
            config.level,
        );
        let sweep = 0..samples.len();

        samples.extend(signal::silence(secs(config.gap_ms), sample_rate));
        let tone_start = samples.len();
        samples.extend(signal::sine(
            config.tone_hz,
            secs(config.tone_ms),
            sample_rate,
            config.level,
        ));
        let tone = tone_start..samples.len();
        samples.extend(signal::silence(secs(config.max_latency_ms), sample_rate));

        Self {
            take: AudioTake::from_mono(samples, sample_rate),
            sweep,
            tone,
        }
    }
}

/// Measures latency and gain through a duplex loop
#[derive(Debug, Clone)]
pub struct CalibrationEngine {
    config: CalibrationConfig,
}

impl CalibrationEngine {
    pub fn new(config: CalibrationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Play the stimulus through `audio` and measure the loop
    pub fn calibrate(
        &self,
        audio: &mut dyn AudioIo,
        timeout: Duration,
    ) -> std::result::Result<CalibrationProfile, CalibrationError> {
        let sample_rate = audio.sample_rate();
        let stimulus = Stimulus::build(&self.config, sample_rate);
        log::info!(
            "Calibrating: {:.2}s stimulus through {}",
            stimulus.take.duration_secs(),
            audio.name()
        );

        let captured = audio.play_record(&stimulus.take, timeout)?;
        let reference = stimulus.take.samples();
        self.measure(
            &reference[stimulus.sweep.clone()],
            &reference[stimulus.tone.clone()],
            stimulus.tone.start,
            &captured.mono_samples(),
            sample_rate,
        )
    }

    /// Measure a recorded round trip of `reference`
    ///
    /// The whole reference serves as both latency and gain probe.
    pub fn analyze(
        &self,
        reference: &AudioTake,
        captured: &AudioTake,
    ) -> std::result::Result<CalibrationProfile, CalibrationError> {
        if reference.sample_rate() != captured.sample_rate() {
            return Err(AudioIoError::InvalidSignal(format!(
                "reference is {} Hz, capture is {} Hz",
                reference.sample_rate(),
                captured.sample_rate()
            ))
            .into());
        }
        let probe = reference.mono_samples();
        self.measure(
            &probe,
            &probe,
            0,
            &captured.mono_samples(),
            reference.sample_rate(),
        )
    }

    fn measure(
        &self,
        probe: &[f32],
        gain_reference: &[f32],
        gain_offset: usize,
        captured: &[f32],
        sample_rate: u32,
    ) -> std::result::Result<CalibrationProfile, CalibrationError> {
        let captured_peak = dsp::peak(captured);
        if captured_peak <= 0.0 {
            return Err(CalibrationError::NoSignalDetected);
        }

        let max_lag = dsp::ms_to_samples(self.config.max_latency_ms, sample_rate)
            .min(captured.len().saturating_sub(1));
        let peak = dsp::peak_in_range(probe, captured, 0, max_lag as i64, PeakSelection::Raw)
            .filter(|p| p.correlation > 0.0)
            .ok_or(CalibrationError::NoSignalDetected)?;

        let confidence = peak.normalized.clamp(0.0, 1.0);
        if confidence < self.config.min_confidence {
            return Err(CalibrationError::LowConfidence {
                confidence,
                threshold: self.config.min_confidence,
            });
        }

        let lag = peak.lag.max(0) as usize;
        let start = lag + gain_offset;
        let len = gain_reference
            .len()
            .min(captured.len().saturating_sub(start));
        if len == 0 {
            return Err(CalibrationError::NoSignalDetected);
        }
        let rms_reference = dsp::rms(&gain_reference[..len]);
        let rms_captured = dsp::rms(&captured[start..start + len]);
        if rms_reference <= 0.0 || rms_captured <= 0.0 {
            return Err(CalibrationError::NoSignalDetected);
        }

        let mut gain_ratio_db = dsp::linear_to_db(rms_captured / rms_reference);
        let floor_db = dsp::linear_to_db(captured_peak as f64) - self.config.output_ceiling_dbfs;
        if gain_ratio_db < floor_db {
            log::warn!(
                "Calibration gain {:.2} dB would push the capture peak past {:.1} dBFS; clamped to {:.2} dB",
                gain_ratio_db,
                self.config.output_ceiling_dbfs,
                floor_db
            );
            gain_ratio_db = floor_db;
        }

        let profile = CalibrationProfile {
            latency_ms: dsp::samples_to_ms(lag as f64, sample_rate),
            gain_ratio_db,
            confidence,
            sample_rate,
            measured_at: Utc::now(),
        };
        log::info!(
            "Calibration: latency {:.2} ms, gain {:+.2} dB, confidence {:.3}",
            profile.latency_ms,
            profile.gain_ratio_db,
            profile.confidence
        );
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    /// Delays and scales whatever it plays
    struct DelayLoop {
        latency: usize,
        gain: f32,
    }

    impl AudioIo for DelayLoop {
        fn sample_rate(&self) -> u32 {
            44100
        }

        fn play_record(
            &mut self,
            signal: &AudioTake,
            _timeout: Duration,
        ) -> std::result::Result<AudioTake, AudioIoError> {
            let mut out = vec![0.0; signal.frames()];
            for (i, s) in signal.mono_samples().iter().enumerate() {
                if let Some(slot) = out.get_mut(i + self.latency) {
                    *slot = s * self.gain;
                }
            }
            Ok(AudioTake::from_mono(out, signal.sample_rate()))
        }
    }

    #[test]
    fn test_impulse_scenario() {
        let engine = CalibrationEngine::new(CalibrationConfig::default());
        let reference = AudioTake::from_mono(signal::impulse(4410, 0, 0.8), 44100);
        let captured = AudioTake::from_mono(signal::impulse(44100, 2205, 0.4), 44100);

        let profile = engine.analyze(&reference, &captured).unwrap();
        assert_relative_eq!(profile.latency_ms, 50.0, epsilon = 1e-9);
        assert_relative_eq!(profile.gain_ratio_db, -6.0206, epsilon = 1e-3);
        assert_relative_eq!(profile.confidence, 1.0, epsilon = 1e-9);
        assert_eq!(profile.latency_samples(), 2205);
    }

    #[test]
    fn test_calibrate_through_loop() {
        let engine = CalibrationEngine::new(CalibrationConfig::default());
        let mut audio = DelayLoop {
            latency: 617,
            gain: 0.5,
        };
        let profile = engine.calibrate(&mut audio, Duration::from_secs(1)).unwrap();

        assert_eq!(profile.latency_samples(), 617);
        assert_relative_eq!(profile.gain_ratio_db, -6.0206, epsilon = 0.1);
        assert!(profile.confidence > 0.99);
        assert!(profile.is_usable(0.5));
    }

    #[test]
    fn test_silence_is_no_signal() {
        let engine = CalibrationEngine::new(CalibrationConfig::default());
        let mut audio = DelayLoop {
            latency: 10,
            gain: 0.0,
        };
        assert_eq!(
            engine.calibrate(&mut audio, Duration::from_secs(1)),
            Err(CalibrationError::NoSignalDetected)
        );
    }

    #[test]
    fn test_gain_clamped_below_ceiling() {
        let config = CalibrationConfig {
            max_latency_ms: 100.0,
            ..CalibrationConfig::default()
        };
        let engine = CalibrationEngine::new(config);
        let sweep = signal::exp_sweep(100.0, 8000.0, 0.05, 44100, 0.5);
        let mut captured = vec![0.0f32; 8000];
        for (i, s) in sweep.iter().enumerate() {
            captured[300 + i] = s * 0.1;
        }
        // never overlaps the probe within the latency range
        captured[7500] = 0.95;

        let profile = engine
            .analyze(
                &AudioTake::from_mono(sweep, 44100),
                &AudioTake::from_mono(captured, 44100),
            )
            .unwrap();
        assert_eq!(profile.latency_samples(), 300);
        let floor = dsp::linear_to_db(0.95) + 1.0;
        assert_relative_eq!(profile.gain_ratio_db, floor, epsilon = 1e-5);
    }

    #[test]
    fn test_profile_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        let profile = CalibrationProfile {
            latency_ms: 12.5,
            gain_ratio_db: -3.0,
            confidence: 0.93,
            sample_rate: 48000,
            measured_at: Utc::now(),
        };
        profile.save(&path).unwrap();
        assert_eq!(CalibrationProfile::load(&path).unwrap(), profile);
        assert_eq!(profile.latency_samples(), 600);
        assert!(!profile.is_usable(0.95));
    }
}
