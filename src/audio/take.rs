//! Immutable audio takes
//!
//! A take is interleaved `f32` audio plus the moment it was captured.
//! Samples are shared behind an `Arc`, so cloning a take is cheap and every
//! transformation produces a new take.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{Result, StompError};

#[derive(Debug, Clone)]
pub struct AudioTake {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channel_count: u16,
    captured_at: DateTime<Utc>,
}

impl AudioTake {
    /// Build a take from interleaved samples
    pub fn new(samples: Vec<f32>, sample_rate: u32, channel_count: u16) -> Result<Self> {
        if sample_rate == 0 {
            return Err(StompError::InvalidAudio {
                reason: "sample rate must be positive".to_string(),
            });
        }
        if channel_count == 0 || samples.len() % channel_count as usize != 0 {
            return Err(StompError::InvalidAudio {
                reason: format!(
                    "{} samples do not divide into {} channels",
                    samples.len(),
                    channel_count
                ),
            });
        }
        Ok(Self {
            samples: samples.into(),
            sample_rate,
            channel_count,
            captured_at: Utc::now(),
        })
    }

    /// Single-channel take
    pub fn from_mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate: sample_rate.max(1),
            channel_count: 1,
            captured_at: Utc::now(),
        }
    }

    pub fn with_captured_at(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = captured_at;
        self
    }

    /// Interleaved samples
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Number of sample frames
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channel_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Average of all channels, one value per frame
    pub fn mono_samples(&self) -> Vec<f32> {
        let channels = self.channel_count as usize;
        if channels == 1 {
            return self.samples.to_vec();
        }
        self.samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }

    pub fn to_mono(&self) -> AudioTake {
        Self {
            samples: self.mono_samples().into(),
            sample_rate: self.sample_rate,
            channel_count: 1,
            captured_at: self.captured_at,
        }
    }

    /// `len` frames starting at frame `start`, clipped to the take
    pub fn slice_frames(&self, start: usize, len: usize) -> AudioTake {
        let channels = self.channel_count as usize;
        let start = start.min(self.frames());
        let end = start.saturating_add(len).min(self.frames());
        Self {
            samples: self.samples[start * channels..end * channels].into(),
            sample_rate: self.sample_rate,
            channel_count: self.channel_count,
            captured_at: self.captured_at,
        }
    }

    /// Every sample multiplied by `gain`
    pub fn scaled(&self, gain: f32) -> AudioTake {
        Self {
            samples: self.samples.iter().map(|s| s * gain).collect(),
            sample_rate: self.sample_rate,
            channel_count: self.channel_count,
            captured_at: self.captured_at,
        }
    }

    /// Append `frames` frames of silence
    pub fn padded(&self, frames: usize) -> AudioTake {
        let mut samples = self.samples.to_vec();
        samples.resize(samples.len() + frames * self.channel_count as usize, 0.0);
        Self {
            samples: samples.into(),
            sample_rate: self.sample_rate,
            channel_count: self.channel_count,
            captured_at: self.captured_at,
        }
    }

    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
    }

    pub fn rms(&self) -> f64 {
        crate::dsp::rms(&self.samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rejects_ragged_interleaving() {
        assert!(AudioTake::new(vec![0.0; 5], 44100, 2).is_err());
        assert!(AudioTake::new(vec![0.0; 4], 0, 2).is_err());
        assert_eq!(AudioTake::new(vec![0.0; 4], 44100, 2).unwrap().frames(), 2);
    }

    #[test]
    fn test_mono_mixdown() {
        let take = AudioTake::new(vec![1.0, 0.0, 0.5, 0.5], 48000, 2).unwrap();
        assert_eq!(take.mono_samples(), vec![0.5, 0.5]);
    }

    #[test]
    fn test_transformations_leave_original_intact() {
        let take = AudioTake::from_mono(vec![0.5; 100], 1000);
        let louder = take.scaled(2.0);
        let longer = take.padded(50);
        let part = take.slice_frames(90, 20);

        assert_relative_eq!(take.peak(), 0.5);
        assert_relative_eq!(louder.peak(), 1.0);
        assert_eq!(longer.frames(), 150);
        assert_eq!(part.frames(), 10);
        assert_relative_eq!(take.duration_secs(), 0.1);
    }
}
