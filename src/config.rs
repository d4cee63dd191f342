//! Session configuration
//!
//! Every threshold, budget and search constant lives here so a session can
//! be tuned from a JSON file without touching code. All sections fall back
//! to their defaults when omitted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result, StompError};
use crate::optimize::space::{ParameterSpace, ParameterSpec};

/// Audio loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Upper bound on a single play/record operation, on top of its duration
    pub io_timeout_ms: u64,
    /// Silence appended after every played signal to catch latency and tails
    pub tail_padding_ms: u64,
    /// Wait after a patch change before measuring
    pub settle_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            io_timeout_ms: 5000,
            tail_padding_ms: 500,
            settle_ms: 100,
        }
    }
}

/// Device send path settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Minimum spacing between two frames on the wire
    pub min_frame_interval_ms: u64,
    /// How long one send attempt may wait for the drain worker
    pub frame_timeout_ms: u64,
    /// Attempts per frame before the device is declared unreachable
    pub retry_budget: u32,
    /// Patch slot used for dumps and requests
    pub patch_index: u8,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            min_frame_interval_ms: 10,
            frame_timeout_ms: 500,
            retry_budget: 3,
            patch_index: 0,
        }
    }
}

impl DeviceConfig {
    pub fn min_frame_interval(&self) -> Duration {
        Duration::from_millis(self.min_frame_interval_ms)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

/// Latency and gain measurement settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Profiles below this confidence are rejected
    pub min_confidence: f64,
    /// Largest round-trip latency searched for
    pub max_latency_ms: f64,
    pub sweep_ms: f64,
    pub sweep_start_hz: f64,
    pub sweep_end_hz: f64,
    pub gap_ms: f64,
    pub tone_ms: f64,
    pub tone_hz: f64,
    /// Peak amplitude of the stimulus
    pub level: f32,
    /// Compensated output must stay at or below this level
    pub output_ceiling_dbfs: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            max_latency_ms: 500.0,
            sweep_ms: 50.0,
            sweep_start_hz: 100.0,
            sweep_end_hz: 8000.0,
            gap_ms: 50.0,
            tone_ms: 300.0,
            tone_hz: 1000.0,
            level: 0.25,
            output_ceiling_dbfs: -1.0,
        }
    }
}

impl CalibrationConfig {
    /// Length of the played stimulus, listening tail included
    pub fn stimulus_secs(&self) -> f64 {
        (self.sweep_ms + self.gap_ms + self.tone_ms + self.max_latency_ms) / 1000.0
    }
}

/// Trial alignment settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Half-width of the fine correlation search around the coarse offset
    pub fine_window_ms: f64,
    /// Normalized correlation below which a take is rejected
    pub correlation_floor: f64,
    /// Consecutive failed measurements tolerated before aborting
    pub failure_budget: u32,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            fine_window_ms: 5.0,
            correlation_floor: 0.2,
            failure_budget: 3,
        }
    }
}

/// Perceptual loss settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossConfig {
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub n_mfcc: usize,
    pub fmin: f64,
    pub fmax: f64,
    /// Weight of the log-mel distance; MFCC gets the remainder
    pub mel_weight: f64,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            n_fft: 2048,
            hop_length: 512,
            n_mels: 64,
            n_mfcc: 20,
            fmin: 0.0,
            fmax: 8000.0,
            mel_weight: 0.6,
        }
    }
}

/// Coordinate search settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Trial evaluations allowed per session
    pub max_iterations: usize,
    /// A trial worse than `best_loss * divergence_factor` triggers a revert
    pub divergence_factor: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            divergence_factor: 1.5,
        }
    }
}

/// Artifact export settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// No export when unset
    pub output_dir: Option<PathBuf>,
    pub session_name: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            session_name: "hil_session".to_string(),
        }
    }
}

/// Complete session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StompConfig {
    pub audio: AudioConfig,
    pub device: DeviceConfig,
    pub calibration: CalibrationConfig,
    pub alignment: AlignmentConfig,
    pub loss: LossConfig,
    pub search: SearchConfig,
    pub export: ExportConfig,
    pub parameters: Vec<ParameterSpec>,
}

impl Default for StompConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            device: DeviceConfig::default(),
            calibration: CalibrationConfig::default(),
            alignment: AlignmentConfig::default(),
            loss: LossConfig::default(),
            search: SearchConfig::default(),
            export: ExportConfig::default(),
            parameters: ParameterSpace::default_specs(),
        }
    }
}

fn setting(key: &str, reason: &str) -> StompError {
    ConfigError::InvalidSetting {
        key: key.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

impl StompConfig {
    /// Load a JSON configuration file and validate it
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(StompError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        let config: StompConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// The search space described by `parameters`
    pub fn parameter_space(&self) -> Result<ParameterSpace> {
        ParameterSpace::new(self.parameters.clone())
    }

    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(setting("audio.sample_rate", "must be positive"));
        }
        if self.device.retry_budget == 0 {
            return Err(setting("device.retry_budget", "must allow at least one attempt"));
        }
        if !(0.0..=1.0).contains(&self.calibration.min_confidence) {
            return Err(setting("calibration.min_confidence", "must be within [0, 1]"));
        }
        if self.calibration.max_latency_ms <= 0.0 {
            return Err(setting("calibration.max_latency_ms", "must be positive"));
        }
        if self.calibration.sweep_end_hz <= self.calibration.sweep_start_hz
            || self.calibration.sweep_start_hz <= 0.0
        {
            return Err(setting("calibration.sweep_*_hz", "sweep must rise from a positive frequency"));
        }
        if !(self.calibration.level > 0.0 && self.calibration.level <= 1.0) {
            return Err(setting("calibration.level", "must be within (0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.alignment.correlation_floor) {
            return Err(setting("alignment.correlation_floor", "must be within [0, 1]"));
        }
        if self.loss.hop_length == 0 || self.loss.n_fft < 2 {
            return Err(setting("loss.n_fft", "frame and hop sizes must be positive"));
        }
        if self.loss.n_mfcc == 0 || self.loss.n_mfcc > self.loss.n_mels {
            return Err(setting("loss.n_mfcc", "must be within 1..=n_mels"));
        }
        if self.loss.fmax <= self.loss.fmin {
            return Err(setting("loss.fmax", "must exceed fmin"));
        }
        if !(0.0..=1.0).contains(&self.loss.mel_weight) {
            return Err(setting("loss.mel_weight", "must be within [0, 1]"));
        }
        if self.search.divergence_factor < 1.0 {
            return Err(setting("search.divergence_factor", "must be at least 1"));
        }
        self.parameter_space()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_validate() {
        let config = StompConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.device.min_frame_interval(), Duration::from_millis(10));
        assert_eq!(config.parameters.len(), 11);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: StompConfig =
            serde_json::from_str(r#"{"search": {"max_iterations": 40}}"#).unwrap();
        assert_eq!(config.search.max_iterations, 40);
        assert_eq!(config.search.divergence_factor, 1.5);
        assert_eq!(config.loss.n_mels, 64);
    }

    #[test]
    fn test_invalid_setting_rejected() {
        let mut config = StompConfig::default();
        config.loss.n_mfcc = 80;
        let err = config.validate().unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = StompConfig::default();
        config.search.max_iterations = 7;
        config.save(&path).unwrap();

        let loaded = StompConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
