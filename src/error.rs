//! Error handling for stompmatch
//!
//! Every subsystem has its own error enum so callers can match on the
//! failures that matter to them. [`StompError`] wraps them all and carries
//! the error codes and recovery suggestions surfaced in session reports.

use thiserror::Error;

/// Result type alias for stompmatch operations
pub type Result<T> = std::result::Result<T, StompError>;

// ============================================================================
// Protocol errors
// ============================================================================

/// A frame failed validation or a value could not be encoded.
///
/// Fatal to the single frame, never to the session on its own.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("frame does not start with 0xF0")]
    MissingStart,

    #[error("frame does not end with 0xF7")]
    MissingTerminator,

    #[error("frame truncated: {len} bytes")]
    Truncated { len: usize },

    #[error("data byte {byte:#04x} at index {index} has bit 7 set")]
    InvalidDataByte { index: usize, byte: u8 },

    #[error("unknown frame header")]
    UnknownHeader,

    #[error("unknown command {0:#04x}")]
    UnknownCommand(u8),

    #[error("unknown section {0:#04x}")]
    UnknownSection(u8),

    #[error("checksum mismatch: expected {expected:#04x}, found {found:#04x}")]
    ChecksumMismatch { expected: u8, found: u8 },

    #[error("length mismatch: declared {declared}, actual {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("offset {offset} with {len} bytes exceeds region of {region} bytes")]
    OffsetOutOfRange { offset: usize, len: usize, region: usize },

    #[error("cannot encode {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

// ============================================================================
// Device errors
// ============================================================================

/// Failures of the device send path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("frame not acknowledged within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("device unreachable after {attempts} attempts")]
    Unreachable { attempts: u32 },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("device session is shut down")]
    Shutdown,
}

// ============================================================================
// Audio I/O errors
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioIoError {
    #[error("duplex operation did not finish within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("audio device error: {0}")]
    Device(String),

    #[error("audio stream error: {0}")]
    Stream(String),

    #[error("invalid signal: {0}")]
    InvalidSignal(String),
}

// ============================================================================
// Calibration errors
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("no calibration signal detected in the capture")]
    NoSignalDetected,

    #[error("calibration confidence {confidence:.3} below threshold {threshold:.3}")]
    LowConfidence { confidence: f64, threshold: f64 },

    #[error("calibration audio failed: {0}")]
    Audio(#[from] AudioIoError),
}

// ============================================================================
// Alignment failures
// ============================================================================

/// A trial capture could not be aligned. Discards the measurement only.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlignmentFailure {
    #[error("best correlation {peak:.3} below floor {floor:.3}")]
    NoCorrelation { peak: f64, floor: f64 },

    #[error("calibration profile confidence {confidence:.3} is not usable")]
    UnusableProfile { confidence: f64 },

    #[error("sample rate mismatch: reference {reference} Hz, captured {captured} Hz")]
    SampleRateMismatch { reference: u32, captured: u32 },

    #[error("capture too short to overlap the reference")]
    InsufficientOverlap,
}

// ============================================================================
// Configuration errors
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("duplicate parameter '{0}'")]
    DuplicateParameter(String),

    #[error("invalid setting {key}: {reason}")]
    InvalidSetting { key: String, reason: String },
}

// ============================================================================
// Crate error
// ============================================================================

/// Main error type for stompmatch operations
#[derive(Error, Debug)]
pub enum StompError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    #[error("audio I/O error: {0}")]
    AudioIo(#[from] AudioIoError),

    #[error("calibration failed: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("alignment failed: {0}")]
    Alignment(#[from] AlignmentFailure),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("patch is missing parameter {section}.{key}")]
    MissingParameter { section: String, key: String },

    #[error("invalid audio: {reason}")]
    InvalidAudio { reason: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StompError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            StompError::Protocol(_) => "PROTOCOL_ERROR",
            StompError::Device(DeviceError::Timeout { .. }) => "DEVICE_TIMEOUT",
            StompError::Device(DeviceError::Unreachable { .. }) => "DEVICE_UNREACHABLE",
            StompError::Device(_) => "DEVICE_ERROR",
            StompError::AudioIo(AudioIoError::Timeout { .. }) => "AUDIO_TIMEOUT",
            StompError::AudioIo(_) => "AUDIO_IO_ERROR",
            StompError::Calibration(CalibrationError::NoSignalDetected) => "NO_SIGNAL_DETECTED",
            StompError::Calibration(CalibrationError::LowConfidence { .. }) => {
                "LOW_CALIBRATION_CONFIDENCE"
            }
            StompError::Calibration(CalibrationError::Audio(_)) => "CALIBRATION_AUDIO_ERROR",
            StompError::Alignment(_) => "ALIGNMENT_FAILURE",
            StompError::Config(_) => "CONFIG_ERROR",
            StompError::MissingParameter { .. } => "MISSING_PARAMETER",
            StompError::InvalidAudio { .. } => "INVALID_AUDIO",
            StompError::FileNotFound { .. } => "FILE_NOT_FOUND",
            StompError::Io(_) => "IO_ERROR",
            StompError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Transient failures that a single trial may retry locally
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StompError::Device(DeviceError::Timeout { .. })
                | StompError::Device(DeviceError::Transport(_))
                | StompError::AudioIo(AudioIoError::Timeout { .. })
                | StompError::Alignment(AlignmentFailure::NoCorrelation { .. })
                | StompError::Alignment(AlignmentFailure::InsufficientOverlap)
        )
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            StompError::Device(DeviceError::Unreachable { .. }) => vec![
                "Check the MIDI cable and that the unit is powered on",
                "Verify the selected MIDI port matches the device",
                "Increase the device retry budget in the configuration",
            ],
            StompError::Calibration(CalibrationError::NoSignalDetected) => vec![
                "Check the audio routing between interface and effect unit",
                "Make sure the unit's output level is not muted",
                "Verify the selected input and output devices",
            ],
            StompError::Calibration(CalibrationError::LowConfidence { .. }) => vec![
                "Reduce background noise on the capture path",
                "Raise the stimulus level or the unit's output level",
                "Bypass time-based effects on the unit while calibrating",
            ],
            StompError::Alignment(_) => vec![
                "Recalibrate if the audio routing changed",
                "Widen the fine alignment window",
            ],
            StompError::Protocol(_) => vec![
                "The frame was corrupted in transit; resend it",
                "Check the patch values against the parameter table",
            ],
            StompError::MissingParameter { .. } => vec![
                "Add the parameter to the initial patch",
                "Remove the parameter from the search space",
            ],
            StompError::FileNotFound { .. } => vec![
                "Check the file path is correct",
                "Verify the file hasn't been moved or deleted",
            ],
            _ => vec![],
        }
    }
}
