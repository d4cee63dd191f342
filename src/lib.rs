//! Stompmatch - Hardware-in-the-Loop Tone Matching
//!
//! Refines the patch of a SysEx-controlled multi-effects unit until its
//! output perceptually matches a target recording. Each trial sends a
//! candidate patch to the unit, plays a dry signal through it, aligns the
//! capture and scores it against the target.
//!
//! # Architecture
//!
//! - [`patch`]: typed patch model and the SysEx wire codec
//! - [`device`]: paced, retried frame delivery over a MIDI transport
//! - [`calibration`] and [`align`]: loop latency/gain and trial alignment
//! - [`loss`]: log-mel and MFCC distance between two takes
//! - [`optimize`]: parameter space and coordinate search
//! - [`session`]: the control loop, its state machine, report and export
//! - [`rig`]: a simulated unit and audio loop for offline runs and tests

pub mod align;
pub mod audio;
pub mod calibration;
pub mod cli;
pub mod config;
pub mod device;
pub mod dsp;
pub mod error;
pub mod loss;
pub mod optimize;
pub mod patch;
pub mod rig;
pub mod session;

pub use align::SignalAligner;
pub use audio::{AudioIo, AudioTake};
pub use calibration::{CalibrationEngine, CalibrationProfile};
pub use config::StompConfig;
pub use device::DeviceSession;
pub use error::{Result, StompError};
pub use loss::PerceptualLossEvaluator;
pub use optimize::{CoordinateSearchOptimizer, ParameterSpace, ParameterSpec};
pub use patch::{Patch, PatchCodec};
pub use session::{OptimizationOrchestrator, OptimizationSession, SessionStatus};
