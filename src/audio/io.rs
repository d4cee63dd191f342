//! Duplex audio seam
//!
//! The control loop only ever needs one operation from the audio interface:
//! play a signal into the effect unit and record what comes back, as one
//! blocking call with a deadline.

use std::time::Duration;

use crate::audio::take::AudioTake;
use crate::error::AudioIoError;

/// Synchronous play-and-capture through the hardware loop
pub trait AudioIo: Send {
    /// Rate at which both directions run
    fn sample_rate(&self) -> u32;

    /// Play `signal` and return a capture of the same length
    ///
    /// The returned take starts at the first played sample, so the loop
    /// latency shows up as leading silence. Implementations must give up with
    /// `AudioIoError::Timeout` once `timeout` elapses.
    fn play_record(
        &mut self,
        signal: &AudioTake,
        timeout: Duration,
    ) -> Result<AudioTake, AudioIoError>;

    fn name(&self) -> &str {
        "audio"
    }
}

/// Reject signals the loop cannot play
pub fn check_signal(signal: &AudioTake, sample_rate: u32) -> Result<(), AudioIoError> {
    if signal.is_empty() {
        return Err(AudioIoError::InvalidSignal("empty signal".to_string()));
    }
    if signal.sample_rate() != sample_rate {
        return Err(AudioIoError::InvalidSignal(format!(
            "signal is {} Hz, interface runs at {} Hz",
            signal.sample_rate(),
            sample_rate
        )));
    }
    Ok(())
}
