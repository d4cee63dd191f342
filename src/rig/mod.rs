//! Simulated effect unit and audio loop
//!
//! [`SimulatedRig`] stands in for the hardware: its [`RigTransport`] decodes
//! every SysEx frame into a device memory image and answers dump requests,
//! and its [`RigAudio`] plays signals through the effect chain described by
//! that image, adding loop latency, gain and a little noise. Faults can be
//! injected through [`RigControl`] to exercise the session's failure paths.

pub mod effects;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use flume::{Receiver, Sender};

use crate::audio::io::check_signal;
use crate::audio::{AudioIo, AudioTake};
use crate::device::MidiTransport;
use crate::dsp;
use crate::error::{AudioIoError, DeviceError};
use crate::patch::codec::{decode_frame, parse_dump_request, split_frames};
use crate::patch::{DecodedFrame, Patch, PatchCodec, PatchImage};

pub use effects::RigChain;

/// Physical behaviour of the simulated loop
#[derive(Debug, Clone, PartialEq)]
pub struct RigSettings {
    pub sample_rate: u32,
    pub latency_ms: f64,
    pub gain_db: f64,
    /// Peak amplitude of the additive noise
    pub noise_level: f32,
    pub seed: u64,
}

impl Default for RigSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            latency_ms: 12.0,
            gain_db: -3.0,
            noise_level: 1e-4,
            seed: 0x5EED,
        }
    }
}

#[derive(Default)]
struct Faults {
    transport_down: AtomicBool,
    /// Duplex calls that run clean before queued faults apply
    clean_captures: AtomicU32,
    timeouts: AtomicU32,
    scrambled: AtomicU32,
}

/// Take one pending fault, if any
fn take_fault(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// The simulated unit; hands out its transport and audio ends
pub struct SimulatedRig {
    settings: RigSettings,
    image: Arc<Mutex<PatchImage>>,
    faults: Arc<Faults>,
}

impl SimulatedRig {
    pub fn new(settings: RigSettings) -> Self {
        Self {
            settings,
            image: Arc::new(Mutex::new(PatchImage::default())),
            faults: Arc::new(Faults::default()),
        }
    }

    pub fn settings(&self) -> &RigSettings {
        &self.settings
    }

    pub fn transport(&self) -> RigTransport {
        let (tx, rx) = flume::unbounded();
        RigTransport {
            image: self.image.clone(),
            faults: self.faults.clone(),
            codec: PatchCodec::new(),
            replies_tx: tx,
            replies_rx: rx,
        }
    }

    pub fn audio(&self) -> RigAudio {
        RigAudio {
            settings: self.settings.clone(),
            image: self.image.clone(),
            faults: self.faults.clone(),
            codec: PatchCodec::new(),
            noise_state: self.settings.seed,
        }
    }

    pub fn control(&self) -> RigControl {
        RigControl {
            faults: self.faults.clone(),
        }
    }

    /// The patch the unit currently holds
    pub fn current_patch(&self) -> Patch {
        PatchCodec::new().patch_from_image(&lock(&self.image))
    }

    /// Process `dry` through `patch` with no loop latency, gain or noise
    ///
    /// The patch is quantized to device resolution first, so this is what
    /// the unit would produce after receiving it.
    pub fn render(patch: &Patch, dry: &AudioTake) -> crate::error::Result<AudioTake> {
        let codec = PatchCodec::new();
        let device_patch = codec.patch_from_image(&codec.image(patch)?);
        let mut samples = dry.mono_samples();
        RigChain::from_patch(&device_patch, dry.sample_rate()).process(&mut samples);
        Ok(AudioTake::from_mono(samples, dry.sample_rate()))
    }
}

/// Fault injection handle
#[derive(Clone)]
pub struct RigControl {
    faults: Arc<Faults>,
}

impl RigControl {
    /// Every send fails while set
    pub fn set_transport_down(&self, down: bool) {
        self.faults.transport_down.store(down, Ordering::SeqCst);
    }

    /// Let `count` duplex calls through untouched before any queued capture
    /// fault applies, e.g. to get past calibration
    pub fn delay_faults(&self, count: u32) {
        self.faults.clean_captures.store(count, Ordering::SeqCst);
    }

    /// The next `count` duplex calls time out
    pub fn time_out_next_captures(&self, count: u32) {
        self.faults.timeouts.store(count, Ordering::SeqCst);
    }

    /// The next `count` duplex calls return unrelated noise
    pub fn scramble_next_captures(&self, count: u32) {
        self.faults.scrambled.store(count, Ordering::SeqCst);
    }
}

/// SysEx end of the rig
pub struct RigTransport {
    image: Arc<Mutex<PatchImage>>,
    faults: Arc<Faults>,
    codec: PatchCodec,
    replies_tx: Sender<Vec<u8>>,
    replies_rx: Receiver<Vec<u8>>,
}

impl MidiTransport for RigTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), DeviceError> {
        if self.faults.transport_down.load(Ordering::SeqCst) {
            return Err(DeviceError::Transport("simulated port down".to_string()));
        }
        if let Some(index) = parse_dump_request(bytes) {
            let patch = self.codec.patch_from_image(&lock(&self.image));
            let reply = self
                .codec
                .encode_bulk(&patch, index)
                .map_err(|e| DeviceError::Transport(e.to_string()))?;
            let _ = self.replies_tx.send(reply);
            return Ok(());
        }

        let frames = split_frames(bytes).map_err(|e| DeviceError::Transport(e.to_string()))?;
        let mut image = lock(&self.image);
        for frame in frames {
            match decode_frame(frame) {
                Ok(DecodedFrame::Parameter { address, payload })
                | Ok(DecodedFrame::Bulk { address, payload }) => {
                    image
                        .write(address, &payload)
                        .map_err(|e| DeviceError::Transport(e.to_string()))?;
                }
                Ok(DecodedFrame::BulkMarker { .. }) => {}
                // the unit silently drops frames it cannot parse
                Err(e) => log::debug!("Rig dropped frame: {}", e),
            }
        }
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, DeviceError> {
        Ok(self.replies_rx.recv_timeout(timeout).ok())
    }

    fn name(&self) -> &str {
        "simulated rig"
    }
}

/// Audio end of the rig
pub struct RigAudio {
    settings: RigSettings,
    image: Arc<Mutex<PatchImage>>,
    faults: Arc<Faults>,
    codec: PatchCodec,
    noise_state: u64,
}

impl RigAudio {
    /// Uniform noise in `[-1, 1)` from a 64-bit LCG
    fn next_noise(&mut self) -> f32 {
        self.noise_state = self
            .noise_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.noise_state >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
    }
}

impl AudioIo for RigAudio {
    fn sample_rate(&self) -> u32 {
        self.settings.sample_rate
    }

    fn play_record(
        &mut self,
        signal: &AudioTake,
        timeout: Duration,
    ) -> Result<AudioTake, AudioIoError> {
        check_signal(signal, self.settings.sample_rate)?;
        let clean = take_fault(&self.faults.clean_captures);
        if !clean && take_fault(&self.faults.timeouts) {
            return Err(AudioIoError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            });
        }

        let frames = signal.frames();
        if !clean && take_fault(&self.faults.scrambled) {
            let noise = (0..frames).map(|_| 0.3 * self.next_noise()).collect();
            return Ok(AudioTake::from_mono(noise, self.settings.sample_rate));
        }

        let patch = self.codec.patch_from_image(&lock(&self.image));
        let mut processed = signal.mono_samples();
        RigChain::from_patch(&patch, self.settings.sample_rate).process(&mut processed);

        let latency = dsp::ms_to_samples(self.settings.latency_ms, self.settings.sample_rate);
        let gain = dsp::db_to_linear(self.settings.gain_db) as f32;
        let mut captured = vec![0.0f32; frames];
        for (i, s) in processed.iter().enumerate() {
            match captured.get_mut(i + latency) {
                Some(slot) => *slot = s * gain,
                None => break,
            }
        }
        let level = self.settings.noise_level;
        if level > 0.0 {
            for slot in captured.iter_mut() {
                *slot += level * self.next_noise();
            }
        }
        Ok(AudioTake::from_mono(captured, self.settings.sample_rate))
    }

    fn name(&self) -> &str {
        "simulated loop"
    }
}
