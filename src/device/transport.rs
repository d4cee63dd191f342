//! Byte-level MIDI transport seam
//!
//! The device session only needs to push SysEx bytes out and occasionally
//! read a reply. Hardware ports, the simulated rig and test doubles all sit
//! behind [`MidiTransport`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};

use crate::error::DeviceError;

/// A bidirectional SysEx transport
pub trait MidiTransport: Send {
    /// Transmit one complete frame
    fn send(&mut self, bytes: &[u8]) -> Result<(), DeviceError>;

    /// Wait up to `timeout` for the next incoming message
    fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, DeviceError>;

    /// Human-readable port name for logs
    fn name(&self) -> &str {
        "midi"
    }
}

/// A frame as observed on a [`RecordingTransport`]
#[derive(Debug, Clone)]
pub struct SentFrame {
    pub at: Instant,
    pub bytes: Vec<u8>,
}

/// Test double that records every frame and can be told to misbehave
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<SentFrame>>>,
    failing: Arc<AtomicBool>,
    stall_ms: Arc<AtomicU64>,
    replies: Receiver<Vec<u8>>,
}

/// Control handle for a [`RecordingTransport`] owned by a session
#[derive(Clone)]
pub struct TransportProbe {
    sent: Arc<Mutex<Vec<SentFrame>>>,
    failing: Arc<AtomicBool>,
    stall_ms: Arc<AtomicU64>,
    replies: Sender<Vec<u8>>,
}

impl RecordingTransport {
    pub fn new() -> (Self, TransportProbe) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let failing = Arc::new(AtomicBool::new(false));
        let stall_ms = Arc::new(AtomicU64::new(0));
        let (tx, rx) = flume::unbounded();
        (
            Self {
                sent: sent.clone(),
                failing: failing.clone(),
                stall_ms: stall_ms.clone(),
                replies: rx,
            },
            TransportProbe {
                sent,
                failing,
                stall_ms,
                replies: tx,
            },
        )
    }
}

impl MidiTransport for RecordingTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), DeviceError> {
        let stall = self.stall_ms.load(Ordering::Relaxed);
        if stall > 0 {
            std::thread::sleep(Duration::from_millis(stall));
        }
        if self.failing.load(Ordering::Relaxed) {
            return Err(DeviceError::Transport("port closed".to_string()));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentFrame {
                at: Instant::now(),
                bytes: bytes.to_vec(),
            });
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, DeviceError> {
        Ok(self.replies.recv_timeout(timeout).ok())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

impl TransportProbe {
    pub fn sent(&self) -> Vec<SentFrame> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Make every send take this long
    pub fn set_stall(&self, stall: Duration) {
        self.stall_ms.store(stall.as_millis() as u64, Ordering::Relaxed);
    }

    /// Queue a message for the next `receive`
    pub fn push_reply(&self, bytes: Vec<u8>) {
        let _ = self.replies.send(bytes);
    }
}
