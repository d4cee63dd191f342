//! Paced SysEx send queue
//!
//! Frames are queued by the control loop and drained by a dedicated worker
//! thread that keeps a minimum spacing between frames on the wire, since
//! the unit drops messages that arrive back to back. A newer write to the
//! same `(section, offset)` replaces an older one that has not left the
//! queue yet.
//!
//! Callers block on a per-frame completion channel with a timeout instead
//! of polling.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::device::transport::MidiTransport;
use crate::error::{DeviceError, ProtocolError, Result};
use crate::patch::codec::{decode_frame, dump_request, split_frames, DecodedFrame};
use crate::patch::{Address, Frame, Patch, PatchCodec, PatchImage, Region};

/// How a queued frame left the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// Written to the transport
    Transmitted,
    /// Replaced by a newer frame for the same address, or cleared
    Superseded,
}

type Completion = std::result::Result<Ack, DeviceError>;

struct Pending {
    id: u64,
    bytes: Vec<u8>,
    address: Option<Address>,
    done: Sender<Completion>,
}

#[derive(Default)]
struct QueueState {
    frames: VecDeque<Pending>,
    in_flight: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    available: Condvar,
    drained: Condvar,
    shutdown: AtomicBool,
    transmitted: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Owner of the device connection
pub struct DeviceSession {
    shared: Arc<Shared>,
    transport: Arc<Mutex<Box<dyn MidiTransport>>>,
    next_id: AtomicU64,
    frame_timeout: Duration,
    retry_budget: u32,
    worker: Option<JoinHandle<()>>,
}

impl DeviceSession {
    /// Start the drain worker for `transport`
    pub fn new(
        transport: Box<dyn MidiTransport>,
        config: &DeviceConfig,
    ) -> std::result::Result<Self, DeviceError> {
        info!(
            "Opening device session on '{}' ({} ms frame spacing)",
            transport.name(),
            config.min_frame_interval_ms
        );
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            available: Condvar::new(),
            drained: Condvar::new(),
            shutdown: AtomicBool::new(false),
            transmitted: AtomicU64::new(0),
        });
        let transport = Arc::new(Mutex::new(transport));

        let worker = {
            let shared = shared.clone();
            let transport = transport.clone();
            let interval = config.min_frame_interval();
            std::thread::Builder::new()
                .name("device-drain".into())
                .spawn(move || drain(shared, transport, interval))
                .map_err(|e| DeviceError::Transport(format!("cannot spawn drain worker: {}", e)))?
        };

        Ok(Self {
            shared,
            transport,
            next_id: AtomicU64::new(0),
            frame_timeout: config.frame_timeout(),
            retry_budget: config.retry_budget.max(1),
            worker: Some(worker),
        })
    }

    /// Number of frames written to the transport so far
    pub fn transmitted(&self) -> u64 {
        self.shared.transmitted.load(Ordering::Relaxed)
    }

    /// Frames currently waiting in the queue
    pub fn queued(&self) -> usize {
        lock(&self.shared.state).frames.len()
    }

    fn enqueue(&self, frame: &Frame) -> std::result::Result<(u64, Receiver<Completion>), DeviceError> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(DeviceError::Shutdown);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = flume::bounded(1);
        let address = frame.address();

        let mut state = lock(&self.shared.state);
        if let Some(address) = address {
            if let Some(pos) = state.frames.iter().position(|p| p.address == Some(address)) {
                if let Some(old) = state.frames.remove(pos) {
                    debug!("Frame {} superseded by {} at {:?}", old.id, id, address);
                    let _ = old.done.send(Ok(Ack::Superseded));
                }
            }
        }
        state.frames.push_back(Pending {
            id,
            bytes: frame.bytes().to_vec(),
            address,
            done: tx,
        });
        drop(state);
        self.shared.available.notify_one();
        Ok((id, rx))
    }

    /// Remove a frame that is still queued
    fn withdraw(&self, id: u64) {
        let mut state = lock(&self.shared.state);
        state.frames.retain(|p| p.id != id);
    }

    fn wait(&self, id: u64, rx: &Receiver<Completion>, timeout: Duration) -> Completion {
        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                self.withdraw(id);
                Err(DeviceError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(DeviceError::Shutdown),
        }
    }

    /// Queue one frame and block until it is transmitted, superseded or
    /// `timeout` elapses. A timed-out frame is withdrawn from the queue.
    ///
    /// Only a frame still waiting in the queue can be withdrawn. One the
    /// worker has already taken may reach the unit after the timeout, so a
    /// retry can put the same frame on the wire twice. Parameter writes are
    /// idempotent, so the unit ends up in the same state either way.
    pub fn send_frame(&self, frame: &Frame, timeout: Duration) -> Completion {
        let (id, rx) = self.enqueue(frame)?;
        self.wait(id, &rx, timeout)
    }

    /// [`send_frame`](Self::send_frame) with the configured retry budget
    pub fn send_with_retry(&self, frame: &Frame) -> Completion {
        self.retry(frame, 0)
    }

    fn retry(&self, frame: &Frame, attempts_used: u32) -> Completion {
        let mut attempts = attempts_used;
        while attempts < self.retry_budget {
            attempts += 1;
            match self.send_frame(frame, self.frame_timeout) {
                Ok(ack) => return Ok(ack),
                Err(e @ (DeviceError::Timeout { .. } | DeviceError::Transport(_))) => {
                    warn!(
                        "Send attempt {}/{} failed: {}",
                        attempts, self.retry_budget, e
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Err(DeviceError::Unreachable { attempts })
    }

    /// Queue a batch and wait for all of it. Each frame keeps its own retry
    /// budget; the first unreachable frame aborts the batch.
    pub fn send_frames(&self, frames: &[Frame]) -> std::result::Result<(), DeviceError> {
        let mut pending = Vec::with_capacity(frames.len());
        for frame in frames {
            let (id, rx) = self.enqueue(frame)?;
            pending.push((frame, id, rx));
        }
        for (frame, id, rx) in pending {
            match self.wait(id, &rx, self.frame_timeout) {
                Ok(_) => {}
                Err(e @ (DeviceError::Timeout { .. } | DeviceError::Transport(_))) => {
                    warn!("Frame {} failed ({}), retrying", id, e);
                    self.retry(frame, 1)?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Block until every queued frame has been handled
    pub fn flush_queue(&self, timeout: Duration) -> std::result::Result<(), DeviceError> {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.shared.state);
        while !state.frames.is_empty() || state.in_flight {
            let now = Instant::now();
            if now >= deadline {
                return Err(DeviceError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            state = self
                .shared
                .drained
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        Ok(())
    }

    /// Drop every queued frame; waiters see [`Ack::Superseded`]
    pub fn clear_queue(&self) -> usize {
        let mut state = lock(&self.shared.state);
        let cleared = state.frames.len();
        for pending in state.frames.drain(..) {
            let _ = pending.done.send(Ok(Ack::Superseded));
        }
        if cleared > 0 {
            debug!("Cleared {} queued frames", cleared);
        }
        cleared
    }

    /// Ask the unit for a bulk dump of `patch_index` and decode the reply
    pub fn request_patch(
        &self,
        codec: &PatchCodec,
        patch_index: u8,
        timeout: Duration,
    ) -> Result<Patch> {
        self.flush_queue(timeout)?;
        let deadline = Instant::now() + timeout;
        let mut transport = lock(&self.transport);
        transport.send(&dump_request(patch_index))?;

        let mut image = PatchImage::default();
        let mut regions = (false, false);
        while !(regions.0 && regions.1) {
            let now = Instant::now();
            if now >= deadline {
                return Err(DeviceError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                }
                .into());
            }
            let Some(message) = transport.receive(deadline - now)? else {
                continue;
            };
            for frame in split_frames(&message)? {
                match decode_frame(frame) {
                    Ok(DecodedFrame::Bulk { address, payload }) => {
                        image.write(address, &payload)?;
                        match address.region {
                            Region::Common => regions.0 = true,
                            Region::Effect => regions.1 = true,
                        }
                    }
                    Ok(_) | Err(ProtocolError::UnknownHeader) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        info!("Received dump of patch {}", patch_index);
        Ok(codec.patch_from_image(&image))
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.available.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Worker loop: pop, pace, transmit, signal
fn drain(shared: Arc<Shared>, transport: Arc<Mutex<Box<dyn MidiTransport>>>, interval: Duration) {
    let mut last_sent: Option<Instant> = None;
    loop {
        let next = {
            let mut state = lock(&shared.state);
            loop {
                if shared.shutdown.load(Ordering::Acquire) {
                    for pending in state.frames.drain(..) {
                        let _ = pending.done.send(Err(DeviceError::Shutdown));
                    }
                    shared.drained.notify_all();
                    return;
                }
                if let Some(pending) = state.frames.pop_front() {
                    state.in_flight = true;
                    break pending;
                }
                state = shared
                    .available
                    .wait(state)
                    .unwrap_or_else(|e| e.into_inner());
            }
        };

        if let Some(at) = last_sent {
            let elapsed = at.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }

        let result = lock(&transport).send(&next.bytes).map(|_| Ack::Transmitted);
        last_sent = Some(Instant::now());
        if result.is_ok() {
            shared.transmitted.fetch_add(1, Ordering::Relaxed);
        }
        let _ = next.done.send(result);

        lock(&shared.state).in_flight = false;
        shared.drained.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::transport::RecordingTransport;
    use crate::patch::codec::parameter_frame;

    fn config(interval_ms: u64, timeout_ms: u64) -> DeviceConfig {
        DeviceConfig {
            min_frame_interval_ms: interval_ms,
            frame_timeout_ms: timeout_ms,
            retry_budget: 3,
            patch_index: 0,
        }
    }

    #[test]
    fn test_frames_are_paced() {
        let (transport, probe) = RecordingTransport::new();
        let session = DeviceSession::new(Box::new(transport), &config(10, 1000)).unwrap();

        let frames: Vec<Frame> = (0..4u8)
            .map(|i| parameter_frame(Address::effect(30 + i), &[i]))
            .collect();
        session.send_frames(&frames).unwrap();

        let sent = probe.sent();
        assert_eq!(sent.len(), 4);
        for pair in sent.windows(2) {
            assert!(pair[1].at.duration_since(pair[0].at) >= Duration::from_millis(9));
        }
        assert_eq!(session.transmitted(), 4);
    }

    #[test]
    fn test_newer_write_supersedes_queued_one() {
        let (transport, probe) = RecordingTransport::new();
        probe.set_stall(Duration::from_millis(50));
        let session = DeviceSession::new(Box::new(transport), &config(0, 2000)).unwrap();

        // occupies the worker while the next two frames queue up
        let blocker = parameter_frame(Address::effect(30), &[1]);
        let (_, blocker_rx) = session.enqueue(&blocker).unwrap();

        let old = parameter_frame(Address::effect(78), &[10]);
        let new = parameter_frame(Address::effect(78), &[20]);
        let (_, old_rx) = session.enqueue(&old).unwrap();
        let (_, new_rx) = session.enqueue(&new).unwrap();

        assert_eq!(old_rx.recv().unwrap(), Ok(Ack::Superseded));
        assert_eq!(blocker_rx.recv().unwrap(), Ok(Ack::Transmitted));
        assert_eq!(new_rx.recv().unwrap(), Ok(Ack::Transmitted));

        let sent = probe.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].bytes, new.bytes());
    }

    #[test]
    fn test_transport_failure_becomes_unreachable() {
        let (transport, probe) = RecordingTransport::new();
        probe.set_failing(true);
        let session = DeviceSession::new(Box::new(transport), &config(0, 200)).unwrap();

        let frame = parameter_frame(Address::effect(30), &[5]);
        assert_eq!(
            session.send_with_retry(&frame),
            Err(DeviceError::Unreachable { attempts: 3 })
        );
    }

    #[test]
    fn test_timeout_withdraws_frame() {
        let (transport, probe) = RecordingTransport::new();
        probe.set_stall(Duration::from_millis(200));
        let session = DeviceSession::new(Box::new(transport), &config(0, 1000)).unwrap();

        let blocker = parameter_frame(Address::effect(30), &[1]);
        let (_, _blocker_rx) = session.enqueue(&blocker).unwrap();

        let frame = parameter_frame(Address::effect(31), &[2]);
        let result = session.send_frame(&frame, Duration::from_millis(20));
        assert_eq!(result, Err(DeviceError::Timeout { timeout_ms: 20 }));

        session.flush_queue(Duration::from_secs(2)).unwrap();
        assert_eq!(probe.sent().len(), 1);
    }

    #[test]
    fn test_clear_queue_releases_waiters() {
        let (transport, probe) = RecordingTransport::new();
        probe.set_stall(Duration::from_millis(100));
        let session = DeviceSession::new(Box::new(transport), &config(0, 1000)).unwrap();

        let (_, _first) = session
            .enqueue(&parameter_frame(Address::effect(30), &[1]))
            .unwrap();
        let (_, second) = session
            .enqueue(&parameter_frame(Address::effect(31), &[1]))
            .unwrap();

        // the first frame may or may not have been picked up yet
        assert!(session.clear_queue() >= 1);
        assert_eq!(second.recv().unwrap(), Ok(Ack::Superseded));
    }

    #[test]
    fn test_request_patch_collects_bulk_reply() {
        let (transport, probe) = RecordingTransport::new();
        let session = DeviceSession::new(Box::new(transport), &config(0, 500)).unwrap();
        let codec = PatchCodec::new();

        let patch = Patch::new("Dumped").with_number(crate::patch::SectionId::Amp, "gain", 1.0);
        probe.push_reply(codec.encode_bulk(&patch, 3).unwrap());

        let received = session
            .request_patch(&codec, 3, Duration::from_secs(1))
            .unwrap();
        assert_eq!(received.name(), "Dumped");
        assert_eq!(received.number(crate::patch::SectionId::Amp, "gain"), Some(1.0));
        assert_eq!(
            probe.sent()[0].bytes,
            crate::patch::codec::dump_request(3)
        );
    }
}
